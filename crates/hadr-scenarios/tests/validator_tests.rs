use hadr_kernel::validator::Validator;
use hadr_model::admin::EndpointInfo;
use hadr_model::{
    AvailabilityMode, DataSynchronization, DatabaseSpec, EndpointEncryption, FailoverMode,
    ListenerSpec, MirroringRole, ReplicaSpec, TopologySnapshot,
};
use hadr_scenarios::prelude::*;
use hadr_scenarios::validators::*;
use hadr_test_utils::{
    details_of, node, three_node_admin, three_node_topology, FaultyAdmin, DATABASE, GROUP,
    PRIMARY, SECONDARIES,
};
use std::sync::Arc;

fn check<V>(validator: &V) -> Result<u32, ExecutionError<HadrError>>
where
    V: Validator<Error = HadrError>,
{
    ValidationExecutor::new(ProgressSink::disabled()).run(validator, &mut RunOncePolicy::new())
}

fn body_error(result: Result<u32, ExecutionError<HadrError>>) -> HadrError {
    match result {
        Err(ExecutionError::Failed(e)) => e,
        other => panic!("expected a body error, got {other:?}"),
    }
}

fn context(topology: TopologySnapshot, admin: Arc<dyn AdminSurface>) -> ScenarioContext {
    ScenarioContext::new(Arc::new(topology), admin)
}

#[test]
fn test_backup_location_round_trips_through_the_share() {
    let admin = Arc::new(FaultyAdmin::new(three_node_admin()));
    let ctx = context(three_node_topology(DataSynchronization::Full), admin.clone());
    let (sink, feed) = ProgressChannel::unbounded();

    let attempts = ValidationExecutor::new(sink)
        .run(&BackupLocationValidator::new(ctx), &mut RunOncePolicy::new())
        .unwrap();

    assert_eq!(attempts, 1);
    assert_eq!(admin.calls("read_backup_header", SECONDARIES[0]), 1);
    assert_eq!(admin.calls("read_backup_header", SECONDARIES[1]), 1);
    assert_eq!(admin.calls("drop_database", PRIMARY), 1);
    let records = feed.drain();
    let details = details_of(&records, BackupLocationValidator::NAME);
    assert!(details.iter().any(|d| d.starts_with("S2 can read")));
}

#[test]
fn test_backup_location_write_failure_names_the_primary() {
    let admin = Arc::new(FaultyAdmin::new(three_node_admin()).fail("backup", PRIMARY, 1));
    let ctx = context(three_node_topology(DataSynchronization::Full), admin.clone());

    let error = body_error(check(&BackupLocationValidator::new(ctx)));
    assert!(matches!(error, HadrError::PrimaryCannotWriteToLocation { ref server, .. } if server == PRIMARY));
    assert_eq!(admin.calls("read_backup_header", SECONDARIES[0]), 0);
    // the scratch database is dropped even though the backup failed
    assert_eq!(admin.calls("drop_database", PRIMARY), 1);
}

#[test]
fn test_backup_location_read_failure_keeps_the_cause() {
    let admin = Arc::new(
        FaultyAdmin::new(three_node_admin()).fail("read_backup_header", SECONDARIES[1], 1),
    );
    let ctx = context(three_node_topology(DataSynchronization::Full), admin.clone());

    let error = body_error(check(&BackupLocationValidator::new(ctx)));
    match error {
        HadrError::SecondaryCannotReadLocation { replica, source, .. } => {
            assert_eq!(replica, SECONDARIES[1]);
            assert!(source.is_some());
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(admin
        .inner()
        .node(PRIMARY)
        .unwrap()
        .databases
        .iter()
        .all(|d| d.name == DATABASE));
}

#[test]
fn test_free_space_counts_data_and_log_together_on_one_volume() {
    let admin = three_node_admin();
    admin.update_node(SECONDARIES[0], |facts| {
        facts.default_log_path = Some(facts.data_path());
        facts.free_space_kb = 4096 + 512;
    });
    let ctx = context(three_node_topology(DataSynchronization::Full), Arc::new(admin));

    let validator = FreeDiskSpaceValidator::new(ctx, SECONDARIES[0], DatabaseSet::New);
    match body_error(check(&validator)) {
        HadrError::InsufficientFreeSpace { required_kb, available_kb, .. } => {
            assert_eq!(required_kb, 4096 + 1024);
            assert_eq!(available_kb, 4096 + 512);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_free_space_is_skipped_without_initialization() {
    let admin = three_node_admin();
    admin.update_node(SECONDARIES[0], |facts| facts.free_space_kb = 0);
    let ctx = context(three_node_topology(DataSynchronization::JoinOnly), Arc::new(admin));
    assert!(check(&FreeDiskSpaceValidator::new(ctx, SECONDARIES[0], DatabaseSet::New)).is_ok());
}

#[test]
fn test_existing_database_conflicts_unless_join_only_and_restoring() {
    let admin = three_node_admin();
    admin.update_node(SECONDARIES[0], |facts| {
        *facts = facts.clone().with_database(DATABASE, 1024);
    });
    let admin: Arc<dyn AdminSurface> = Arc::new(admin);

    let full = context(three_node_topology(DataSynchronization::Full), admin.clone());
    let error = body_error(check(&DatabaseExistenceValidator::new(full, SECONDARIES[0], DatabaseSet::New)));
    assert!(matches!(error, HadrError::DatabaseAlreadyExists { ref databases, .. } if databases == &[DATABASE]));

    let join_only = context(three_node_topology(DataSynchronization::JoinOnly), admin);
    // online, not restoring: still a conflict
    assert!(check(&DatabaseExistenceValidator::new(join_only, SECONDARIES[0], DatabaseSet::New)).is_err());
}

#[test]
fn test_missing_directory_is_reported_once() {
    let admin = InMemoryAdmin::from_nodes([
        node(PRIMARY)
            .with_database_info(hadr_model::admin::DatabaseInfo {
                name: DATABASE.into(),
                accessible: true,
                has_master_key: false,
                encrypted: false,
                restoring: false,
                files: vec![
                    hadr_model::admin::DatabaseFile {
                        logical_name: "Sales".into(),
                        path: r"D:\Data\Sales.mdf".into(),
                        kind: hadr_model::admin::FileKind::Data,
                        size_kb: 1024,
                    },
                    hadr_model::admin::DatabaseFile {
                        logical_name: "Sales2".into(),
                        path: r"D:\Data\Sales2.ndf".into(),
                        kind: hadr_model::admin::FileKind::Data,
                        size_kb: 1024,
                    },
                ],
            }),
        node(SECONDARIES[0]),
        node(SECONDARIES[1]),
    ]);
    let ctx = context(three_node_topology(DataSynchronization::Full), Arc::new(admin));

    let validator = DatabaseFileCompatibilityValidator::new(ctx, SECONDARIES[0], DatabaseSet::New);
    match body_error(check(&validator)) {
        HadrError::DatabaseFileIncompatible { directories, .. } => {
            assert_eq!(directories, vec![r"D:\Data".to_string()]);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_live_endpoint_encryption_wins_over_the_snapshot() {
    let admin = three_node_admin();
    admin.update_node(PRIMARY, |facts| {
        facts.endpoint = Some(EndpointInfo {
            name: "Hadr_endpoint".into(),
            port: 5022,
            role: MirroringRole::All,
            encryption: EndpointEncryption::Disabled,
            started: true,
            connect_grants: Vec::new(),
        });
    });
    let ctx = context(three_node_topology(DataSynchronization::Full), Arc::new(admin));

    let error = body_error(check(&CompatibleEncryptionValidator::new(ctx)));
    assert!(matches!(
        error,
        HadrError::IncompatibleEncryption {
            primary: EndpointEncryption::Disabled,
            encryption: EndpointEncryption::Required,
            ..
        }
    ));
}

#[test]
fn test_asynchronous_replica_cannot_fail_over_automatically() {
    let topology = TopologySnapshot::new(
        GROUP,
        vec![
            ReplicaSpec::primary(PRIMARY),
            ReplicaSpec::secondary(SECONDARIES[0])
                .with_availability_mode(AvailabilityMode::AsynchronousCommit)
                .with_failover_mode(FailoverMode::Automatic),
        ],
    );
    let ctx = context(topology, Arc::new(three_node_admin()));
    let error = body_error(check(&AvailabilityModeValidator::new(ctx)));
    assert!(matches!(error, HadrError::AvailabilityModeIncompatible { ref replica, .. } if replica == SECONDARIES[0]));
}

#[test]
fn test_configuration_only_replica_needs_external_cluster() {
    let mut topology = TopologySnapshot::new(
        GROUP,
        vec![
            ReplicaSpec::primary(PRIMARY),
            ReplicaSpec::secondary(SECONDARIES[0])
                .with_availability_mode(AvailabilityMode::ConfigurationOnly),
        ],
    );
    let admin: Arc<dyn AdminSurface> = Arc::new(three_node_admin());
    let ctx = context(topology.clone(), admin.clone());
    assert!(check(&AvailabilityModeValidator::new(ctx)).is_err());

    topology.cluster_type = hadr_model::ClusterType::External;
    let ctx = context(topology, admin);
    assert!(check(&AvailabilityModeValidator::new(ctx)).is_ok());
}

#[test]
fn test_required_synchronized_secondaries_are_bounded() {
    let mut topology = three_node_topology(DataSynchronization::Full);
    topology.required_synchronized_secondaries_to_commit = 3;
    let ctx = context(topology, Arc::new(three_node_admin()));
    let error = body_error(check(&AvailabilityModeValidator::new(ctx)));
    assert!(error.to_string().contains("only 2"));
}

#[test]
fn test_basic_group_allows_one_secondary() {
    let mut topology = three_node_topology(DataSynchronization::Full);
    topology.is_basic = true;
    let ctx = context(topology, Arc::new(three_node_admin()));
    assert!(matches!(
        body_error(check(&BasicAvailabilityGroupValidator::new(ctx))),
        HadrError::BasicGroupLimit { .. }
    ));
}

#[test]
fn test_master_key_without_password_is_rejected() {
    let admin = three_node_admin();
    admin.update_node(PRIMARY, |facts| facts.databases[0].has_master_key = true);
    let admin: Arc<dyn AdminSurface> = Arc::new(admin);

    let ctx = context(three_node_topology(DataSynchronization::Full), admin.clone());
    let error = body_error(check(&DatabaseMasterKeyValidator::new(ctx, DatabaseSet::New)));
    assert!(matches!(error, HadrError::MasterKeyPasswordMissing { ref databases } if databases == &[DATABASE]));

    let mut topology = three_node_topology(DataSynchronization::Full);
    topology.new_databases = vec![DatabaseSpec::new(DATABASE).with_master_key_password("pw")];
    let ctx = context(topology, admin);
    assert!(check(&DatabaseMasterKeyValidator::new(ctx, DatabaseSet::New)).is_ok());
}

#[test]
fn test_missing_listener_is_only_a_warning() {
    let ctx = context(
        three_node_topology(DataSynchronization::Full),
        Arc::new(three_node_admin()),
    );
    let error = body_error(check(&ListenerConfigurationValidator::new(ctx)));
    assert_eq!(error.category(), ErrorCategory::ValidationWarning);

    let topology = three_node_topology(DataSynchronization::Full)
        .with_listener(ListenerSpec::dhcp("a-very-long-listener-name"));
    let ctx = context(topology, Arc::new(three_node_admin()));
    let error = body_error(check(&ListenerConfigurationValidator::new(ctx)));
    assert_eq!(error.category(), ErrorCategory::ValidationError);
}

#[test]
fn test_failover_target_must_have_joined() {
    let topology = three_node_topology(DataSynchronization::Full);
    let admin = three_node_admin();
    admin.insert_group(hadr_model::admin::GroupState {
        name: GROUP.into(),
        primary: PRIMARY.into(),
        online: true,
        replicas: vec![
            hadr_model::admin::ReplicaState {
                name: PRIMARY.into(),
                is_primary: true,
                joined: true,
                synchronized: true,
            },
            hadr_model::admin::ReplicaState {
                name: SECONDARIES[0].into(),
                is_primary: false,
                joined: false,
                synchronized: false,
            },
        ],
        databases: vec![DATABASE.into()],
        listener: None,
    });
    let admin: Arc<dyn AdminSurface> = Arc::new(admin);
    let ctx = context(topology, admin);

    let target = FailoverTargetValidator::new(ctx.clone(), SECONDARIES[0]);
    assert!(matches!(
        body_error(check(&target)),
        HadrError::FailoverTargetInvalid { .. }
    ));
    // S2 is not a replica of the running group
    let missing = FailoverTargetValidator::new(ctx.clone(), SECONDARIES[1]);
    assert!(check(&missing).is_err());

    let forced = TargetSynchronizedValidator::new(ctx, SECONDARIES[0], true);
    assert!(check(&forced).is_ok());
}
