use hadr_kernel::script::{self, ScriptTarget};
use hadr_model::admin::{BackupKind, EndpointInfo};
use hadr_model::{DataSynchronization, EndpointEncryption, MirroringRole, ObjectState};
use hadr_scenarios::prelude::*;
use hadr_scenarios::tasks::*;
use hadr_test_utils::{
    three_node_admin, three_node_topology, FaultyAdmin, DATABASE, GROUP, PRIMARY, SECONDARIES,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn executor() -> TaskExecutor {
    TaskExecutor::new(CancellationToken::new(), ProgressSink::disabled())
}

fn context(admin: Arc<dyn AdminSurface>) -> ScenarioContext {
    ScenarioContext::new(Arc::new(three_node_topology(DataSynchronization::Full)), admin)
}

#[test]
fn test_endpoint_that_fails_to_start_is_dropped() {
    let admin = Arc::new(FaultyAdmin::new(three_node_admin()).fail("start_endpoint", SECONDARIES[0], 1));
    let task = ConfigureEndpointsTask::new(context(admin.clone()), SECONDARIES[0], Vec::new());

    let error = executor().perform(&task, &mut RunOncePolicy::new()).unwrap_err();
    assert!(matches!(
        error.body_error(),
        Some(HadrError::Admin { operation, .. }) if operation == "Start endpoint"
    ));
    assert_eq!(admin.calls("drop_endpoint", SECONDARIES[0]), 1);
    assert!(admin.inner().node(SECONDARIES[0]).unwrap().endpoint.is_none());
}

#[test]
fn test_endpoint_start_is_retried_from_scratch() {
    let admin = Arc::new(FaultyAdmin::new(three_node_admin()).fail("start_endpoint", SECONDARIES[0], 1));
    let task = ConfigureEndpointsTask::new(context(admin.clone()), SECONDARIES[0], Vec::new());

    let mut policy = FixedRetryCountPolicy::new(1, Duration::ZERO);
    let run = executor().perform(&task, &mut policy).unwrap();

    assert_eq!(run.attempts(), Some(2));
    assert_eq!(admin.calls("create_endpoint", SECONDARIES[0]), 2);
    let endpoint = admin.inner().node(SECONDARIES[0]).unwrap().endpoint.unwrap();
    assert!(endpoint.started);
}

#[test]
fn test_witness_endpoint_is_promoted_and_granted() {
    let admin = three_node_admin();
    admin.update_node(SECONDARIES[0], |facts| {
        facts.endpoint = Some(EndpointInfo {
            name: "Mirroring".into(),
            port: 5023,
            role: MirroringRole::Witness,
            encryption: EndpointEncryption::Required,
            started: false,
            connect_grants: Vec::new(),
        });
        *facts = facts.clone().with_login(r"CORP\sql1", None);
    });
    let admin = Arc::new(admin);
    let task = ConfigureEndpointsTask::new(
        context(admin.clone()),
        SECONDARIES[0],
        vec![r"CORP\sql1".to_string()],
    );

    executor().perform(&task, &mut RunOncePolicy::new()).unwrap();

    let endpoint = admin.node(SECONDARIES[0]).unwrap().endpoint.unwrap();
    assert_eq!(endpoint.name, "Mirroring");
    assert_eq!(endpoint.role, MirroringRole::All);
    assert!(endpoint.started);
    assert_eq!(endpoint.connect_grants, vec![r"CORP\sql1".to_string()]);
}

#[test]
fn test_existing_replica_endpoint_is_left_alone() {
    let mut topology = three_node_topology(DataSynchronization::Full);
    topology.replicas[1] = topology.replicas[1].clone().with_state(ObjectState::Existing);
    let admin = Arc::new(FaultyAdmin::new(three_node_admin()));
    let ctx = ScenarioContext::new(Arc::new(topology), admin.clone());

    executor()
        .perform(
            &ConfigureEndpointsTask::new(ctx, SECONDARIES[0], Vec::new()),
            &mut RunOncePolicy::new(),
        )
        .unwrap();
    assert_eq!(admin.calls("create_endpoint", SECONDARIES[0]), 0);
}

#[test]
fn test_logins_are_created_once() {
    let admin = three_node_admin();
    admin.update_node(SECONDARIES[0], |facts| {
        *facts = facts.clone().with_login(r"CORP\sql1", None);
    });
    let admin = Arc::new(FaultyAdmin::new(admin));
    let task = CreateLoginsTask::new(
        context(admin.clone()),
        SECONDARIES[0],
        vec![r"CORP\sql1".into(), r"CORP\sql2".into()],
    );

    executor().perform(&task, &mut RunOncePolicy::new()).unwrap();
    assert_eq!(admin.calls("create_login", SECONDARIES[0]), 1);
}

#[test]
fn test_script_capture_leaves_the_node_untouched() {
    let admin = Arc::new(ScriptingAdmin::new(three_node_admin()));
    let topology = Arc::new(three_node_topology(DataSynchronization::Full));
    let ctx = ScenarioContext::new(topology.clone(), admin.clone());
    let task = CreateAvailabilityGroupTask::new(ctx);
    assert!(script::is_scriptable(&task));

    let run = script::capture(&executor(), &task, &mut RunOncePolicy::new()).unwrap();

    assert_eq!(run.scripts.len(), 1);
    assert_eq!(run.scripts[0].target, PRIMARY);
    assert!(run.scripts[0].statements[0].starts_with("CREATE AVAILABILITY GROUP"));
    assert!(run.scripts[0].render().contains("\nGO\n"));
    assert!(admin.inner().group(GROUP).is_none());
    assert!(topology.group_handle().is_none());
    assert!(!topology.replicas[0].connection().is_capturing());
}

#[test]
fn test_endpoint_script_lists_create_then_start() {
    let admin = Arc::new(ScriptingAdmin::new(three_node_admin()));
    let task = ConfigureEndpointsTask::new(context(admin.clone()), SECONDARIES[1], Vec::new());

    let run = script::capture(&executor(), &task, &mut RunOncePolicy::new()).unwrap();
    let statements = &run.scripts[0].statements;
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("CREATE ENDPOINT"));
    assert!(statements[1].ends_with("STATE = STARTED"));
    assert!(admin.inner().node(SECONDARIES[1]).unwrap().endpoint.is_none());
}

#[test]
fn test_wait_for_online_fails_while_the_group_is_offline() {
    let admin = three_node_admin();
    let topology = three_node_topology(DataSynchronization::Full);
    admin.insert_group(hadr_test_utils::running_group(&topology));
    admin.set_group_online(GROUP, false);
    let ctx = ScenarioContext::new(Arc::new(topology), Arc::new(admin));
    let task = WaitForGroupOnlineTask::new(ctx, PRIMARY);
    assert!(!script::is_scriptable(&task));

    let mut policy = FixedRetryCountPolicy::new(2, Duration::ZERO);
    let error = executor().perform(&task, &mut policy).unwrap_err();
    assert!(matches!(error.body_error(), Some(HadrError::GroupNotOnline { .. })));
}

#[test]
fn test_cancelled_run_touches_nothing() {
    let admin = Arc::new(FaultyAdmin::new(three_node_admin()));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let executor = TaskExecutor::new(cancel, ProgressSink::disabled());
    let task = BackupDatabaseTask::new(context(admin.clone()), DATABASE, BackupKind::Full);

    let run = executor.perform(&task, &mut RunOncePolicy::new()).unwrap();
    assert!(run.is_cancelled());
    assert_eq!(admin.calls("backup", PRIMARY), 0);
}

#[test]
fn test_log_restore_follows_the_full_restore() {
    let admin = Arc::new(three_node_admin());
    let ctx = context(admin.clone());
    let executor = executor();
    let steps: Vec<Box<dyn Task<Error = HadrError>>> = vec![
        Box::new(BackupDatabaseTask::new(ctx.clone(), DATABASE, BackupKind::Full)),
        Box::new(RestoreDatabaseTask::new(ctx.clone(), DATABASE, SECONDARIES[0], BackupKind::Full)),
        Box::new(BackupDatabaseTask::new(ctx.clone(), DATABASE, BackupKind::Log)),
        Box::new(RestoreDatabaseTask::new(ctx, DATABASE, SECONDARIES[0], BackupKind::Log)),
    ];
    for step in &steps {
        executor.perform(step.as_ref(), &mut RunOncePolicy::new()).unwrap();
    }

    let copy = admin
        .node(SECONDARIES[0])
        .unwrap()
        .databases
        .into_iter()
        .find(|d| d.name == DATABASE)
        .unwrap();
    assert!(copy.restoring);
    let restores = admin
        .operations()
        .into_iter()
        .filter(|op| op.node == SECONDARIES[0] && op.statement.starts_with("RESTORE"))
        .count();
    assert_eq!(restores, 2);
}

#[test]
fn test_abort_reaches_the_node_running_the_copy() {
    let admin = Arc::new(FaultyAdmin::new(three_node_admin()));
    let ctx = context(admin.clone());
    let backup = BackupDatabaseTask::new(ctx.clone(), DATABASE, BackupKind::Full);
    let restore = RestoreDatabaseTask::new(ctx.clone(), DATABASE, SECONDARIES[0], BackupKind::Full);

    backup.abort().unwrap();
    restore.abort().unwrap();

    assert_eq!(admin.calls("abort_operation", PRIMARY), 1);
    assert_eq!(admin.calls("abort_operation", SECONDARIES[0]), 1);
    assert_eq!(admin.calls("abort_operation", SECONDARIES[1]), 0);

    let join = JoinDatabaseTask::new(ctx, DATABASE, SECONDARIES[0]);
    assert!(join.abort().unwrap_err().is_unsupported());
    assert_eq!(admin.calls("abort_operation", SECONDARIES[0]), 1);
}

#[test]
fn test_failed_abort_is_reported_as_an_admin_error() {
    let admin = Arc::new(FaultyAdmin::new(three_node_admin()).fail("abort_operation", SECONDARIES[1], 1));
    let restore = RestoreDatabaseTask::new(context(admin.clone()), DATABASE, SECONDARIES[1], BackupKind::Log);

    let error = restore.abort().unwrap_err();
    assert!(matches!(
        error.body_error(),
        Some(HadrError::Admin { operation, node, .. }) if operation == "Abort" && node == SECONDARIES[1]
    ));
}

#[test]
fn test_failure_detail_carries_the_admin_cause() {
    let admin = Arc::new(FaultyAdmin::new(three_node_admin()).fail("create_login", SECONDARIES[0], 1));
    let task = CreateLoginsTask::new(context(admin), SECONDARIES[0], vec![r"CORP\sql1".into()]);
    let (sink, feed) = ProgressChannel::unbounded();
    let executor = TaskExecutor::new(CancellationToken::new(), sink);

    let error = executor.perform(&task, &mut RunOncePolicy::new()).unwrap_err();
    assert!(!error.to_string().contains("injected failure"));

    let records = feed.drain();
    let failed = records
        .iter()
        .find(|r| r.event.name() == task.name() && r.event.details().contains("create_login"))
        .map(|r| r.event.details().to_string())
        .unwrap();
    assert!(failed.contains("injected failure"));
}
