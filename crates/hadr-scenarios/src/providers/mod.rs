//! Scenario drivers
//!
//! Each provider checks at construction that the change can be attempted at
//! all, then hands out its validators and a plan of tasks with explicit
//! prerequisites.

mod add_database;
mod add_replicas;
mod create_group;
mod failover;

pub use add_database::AddDatabaseProvider;
pub use add_replicas::AddReplicasProvider;
pub use create_group::CreateAvailabilityGroupProvider;
pub use failover::{FailoverProvider, FailoverRequest};

use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use crate::tasks::{
    AddDatabaseCredentialTask, BackupDatabaseTask, ConfigureEndpointsTask, CreateLoginsTask,
    JoinDatabaseTask, RestoreDatabaseTask,
};
use crate::validators::{
    DatabaseExistenceValidator, DatabaseFileCompatibilityValidator,
    DatabaseFileExistenceValidator, DatabaseSet, FreeDiskSpaceValidator,
};
use hadr_kernel::plan::{StepId, TaskPlan};
use hadr_kernel::provider::{BoxedTask, BoxedValidator};
use hadr_model::admin::BackupKind;
use hadr_model::{ReplicaSpec, RequiredLogin};

/// Task plan of a HADR scenario.
pub type HadrPlan = TaskPlan<BoxedTask<HadrError>>;
/// Validators of a HADR scenario.
pub type HadrValidators = Vec<BoxedValidator<HadrError>>;

/// Logs the verdict of a provider constructor and counts rejections.
fn constructed<P>(scenario: &'static str, result: Result<P>) -> Result<P> {
    match &result {
        Ok(_) => tracing::info!(scenario, "scenario provider ready"),
        Err(e) => {
            metrics::counter!("hadr_provider_rejections_total", "scenario" => scenario).increment(1);
            tracing::warn!(scenario, error = e as &(dyn std::error::Error + 'static), "scenario cannot be attempted");
        }
    }
    result
}

/// The four checks run against a secondary that receives data.
fn replica_validators(ctx: &ScenarioContext, replica: &str, databases: DatabaseSet) -> HadrValidators {
    vec![
        Box::new(FreeDiskSpaceValidator::new(ctx.clone(), replica, databases)) as BoxedValidator<HadrError>,
        Box::new(DatabaseExistenceValidator::new(ctx.clone(), replica, databases)),
        Box::new(DatabaseFileExistenceValidator::new(ctx.clone(), replica, databases)),
        Box::new(DatabaseFileCompatibilityValidator::new(ctx.clone(), replica, databases)),
    ]
}

/// Master-key facts of the databases a scenario touches, read from the
/// primary at construction.
struct MasterKeys {
    credential_databases: Vec<String>,
    has_master_keys: bool,
}

fn master_keys(ctx: &ScenarioContext, names: &[&str]) -> Result<MasterKeys> {
    let mut credential_databases = Vec::new();
    for name in names {
        if ctx.credential_needed(name)? {
            credential_databases.push((*name).to_string());
        }
    }
    let has_master_keys = !ctx.master_key_databases(names.iter().copied())?.is_empty();
    Ok(MasterKeys {
        credential_databases,
        has_master_keys,
    })
}

/// Logins each replica needs, resolved once at construction.
#[derive(Debug, Clone)]
struct ReplicaLogins {
    replica: String,
    logins: Vec<RequiredLogin>,
}

fn resolve_logins<'a>(
    ctx: &ScenarioContext,
    replicas: impl IntoIterator<Item = &'a ReplicaSpec>,
) -> Vec<ReplicaLogins> {
    replicas
        .into_iter()
        .map(|replica| ReplicaLogins {
            replica: replica.name.clone(),
            logins: ctx.topology().login_names(replica, ctx.admin()),
        })
        .collect()
}

/// Pushes `login:R` (when some login is missing) and `endpoint:R`; returns
/// the endpoint step.
fn push_endpoint_setup(plan: &mut HadrPlan, ctx: &ScenarioContext, entry: &ReplicaLogins) -> StepId {
    let replica = entry.replica.as_str();
    let missing: Vec<String> = entry
        .logins
        .iter()
        .filter(|l| !l.exists)
        .map(|l| l.name.clone())
        .collect();
    let mut prerequisites = Vec::new();
    if !missing.is_empty() {
        prerequisites.push(plan.push(
            format!("login:{replica}"),
            Box::new(CreateLoginsTask::new(ctx.clone(), replica, missing)),
        ));
    }
    let all = entry.logins.iter().map(|l| l.name.clone()).collect();
    plan.push_after(
        format!("endpoint:{replica}"),
        prerequisites,
        Box::new(ConfigureEndpointsTask::new(ctx.clone(), replica, all)),
    )
}

/// Backup, restore on every secondary, log backup, then per secondary the
/// log restore, followed by the join and credential steps when `join` is set.
struct Seeding<'a> {
    database: &'a str,
    secondaries: &'a [String],
    /// Steps after which the secondaries belong to the group.
    joined: &'a [StepId],
    join: bool,
    credentials: bool,
    primary_credential: bool,
}

fn push_seeding(plan: &mut HadrPlan, ctx: &ScenarioContext, seeding: &Seeding<'_>) {
    let db = seeding.database;
    let backup = plan.push_after(
        format!("backup:{db}"),
        seeding.joined.iter().cloned(),
        Box::new(BackupDatabaseTask::new(ctx.clone(), db, BackupKind::Full)),
    );
    for replica in seeding.secondaries {
        plan.push_after(
            format!("restore:{db}:{replica}"),
            [backup.clone()],
            Box::new(RestoreDatabaseTask::new(ctx.clone(), db, replica, BackupKind::Full)),
        );
    }
    let backup_log = plan.push_after(
        format!("backup-log:{db}"),
        [backup],
        Box::new(BackupDatabaseTask::new(ctx.clone(), db, BackupKind::Log)),
    );

    let mut joins = Vec::new();
    for replica in seeding.secondaries {
        let mut after = vec![StepId::new(format!("restore:{db}:{replica}")), backup_log.clone()];
        after.extend(seeding.joined.iter().cloned());
        let restore_log = plan.push_after(
            format!("restore-log:{db}:{replica}"),
            after,
            Box::new(RestoreDatabaseTask::new(ctx.clone(), db, replica, BackupKind::Log)),
        );
        if !seeding.join {
            continue;
        }
        let mut after = vec![restore_log];
        after.extend(seeding.joined.iter().cloned());
        let join = plan.push_after(
            format!("join-db:{db}:{replica}"),
            after,
            Box::new(JoinDatabaseTask::new(ctx.clone(), db, replica)),
        );
        if seeding.credentials {
            plan.push_after(
                format!("credential:{db}:{replica}"),
                [join.clone()],
                Box::new(AddDatabaseCredentialTask::new(ctx.clone(), db, replica)),
            );
        }
        joins.push(join);
    }

    if seeding.primary_credential && !joins.is_empty() {
        if let Ok(primary) = ctx.primary() {
            plan.push_after(
                format!("credential:{db}:{}", primary.name),
                joins,
                Box::new(AddDatabaseCredentialTask::new(ctx.clone(), db, &primary.name)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hadr_model::admin::InMemoryAdmin;
    use hadr_model::{DatabaseSpec, TopologySnapshot};
    use std::sync::Arc;

    #[test]
    fn seeding_without_join_stops_at_log_restore() {
        let topology = TopologySnapshot::new(
            "ag1",
            vec![ReplicaSpec::primary("P"), ReplicaSpec::secondary("S1")],
        )
        .with_databases(vec![DatabaseSpec::new("Sales")]);
        let ctx = ScenarioContext::new(Arc::new(topology), Arc::new(InMemoryAdmin::new()));
        let mut plan = HadrPlan::new();
        let secondaries = vec!["S1".to_string()];
        push_seeding(
            &mut plan,
            &ctx,
            &Seeding {
                database: "Sales",
                secondaries: &secondaries,
                joined: &[],
                join: false,
                credentials: true,
                primary_credential: true,
            },
        );
        let ids: Vec<&str> = plan.ids().map(StepId::as_str).collect();
        assert_eq!(
            ids,
            ["backup:Sales", "restore:Sales:S1", "backup-log:Sales", "restore-log:Sales:S1"]
        );
        assert!(plan.verify().is_ok());
    }
}
