//! Database initialization and membership tasks.
//!
//! Backup and restore bodies succeed without doing anything when the
//! snapshot's data synchronization does not copy data through the backup
//! share; the plan shape stays the same for every mode.

use crate::context::{place_files, relocations, ScenarioContext};
use crate::error::{HadrError, Result};
use hadr_kernel::error::ExecutionError;
use hadr_kernel::policy::ExecutionPolicy;
use hadr_kernel::script::ScriptTarget;
use hadr_kernel::task::{Task, TaskContext};
use hadr_model::admin::{BackupKind, BackupRequest, FileMove, RestoreRequest};
use hadr_model::ReplicaSpec;
use std::sync::Arc;

fn backup_file_name(database: &str, kind: BackupKind) -> String {
    match kind {
        BackupKind::Full => format!("{database}.bak"),
        BackupKind::Log => format!("{database}.trn"),
    }
}

fn device(ctx: &ScenarioContext, replica: &ReplicaSpec, database: &str, kind: BackupKind) -> Result<String> {
    ctx.topology()
        .backup_device_for(replica.platform, &backup_file_name(database, kind))
        .ok_or_else(|| HadrError::BackupLocationMissing {
            group: ctx.group().to_string(),
            platform: replica.platform.to_string(),
        })
}

fn abort_on(ctx: &ScenarioContext, replica: Result<&ReplicaSpec>) -> Result<(), ExecutionError<HadrError>> {
    let replica = replica.map_err(ExecutionError::Failed)?;
    ctx.admin()
        .abort_operation(replica.connection())
        .map_err(|e| ExecutionError::Failed(HadrError::admin("Abort", e)))
}

fn single_target(ctx: &ScenarioContext, replica: &str) -> Vec<Arc<dyn ScriptTarget>> {
    ctx.replica(replica)
        .map(|r| vec![ctx.target(r)])
        .unwrap_or_default()
}

/// Backs up one database on the primary to the shared location.
#[derive(Debug)]
pub struct BackupDatabaseTask {
    ctx: ScenarioContext,
    database: String,
    kind: BackupKind,
    name: String,
}

impl BackupDatabaseTask {
    /// `kind` selects a full or log backup.
    pub fn new(ctx: ScenarioContext, database: &str, kind: BackupKind) -> Self {
        let primary = ctx.primary().map_or("", |p| p.name.as_str()).to_string();
        let name = match kind {
            BackupKind::Full => format!("Backing up '{database}' on {primary}"),
            BackupKind::Log => format!("Backing up log of '{database}' on {primary}"),
        };
        Self {
            ctx,
            database: database.to_string(),
            kind,
            name,
        }
    }
}

impl Task for BackupDatabaseTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, ctx: &TaskContext<'_>) -> Result<()> {
        if !self.ctx.topology().will_perform_backup_restore() {
            ctx.report("skipped: data is not copied through a backup share");
            return Ok(());
        }
        let primary = self.ctx.primary()?;
        let request = BackupRequest {
            database: self.database.clone(),
            device: device(&self.ctx, primary, &self.database, self.kind)?,
            kind: self.kind,
        };
        self.ctx
            .admin()
            .backup(primary.connection(), &request)
            .map_err(|e| HadrError::admin("Backup", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        self.ctx
            .primary()
            .map(|p| vec![self.ctx.target(p)])
            .unwrap_or_default()
    }

    fn abort(&self) -> Result<(), ExecutionError<HadrError>> {
        abort_on(&self.ctx, self.ctx.primary())
    }
}

/// Restores a full or log backup WITH NORECOVERY on one secondary.
#[derive(Debug)]
pub struct RestoreDatabaseTask {
    ctx: ScenarioContext,
    database: String,
    replica: String,
    kind: BackupKind,
    name: String,
}

impl RestoreDatabaseTask {
    /// Restores `database` on `replica` from the backup of the same `kind`.
    pub fn new(ctx: ScenarioContext, database: &str, replica: &str, kind: BackupKind) -> Self {
        let name = match kind {
            BackupKind::Full => format!("Restoring '{database}' on {replica}"),
            BackupKind::Log => format!("Restoring log of '{database}' on {replica}"),
        };
        Self {
            ctx,
            database: database.to_string(),
            replica: replica.to_string(),
            kind,
            name,
        }
    }

    /// Full restores move files the secondary cannot place at the primary's
    /// paths.
    fn relocate(&self, replica: &ReplicaSpec) -> Result<Vec<FileMove>> {
        if self.kind == BackupKind::Log {
            return Ok(Vec::new());
        }
        let primary = self.ctx.primary()?;
        let Some(database) = self.ctx.primary_database(&self.database)? else {
            return Ok(Vec::new());
        };
        let server = self.ctx.server_info(replica)?;
        Ok(relocations(&place_files(&database.files, primary.platform, &server)))
    }
}

impl Task for RestoreDatabaseTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, ctx: &TaskContext<'_>) -> Result<()> {
        if !self.ctx.topology().will_perform_backup_restore() {
            ctx.report("skipped: data is not copied through a backup share");
            return Ok(());
        }
        let replica = self.ctx.replica(&self.replica)?;
        let request = RestoreRequest {
            database: self.database.clone(),
            device: device(&self.ctx, replica, &self.database, self.kind)?,
            kind: self.kind,
            relocate: self.relocate(replica)?,
        };
        self.ctx
            .admin()
            .restore(replica.connection(), &request)
            .map_err(|e| HadrError::admin("Restore", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        single_target(&self.ctx, &self.replica)
    }

    fn abort(&self) -> Result<(), ExecutionError<HadrError>> {
        abort_on(&self.ctx, self.ctx.replica(&self.replica))
    }
}

/// Joins a restored copy to the group on one secondary.
#[derive(Debug)]
pub struct JoinDatabaseTask {
    ctx: ScenarioContext,
    database: String,
    replica: String,
    name: String,
}

impl JoinDatabaseTask {
    /// Joins `database` on `replica`.
    pub fn new(ctx: ScenarioContext, database: &str, replica: &str) -> Self {
        Self {
            name: format!(
                "Joining '{database}' to availability group '{}' on {replica}",
                ctx.group()
            ),
            ctx,
            database: database.to_string(),
            replica: replica.to_string(),
        }
    }
}

impl Task for JoinDatabaseTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, ctx: &TaskContext<'_>) -> Result<()> {
        if !self.ctx.topology().will_perform_database_join() {
            ctx.report("skipped: databases are joined manually");
            return Ok(());
        }
        let replica = self.ctx.replica(&self.replica)?;
        self.ctx
            .admin()
            .join_database(replica.connection(), self.ctx.group(), &self.database)
            .map_err(|e| HadrError::admin("Join database", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        single_target(&self.ctx, &self.replica)
    }
}

/// Stores the master-key password as a credential so the replica can open
/// the key after it takes over.
#[derive(Debug)]
pub struct AddDatabaseCredentialTask {
    ctx: ScenarioContext,
    database: String,
    replica: String,
    name: String,
}

impl AddDatabaseCredentialTask {
    /// Creates the credential for `database` on `replica`.
    pub fn new(ctx: ScenarioContext, database: &str, replica: &str) -> Self {
        Self {
            name: format!("Adding credential for the master key of '{database}' on {replica}"),
            ctx,
            database: database.to_string(),
            replica: replica.to_string(),
        }
    }
}

impl Task for AddDatabaseCredentialTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, _ctx: &TaskContext<'_>) -> Result<()> {
        let replica = self.ctx.replica(&self.replica)?;
        let password = self
            .ctx
            .topology()
            .database(&self.database)
            .and_then(|d| d.master_key_password.as_ref())
            .ok_or_else(|| HadrError::CredentialPasswordMissing {
                database: self.database.clone(),
            })?;
        self.ctx
            .admin()
            .add_database_credential(replica.connection(), &self.database, password)
            .map_err(|e| HadrError::admin("Add database credential", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        single_target(&self.ctx, &self.replica)
    }
}

/// Adds the new databases to the group on the primary in one statement.
#[derive(Debug)]
pub struct AddDatabasesToGroupTask {
    ctx: ScenarioContext,
    name: String,
}

impl AddDatabasesToGroupTask {
    /// Takes the database list from the snapshot.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self {
            name: format!("Adding databases to availability group '{}'", ctx.group()),
            ctx,
        }
    }
}

impl Task for AddDatabasesToGroupTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, _ctx: &TaskContext<'_>) -> Result<()> {
        let primary = self.ctx.primary()?;
        let databases: Vec<&str> = self
            .ctx
            .topology()
            .new_databases
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        self.ctx
            .admin()
            .add_databases(primary.connection(), self.ctx.group(), &databases)
            .map_err(|e| HadrError::admin("Add databases", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        self.ctx
            .primary()
            .map(|p| vec![self.ctx.target(p)])
            .unwrap_or_default()
    }
}

/// Lets automatic seeding create databases on a secondary that joined the
/// group earlier.
#[derive(Debug)]
pub struct GrantCreateAnyDatabaseTask {
    ctx: ScenarioContext,
    replica: String,
    name: String,
}

impl GrantCreateAnyDatabaseTask {
    /// Grants the permission on `replica`.
    pub fn new(ctx: ScenarioContext, replica: &str) -> Self {
        Self {
            name: format!(
                "Granting CREATE ANY DATABASE to '{}' on {replica}",
                ctx.group()
            ),
            ctx,
            replica: replica.to_string(),
        }
    }
}

impl Task for GrantCreateAnyDatabaseTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, _ctx: &TaskContext<'_>) -> Result<()> {
        let replica = self.ctx.replica(&self.replica)?;
        self.ctx
            .admin()
            .grant_create_any_database(replica.connection(), self.ctx.group())
            .map_err(|e| HadrError::admin("Grant CREATE ANY DATABASE", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        single_target(&self.ctx, &self.replica)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_backups_use_their_own_file() {
        assert_eq!(backup_file_name("Sales", BackupKind::Full), "Sales.bak");
        assert_eq!(backup_file_name("Sales", BackupKind::Log), "Sales.trn");
    }
}
