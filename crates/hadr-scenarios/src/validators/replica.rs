//! Checks run once per secondary that will receive data.

use super::{DatabaseSet, SKIPPED};
use crate::context::{place_files, ScenarioContext};
use crate::error::{HadrError, Result};
use hadr_kernel::policy::ExecutionPolicy;
use hadr_kernel::validator::{Validator, ValidatorProgress};
use hadr_model::admin::{DatabaseInfo, FileKind};
use hadr_model::DataSynchronization;

/// Databases of `set` as the primary sees them, skipping any the primary
/// does not have.
fn primary_databases(ctx: &ScenarioContext, set: DatabaseSet) -> Result<Vec<DatabaseInfo>> {
    let mut found = Vec::new();
    for name in set.names(ctx.topology()) {
        if let Some(info) = ctx.primary_database(&name)? {
            found.push(info);
        }
    }
    Ok(found)
}

/// The restored files must fit in each target directory of a secondary.
#[derive(Debug)]
pub struct FreeDiskSpaceValidator {
    ctx: ScenarioContext,
    replica: String,
    databases: DatabaseSet,
    name: String,
}

impl FreeDiskSpaceValidator {
    /// Checks `replica` for the databases in `databases`.
    pub fn new(ctx: ScenarioContext, replica: &str, databases: DatabaseSet) -> Self {
        Self {
            ctx,
            replica: replica.to_string(),
            databases,
            name: format!(
                "Checking for free disk space on the server instance that hosts secondary replica {replica}"
            ),
        }
    }

    fn check(&self, path: &str, required_kb: u64) -> Result<()> {
        let replica = self.ctx.replica(&self.replica)?;
        let available_kb = self
            .ctx
            .admin()
            .free_space_kb(replica.connection(), path)
            .map_err(|e| HadrError::admin("Query free disk space", e))?;
        if available_kb < required_kb {
            return Err(HadrError::InsufficientFreeSpace {
                replica: self.replica.clone(),
                path: path.to_string(),
                required_kb,
                available_kb,
            });
        }
        Ok(())
    }
}

impl Validator for FreeDiskSpaceValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        if !self.ctx.topology().will_perform_database_initialization() {
            progress.report("no data is copied to the secondaries", SKIPPED);
            return Ok(());
        }

        let replica = self.ctx.replica(&self.replica)?;
        let server = self.ctx.server_info(replica)?;
        let databases = primary_databases(&self.ctx, self.databases)?;
        let data_kb: u64 = databases.iter().map(|d| d.size_kb(FileKind::Data)).sum();
        let log_kb: u64 = databases.iter().map(|d| d.size_kb(FileKind::Log)).sum();

        if server.default_data_path == server.default_log_path {
            self.check(&server.default_data_path, data_kb + log_kb)
        } else {
            self.check(&server.default_data_path, data_kb)?;
            self.check(&server.default_log_path, log_kb)
        }
    }
}

/// No database being copied may already exist on the secondary.
#[derive(Debug)]
pub struct DatabaseExistenceValidator {
    ctx: ScenarioContext,
    replica: String,
    databases: DatabaseSet,
    name: String,
}

impl DatabaseExistenceValidator {
    /// Checks `replica` for the databases in `databases`.
    pub fn new(ctx: ScenarioContext, replica: &str, databases: DatabaseSet) -> Self {
        Self {
            ctx,
            replica: replica.to_string(),
            databases,
            name: format!(
                "Checking if the selected databases already exist on secondary replica {replica}"
            ),
        }
    }
}

impl Validator for DatabaseExistenceValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        let data_sync = self.ctx.topology().data_sync;
        if data_sync == DataSynchronization::Manual {
            progress.report("databases are initialized manually", SKIPPED);
            return Ok(());
        }

        let replica = self.ctx.replica(&self.replica)?;
        let mut conflicts = Vec::new();
        for name in self.databases.names(self.ctx.topology()) {
            let existing = self
                .ctx
                .admin()
                .database(replica.connection(), &name)
                .map_err(|e| HadrError::admin("Query databases", e))?;
            // Join-only expects restoring copies on the secondary.
            let conflicting = match existing {
                Some(info) => !(data_sync == DataSynchronization::JoinOnly && info.restoring),
                None => false,
            };
            if conflicting {
                conflicts.push(name);
            }
        }

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(HadrError::DatabaseAlreadyExists {
                replica: self.replica.clone(),
                databases: conflicts,
            })
        }
    }
}

/// No restore target file may already exist on the secondary.
#[derive(Debug)]
pub struct DatabaseFileExistenceValidator {
    ctx: ScenarioContext,
    replica: String,
    databases: DatabaseSet,
    name: String,
}

impl DatabaseFileExistenceValidator {
    /// Checks `replica` for the databases in `databases`.
    pub fn new(ctx: ScenarioContext, replica: &str, databases: DatabaseSet) -> Self {
        Self {
            ctx,
            replica: replica.to_string(),
            databases,
            name: format!(
                "Checking for the existence of the database files on the server instance that hosts secondary replica {replica}"
            ),
        }
    }
}

impl Validator for DatabaseFileExistenceValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        if !self.ctx.topology().will_perform_database_initialization() {
            progress.report("no database files are created on the secondaries", SKIPPED);
            return Ok(());
        }

        let primary = self.ctx.primary()?;
        let replica = self.ctx.replica(&self.replica)?;
        let server = self.ctx.server_info(replica)?;
        let mut conflicts = Vec::new();
        for database in primary_databases(&self.ctx, self.databases)? {
            for placement in place_files(&database.files, primary.platform, &server) {
                let exists = self
                    .ctx
                    .admin()
                    .file_exists(replica.connection(), &placement.target)
                    .map_err(|e| HadrError::admin("Query database files", e))?;
                if exists {
                    conflicts.push(placement.target);
                }
            }
        }

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(HadrError::DatabaseFileAlreadyExists {
                replica: self.replica.clone(),
                files: conflicts,
            })
        }
    }
}

/// Same-platform secondaries keep the primary's file paths, so every
/// directory the primary uses must exist there too.
#[derive(Debug)]
pub struct DatabaseFileCompatibilityValidator {
    ctx: ScenarioContext,
    replica: String,
    databases: DatabaseSet,
    name: String,
}

impl DatabaseFileCompatibilityValidator {
    /// Checks `replica` for the databases in `databases`.
    pub fn new(ctx: ScenarioContext, replica: &str, databases: DatabaseSet) -> Self {
        Self {
            ctx,
            replica: replica.to_string(),
            databases,
            name: format!(
                "Checking for compatibility of the database file locations on the server instance that hosts replica {replica}"
            ),
        }
    }
}

impl Validator for DatabaseFileCompatibilityValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        if !self.ctx.topology().will_perform_database_initialization() {
            progress.report("no database files are created on the secondaries", SKIPPED);
            return Ok(());
        }

        let primary = self.ctx.primary()?;
        let replica = self.ctx.replica(&self.replica)?;
        let server = self.ctx.server_info(replica)?;
        let mut missing: Vec<String> = Vec::new();
        for database in primary_databases(&self.ctx, self.databases)? {
            for placement in place_files(&database.files, primary.platform, &server) {
                if placement.relocated {
                    continue;
                }
                let directory = placement.file.directory().to_string();
                if missing.contains(&directory) {
                    continue;
                }
                let exists = self
                    .ctx
                    .admin()
                    .directory_exists(replica.connection(), &directory)
                    .map_err(|e| HadrError::admin("Query folders", e))?;
                if !exists {
                    missing.push(directory);
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HadrError::DatabaseFileIncompatible {
                replica: self.replica.clone(),
                directories: missing,
            })
        }
    }
}
