use super::{
    constructed, master_keys, push_seeding, replica_validators, HadrPlan, HadrValidators,
    MasterKeys, Seeding,
};
use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use crate::tasks::{AddDatabasesToGroupTask, GrantCreateAnyDatabaseTask, JoinDatabaseTask};
use crate::validators::{
    BackupLocationValidator, CompatibleEncryptionValidator, DatabaseMasterKeyValidator,
    DatabaseSet,
};
use hadr_kernel::provider::{BoxedValidator, ScenarioProvider};
use hadr_model::admin::AdminSurface;
use hadr_model::TopologySnapshot;
use std::sync::Arc;

/// Adds the snapshot's new databases to a running group. The replicas are
/// already joined.
#[derive(Debug)]
pub struct AddDatabaseProvider {
    ctx: ScenarioContext,
    credential_databases: Vec<String>,
    has_master_keys: bool,
}

impl AddDatabaseProvider {
    /// Scenario name shown in progress and reports.
    pub const NAME: &'static str = "Add databases to availability group";

    /// Checks the primary, the backup shares and the master keys of the new databases.
    /// Fails with the first problem found.
    pub fn new(topology: Arc<TopologySnapshot>, admin: Arc<dyn AdminSurface>) -> Result<Self> {
        constructed(Self::NAME, Self::build(ScenarioContext::new(topology, admin)))
    }

    fn build(ctx: ScenarioContext) -> Result<Self> {
        let topology = ctx.topology();
        let primary = ctx.primary()?;
        ctx.check_server(primary)?;
        if topology.new_databases.is_empty() {
            return Err(HadrError::InvalidTopology("no database is marked for addition".into()));
        }
        if topology.will_perform_backup_restore() {
            ctx.check_backup_locations(std::iter::once(primary).chain(topology.data_secondaries()))?;
        }

        let names: Vec<&str> = topology.new_databases.iter().map(|d| d.name.as_str()).collect();
        let MasterKeys {
            credential_databases,
            has_master_keys,
        } = master_keys(&ctx, &names)?;

        Ok(Self {
            credential_databases,
            has_master_keys,
            ctx,
        })
    }

    /// The context shared by the scenario's validators and tasks.
    pub fn context(&self) -> &ScenarioContext {
        &self.ctx
    }
}

impl ScenarioProvider for AddDatabaseProvider {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validators(&self) -> Vec<BoxedValidator<HadrError>> {
        let ctx = &self.ctx;
        let topology = ctx.topology();
        let mut validators: HadrValidators = Vec::new();
        for replica in topology.data_secondaries() {
            validators.extend(replica_validators(ctx, &replica.name, DatabaseSet::New));
        }
        validators.push(Box::new(CompatibleEncryptionValidator::new(ctx.clone())));
        if topology.will_perform_backup_restore() {
            validators.push(Box::new(BackupLocationValidator::new(ctx.clone())));
        }
        if self.has_master_keys {
            validators.push(Box::new(DatabaseMasterKeyValidator::new(ctx.clone(), DatabaseSet::New)));
        }
        validators
    }

    fn plan(&self) -> HadrPlan {
        let ctx = &self.ctx;
        let topology = ctx.topology();
        let mut plan = HadrPlan::new();

        let added = plan.push(
            "add-databases",
            Box::new(AddDatabasesToGroupTask::new(ctx.clone())),
        );
        let secondaries: Vec<String> = topology.data_secondaries().map(|r| r.name.clone()).collect();

        if topology.will_perform_automatic_seeding() {
            for replica in &secondaries {
                let grant = plan.push_after(
                    format!("grant:{replica}"),
                    [added.clone()],
                    Box::new(GrantCreateAnyDatabaseTask::new(ctx.clone(), replica)),
                );
                for database in &topology.new_databases {
                    plan.push_after(
                        format!("join-db:{}:{replica}", database.name),
                        [grant.clone()],
                        Box::new(JoinDatabaseTask::new(ctx.clone(), &database.name, replica)),
                    );
                }
            }
            return plan;
        }

        let gate = [added];
        let join = topology.will_perform_database_join();
        for database in &topology.new_databases {
            let credentials = self
                .credential_databases
                .iter()
                .any(|d| d.eq_ignore_ascii_case(&database.name));
            push_seeding(
                &mut plan,
                ctx,
                &Seeding {
                    database: &database.name,
                    secondaries: &secondaries,
                    joined: &gate,
                    join,
                    credentials,
                    primary_credential: credentials,
                },
            );
        }
        plan
    }
}
