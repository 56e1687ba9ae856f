use super::{
    constructed, master_keys, push_endpoint_setup, push_seeding, replica_validators,
    resolve_logins, HadrPlan, HadrValidators, MasterKeys, ReplicaLogins, Seeding,
};
use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use crate::tasks::{AddReplicasTask, JoinSecondariesTask, StartXeventSessionTask};
use crate::validators::{
    AvailabilityModeValidator, BackupLocationValidator, BasicAvailabilityGroupValidator,
    CompatibleEncryptionValidator, DatabaseMasterKeyValidator, DatabaseSet,
    ListenerConfigurationValidator,
};
use hadr_kernel::plan::StepId;
use hadr_kernel::provider::{BoxedValidator, ScenarioProvider};
use hadr_model::admin::AdminSurface;
use hadr_model::{DataSynchronization, TopologySnapshot};
use std::sync::Arc;

/// Adds the snapshot's `Creating` secondaries to an existing group and copies
/// the group's databases onto them.
#[derive(Debug)]
pub struct AddReplicasProvider {
    ctx: ScenarioContext,
    logins: Vec<ReplicaLogins>,
    credential_databases: Vec<String>,
    has_master_keys: bool,
    check_listener: bool,
}

impl AddReplicasProvider {
    /// Scenario name shown in progress and reports.
    pub const NAME: &'static str = "Add replicas to availability group";

    /// Checks every new secondary and reads the group's databases from the primary.
    pub fn new(topology: Arc<TopologySnapshot>, admin: Arc<dyn AdminSurface>) -> Result<Self> {
        constructed(Self::NAME, Self::build(ScenarioContext::new(topology, admin)))
    }

    fn build(ctx: ScenarioContext) -> Result<Self> {
        let topology = ctx.topology();
        let primary = ctx.primary()?;
        ctx.check_server(primary)?;
        if topology.new_secondaries().next().is_none() {
            return Err(HadrError::InvalidTopology(
                "no secondary replica is marked for creation".into(),
            ));
        }
        if topology.will_perform_backup_restore() {
            let readers = topology.data_secondaries().filter(|r| r.is_new());
            ctx.check_backup_locations(std::iter::once(primary).chain(readers))?;
        }

        let names: Vec<&str> = topology
            .existing_databases
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        let MasterKeys {
            credential_databases,
            has_master_keys,
        } = master_keys(&ctx, &names)?;
        let logins = resolve_logins(&ctx, &topology.replicas);

        Ok(Self {
            logins,
            credential_databases,
            has_master_keys,
            check_listener: true,
            ctx,
        })
    }

    /// Skips the listener warning when `enabled` is false.
    pub fn with_listener_check(mut self, enabled: bool) -> Self {
        self.check_listener = enabled;
        self
    }

    /// The context shared by the scenario's validators and tasks.
    pub fn context(&self) -> &ScenarioContext {
        &self.ctx
    }

    fn new_data_secondaries(&self) -> Vec<String> {
        self.ctx
            .topology()
            .data_secondaries()
            .filter(|r| r.is_new())
            .map(|r| r.name.clone())
            .collect()
    }
}

impl ScenarioProvider for AddReplicasProvider {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validators(&self) -> Vec<BoxedValidator<HadrError>> {
        let ctx = &self.ctx;
        let topology = ctx.topology();
        let mut validators: HadrValidators = Vec::new();
        for replica in self.new_data_secondaries() {
            validators.extend(replica_validators(ctx, &replica, DatabaseSet::Existing));
        }
        validators.push(Box::new(CompatibleEncryptionValidator::new(ctx.clone())));
        if topology.will_perform_backup_restore() {
            validators.push(Box::new(BackupLocationValidator::new(ctx.clone())));
        }
        validators.push(Box::new(AvailabilityModeValidator::new(ctx.clone())));
        if topology.is_basic {
            validators.push(Box::new(BasicAvailabilityGroupValidator::new(ctx.clone())));
        }
        if self.has_master_keys {
            validators.push(Box::new(DatabaseMasterKeyValidator::new(
                ctx.clone(),
                DatabaseSet::Existing,
            )));
        }
        if self.check_listener {
            validators.push(Box::new(ListenerConfigurationValidator::new(ctx.clone())));
        }
        validators
    }

    fn plan(&self) -> HadrPlan {
        let ctx = &self.ctx;
        let topology = ctx.topology();
        let mut plan = HadrPlan::new();

        let mut endpoints: Vec<StepId> = Vec::new();
        for entry in &self.logins {
            endpoints.push(push_endpoint_setup(&mut plan, ctx, entry));
            let is_new = topology.replica(&entry.replica).is_some_and(|r| r.is_new());
            if is_new {
                plan.push(
                    format!("xevent:{}", entry.replica),
                    Box::new(StartXeventSessionTask::new(ctx.clone(), &entry.replica)),
                );
            }
        }

        let added = plan.push_after(
            "add-replicas",
            endpoints,
            Box::new(AddReplicasTask::new(ctx.clone())),
        );
        let joined = plan.push_after(
            "join-secondaries",
            [added],
            Box::new(JoinSecondariesTask::new(ctx.clone())),
        );

        let secondaries = self.new_data_secondaries();
        if secondaries.is_empty() || topology.will_perform_automatic_seeding() {
            return plan;
        }
        let gate = [joined];
        // Restored copies join the group only under join-only synchronization.
        let join = topology.data_sync == DataSynchronization::JoinOnly;
        for database in &topology.existing_databases {
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
                    primary_credential: false,
                },
            );
        }
        plan
    }
}
