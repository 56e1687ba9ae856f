use super::{
    constructed, master_keys, push_endpoint_setup, push_seeding, replica_validators,
    resolve_logins, HadrPlan, HadrValidators, MasterKeys, ReplicaLogins, Seeding,
};
use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use crate::tasks::{
    CreateAvailabilityGroupTask, CreateListenerTask, JoinSecondariesTask, QuorumVoteTask,
    StartXeventSessionTask, WaitForGroupOnlineTask,
};
use crate::validators::{
    AvailabilityModeValidator, BackupLocationValidator, BasicAvailabilityGroupValidator,
    CompatibleEncryptionValidator, DatabaseMasterKeyValidator, DatabaseSet,
    ListenerConfigurationValidator,
};
use hadr_kernel::plan::StepId;
use hadr_kernel::provider::{BoxedValidator, ScenarioProvider};
use hadr_model::admin::AdminSurface;
use hadr_model::{ClusterType, TopologySnapshot};
use std::sync::Arc;

/// Creates a new availability group from the snapshot: prepares every
/// replica, creates and joins the group, then initializes the new databases
/// on the data secondaries.
#[derive(Debug)]
pub struct CreateAvailabilityGroupProvider {
    ctx: ScenarioContext,
    logins: Vec<ReplicaLogins>,
    credential_databases: Vec<String>,
    has_master_keys: bool,
    check_listener: bool,
}

impl CreateAvailabilityGroupProvider {
    /// Scenario name shown in progress and reports.
    pub const NAME: &'static str = "Create availability group";

    /// Checks every replica and the backup shares before anything is planned.
    pub fn new(topology: Arc<TopologySnapshot>, admin: Arc<dyn AdminSurface>) -> Result<Self> {
        constructed(Self::NAME, Self::build(ScenarioContext::new(topology, admin)))
    }

    fn build(ctx: ScenarioContext) -> Result<Self> {
        let topology = ctx.topology();
        let primary = ctx.primary()?;
        ctx.check_server(primary)?;
        if topology.will_perform_backup_restore() {
            ctx.check_backup_locations(std::iter::once(primary).chain(topology.data_secondaries()))?;
        }

        let names: Vec<&str> = topology.new_databases.iter().map(|d| d.name.as_str()).collect();
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

    /// Leave out the listener check. Without it a missing listener is not
    /// reported at all.
    pub fn with_listener_check(mut self, enabled: bool) -> Self {
        self.check_listener = enabled;
        self
    }

    /// The context shared by the scenario's validators and tasks.
    pub fn context(&self) -> &ScenarioContext {
        &self.ctx
    }

    fn needs_credential(&self, database: &str) -> bool {
        self.credential_databases
            .iter()
            .any(|d| d.eq_ignore_ascii_case(database))
    }
}

impl ScenarioProvider for CreateAvailabilityGroupProvider {
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
        validators.push(Box::new(AvailabilityModeValidator::new(ctx.clone())));
        if self.has_master_keys {
            validators.push(Box::new(DatabaseMasterKeyValidator::new(ctx.clone(), DatabaseSet::New)));
        }
        if topology.is_basic {
            validators.push(Box::new(BasicAvailabilityGroupValidator::new(ctx.clone())));
        }
        if self.check_listener {
            validators.push(Box::new(ListenerConfigurationValidator::new(ctx.clone())));
        }
        validators
    }

    fn plan(&self) -> HadrPlan {
        let ctx = &self.ctx;
        let topology = ctx.topology();
        let mut plan: HadrPlan = HadrPlan::new();

        let mut endpoints: Vec<StepId> = Vec::new();
        for entry in &self.logins {
            endpoints.push(push_endpoint_setup(&mut plan, ctx, entry));
            plan.push(
                format!("xevent:{}", entry.replica),
                Box::new(StartXeventSessionTask::new(ctx.clone(), &entry.replica)),
            );
        }

        let create = plan.push_after(
            "create-group",
            endpoints,
            Box::new(CreateAvailabilityGroupTask::new(ctx.clone())),
        );
        let primary = ctx.primary().map(|p| p.name.clone()).unwrap_or_default();
        let online = plan.push_after(
            "wait-online",
            [create],
            Box::new(WaitForGroupOnlineTask::new(ctx.clone(), &primary)),
        );
        if topology.listener.is_some() {
            plan.push_after(
                "listener",
                [online.clone()],
                Box::new(CreateListenerTask::new(ctx.clone())),
            );
        }
        let joined = plan.push_after(
            "join-secondaries",
            [online],
            Box::new(JoinSecondariesTask::new(ctx.clone())),
        );
        if topology.cluster_type == ClusterType::Wsfc {
            plan.push_after(
                "quorum",
                [joined.clone()],
                Box::new(QuorumVoteTask::new(ctx.clone())),
            );
        }

        let secondaries: Vec<String> = topology.data_secondaries().map(|r| r.name.clone()).collect();
        if secondaries.is_empty() || topology.will_perform_automatic_seeding() {
            return plan;
        }
        let gate = [joined];
        for database in topology.contained_system_databases() {
            push_seeding(
                &mut plan,
                ctx,
                &Seeding {
                    database: &database,
                    secondaries: &secondaries,
                    joined: &gate,
                    join: true,
                    credentials: false,
                    primary_credential: false,
                },
            );
        }
        for database in &topology.new_databases {
            let credentials = self.needs_credential(&database.name);
            push_seeding(
                &mut plan,
                ctx,
                &Seeding {
                    database: &database.name,
                    secondaries: &secondaries,
                    joined: &gate,
                    join: true,
                    credentials,
                    primary_credential: credentials,
                },
            );
        }
        plan
    }
}
