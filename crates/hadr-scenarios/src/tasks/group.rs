//! Group-level tasks.

use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use hadr_kernel::policy::ExecutionPolicy;
use hadr_kernel::script::ScriptTarget;
use hadr_kernel::task::{Task, TaskContext};
use hadr_model::{GroupHandle, ReplicaSpec};
use std::sync::Arc;

fn primary_target(ctx: &ScenarioContext) -> Vec<Arc<dyn ScriptTarget>> {
    ctx.primary().map(|p| vec![ctx.target(p)]).unwrap_or_default()
}

/// Creates the group on the primary with every replica of the snapshot.
#[derive(Debug)]
pub struct CreateAvailabilityGroupTask {
    ctx: ScenarioContext,
    name: String,
}

impl CreateAvailabilityGroupTask {
    /// Reads replicas, endpoints and options from the snapshot.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self {
            name: format!("Creating availability group '{}'", ctx.group()),
            ctx,
        }
    }
}

impl Task for CreateAvailabilityGroupTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, _ctx: &TaskContext<'_>) -> Result<()> {
        let primary = self.ctx.primary()?;
        let topology = self.ctx.topology();
        self.ctx
            .admin()
            .create_availability_group(primary.connection(), topology)
            .map_err(|e| HadrError::admin("Create availability group", e))?;

        if primary.connection().is_capturing() {
            return Ok(());
        }
        let handle = GroupHandle {
            name: topology.group_name.clone(),
            primary: primary.name.clone(),
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = topology.record_group_handle(handle) {
            tracing::warn!(group = %topology.group_name, error = %e, "group handle not recorded");
        }
        Ok(())
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        primary_target(&self.ctx)
    }
}

/// Polls the group state on one replica until it reports online. Meant to run
/// under a timeout policy; each attempt that finds the group offline fails
/// and is retried.
#[derive(Debug)]
pub struct WaitForGroupOnlineTask {
    ctx: ScenarioContext,
    replica: String,
    name: String,
}

impl WaitForGroupOnlineTask {
    /// Polls `replica`.
    pub fn new(ctx: ScenarioContext, replica: &str) -> Self {
        Self {
            name: format!("Waiting for availability group '{}' to come online", ctx.group()),
            ctx,
            replica: replica.to_string(),
        }
    }
}

impl Task for WaitForGroupOnlineTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, _ctx: &TaskContext<'_>) -> Result<()> {
        let replica = self.ctx.replica(&self.replica)?;
        let group = self
            .ctx
            .topology()
            .group_handle()
            .map_or(self.ctx.group(), |h| h.name.as_str());
        let state = self
            .ctx
            .admin()
            .group_state(replica.connection(), group)
            .map_err(|e| HadrError::admin("Query availability group", e))?;
        match state {
            Some(state) if state.online => Ok(()),
            _ => Err(HadrError::GroupNotOnline {
                group: group.to_string(),
                server: replica.name.clone(),
            }),
        }
    }
}

/// Adds the snapshot's listener to the group.
#[derive(Debug)]
pub struct CreateListenerTask {
    ctx: ScenarioContext,
    name: String,
}

impl CreateListenerTask {
    /// Takes the listener from the snapshot.
    pub fn new(ctx: ScenarioContext) -> Self {
        let listener = ctx
            .topology()
            .listener
            .as_ref()
            .map_or("", |l| l.name.as_str());
        Self {
            name: format!("Creating availability group listener '{listener}'"),
            ctx,
        }
    }
}

impl Task for CreateListenerTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, _ctx: &TaskContext<'_>) -> Result<()> {
        let primary = self.ctx.primary()?;
        let listener = self
            .ctx
            .topology()
            .listener
            .as_ref()
            .ok_or_else(|| HadrError::InvalidTopology("no listener is configured".into()))?;
        self.ctx
            .admin()
            .create_listener(primary.connection(), self.ctx.group(), listener)
            .map_err(|e| HadrError::admin("Create listener", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        primary_target(&self.ctx)
    }
}

/// Joins every new secondary, configuration-only ones included.
#[derive(Debug)]
pub struct JoinSecondariesTask {
    ctx: ScenarioContext,
    name: String,
}

impl JoinSecondariesTask {
    /// Takes the new secondaries from the snapshot.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self {
            name: format!("Joining secondaries to availability group '{}'", ctx.group()),
            ctx,
        }
    }

    fn secondaries(&self) -> impl Iterator<Item = &ReplicaSpec> {
        self.ctx.topology().new_secondaries()
    }
}

impl Task for JoinSecondariesTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, ctx: &TaskContext<'_>) -> Result<()> {
        let topology = self.ctx.topology();
        for replica in self.secondaries() {
            self.ctx
                .admin()
                .join_group(replica.connection(), topology)
                .map_err(|e| HadrError::admin("Join availability group", e))?;
            ctx.report(format!("{} joined", replica.name));
        }
        Ok(())
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        self.secondaries().map(|r| self.ctx.target(r)).collect()
    }
}

/// Adds the new secondaries to an existing group, issued on the primary.
#[derive(Debug)]
pub struct AddReplicasTask {
    ctx: ScenarioContext,
    name: String,
}

impl AddReplicasTask {
    /// Takes the new secondaries from the snapshot.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self {
            name: format!("Adding replicas to availability group '{}'", ctx.group()),
            ctx,
        }
    }
}

impl Task for AddReplicasTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, _ctx: &TaskContext<'_>) -> Result<()> {
        let primary = self.ctx.primary()?;
        let topology = self.ctx.topology();
        let replicas: Vec<&ReplicaSpec> = topology.new_secondaries().collect();
        self.ctx
            .admin()
            .add_replicas(primary.connection(), topology, &replicas)
            .map_err(|e| HadrError::admin("Add replicas", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        primary_target(&self.ctx)
    }
}

/// Reports cluster members that hold no quorum vote. Informational only.
#[derive(Debug)]
pub struct QuorumVoteTask {
    ctx: ScenarioContext,
}

impl QuorumVoteTask {
    /// Step name shown in progress.
    pub const NAME: &'static str = "Validating WSFC quorum vote configuration";

    /// Checks every replica of the snapshot.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self { ctx }
    }
}

impl Task for QuorumVoteTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, ctx: &TaskContext<'_>) -> Result<()> {
        let primary = self.ctx.primary()?;
        let votes = self
            .ctx
            .admin()
            .quorum_votes(primary.connection())
            .map_err(|e| HadrError::admin("Query quorum votes", e))?;
        for replica in &self.ctx.topology().replicas {
            let has_vote = votes
                .iter()
                .any(|v| v.member.eq_ignore_ascii_case(&replica.name) && v.votes > 0);
            if !has_vote {
                tracing::warn!(replica = %replica.name, "replica node has no quorum vote");
                ctx.report(format!("{} has no quorum vote", replica.name));
            }
        }
        Ok(())
    }
}

/// Issues the failover on the target replica.
#[derive(Debug)]
pub struct FailoverTask {
    ctx: ScenarioContext,
    target: String,
    allow_data_loss: bool,
    name: String,
}

impl FailoverTask {
    /// With `allow_data_loss` the failover is forced.
    pub fn new(ctx: ScenarioContext, target: &str, allow_data_loss: bool) -> Self {
        Self {
            name: format!("Failing over availability group '{}' to {target}", ctx.group()),
            ctx,
            target: target.to_string(),
            allow_data_loss,
        }
    }
}

impl Task for FailoverTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, _ctx: &TaskContext<'_>) -> Result<()> {
        let target = self.ctx.replica(&self.target)?;
        self.ctx
            .admin()
            .failover(target.connection(), self.ctx.group(), self.allow_data_loss)
            .map_err(|e| HadrError::admin("Failover", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        self.ctx
            .replica(&self.target)
            .map(|r| vec![self.ctx.target(r)])
            .unwrap_or_default()
    }
}
