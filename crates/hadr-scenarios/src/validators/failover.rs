//! Checks on the replica a failover promotes.

use super::SKIPPED;
use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use hadr_kernel::policy::ExecutionPolicy;
use hadr_kernel::validator::{Validator, ValidatorProgress};
use hadr_model::admin::ReplicaState;
use hadr_model::ClusterType;

fn target_state(ctx: &ScenarioContext, target: &str) -> Result<ReplicaState> {
    let replica = ctx.replica(target)?;
    let invalid = |reason: &str| HadrError::FailoverTargetInvalid {
        replica: target.to_string(),
        group: ctx.group().to_string(),
        reason: reason.to_string(),
    };
    let group = ctx
        .admin()
        .group_state(replica.connection(), ctx.group())
        .map_err(|e| HadrError::admin("Query availability group", e))?
        .ok_or_else(|| invalid("the availability group does not exist"))?;
    group
        .replica(target)
        .cloned()
        .ok_or_else(|| invalid("it is not a replica of the group"))
}

/// The target must be a secondary of the running group.
#[derive(Debug)]
pub struct FailoverTargetValidator {
    ctx: ScenarioContext,
    target: String,
    name: String,
}

impl FailoverTargetValidator {
    /// `target` names the replica to promote.
    pub fn new(ctx: ScenarioContext, target: &str) -> Self {
        Self {
            name: format!("Checking whether {target} can become the primary replica"),
            ctx,
            target: target.to_string(),
        }
    }
}

impl Validator for FailoverTargetValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, _progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        let state = target_state(&self.ctx, &self.target)?;
        let reason = if state.is_primary {
            "it is already the primary replica"
        } else if !state.joined {
            "it has not joined the group"
        } else {
            return Ok(());
        };
        Err(HadrError::FailoverTargetInvalid {
            replica: self.target.clone(),
            group: self.ctx.group().to_string(),
            reason: reason.to_string(),
        })
    }
}

/// Without data loss allowed, the target must be synchronized.
#[derive(Debug)]
pub struct TargetSynchronizedValidator {
    ctx: ScenarioContext,
    target: String,
    allow_data_loss: bool,
    name: String,
}

impl TargetSynchronizedValidator {
    /// Passes without checking when `allow_data_loss` is set.
    pub fn new(ctx: ScenarioContext, target: &str, allow_data_loss: bool) -> Self {
        Self {
            name: format!("Checking whether {target} is synchronized"),
            ctx,
            target: target.to_string(),
            allow_data_loss,
        }
    }
}

impl Validator for TargetSynchronizedValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        if self.allow_data_loss {
            progress.report("data loss is allowed", SKIPPED);
            return Ok(());
        }
        let state = target_state(&self.ctx, &self.target)?;
        if state.synchronized {
            Ok(())
        } else {
            Err(HadrError::FailoverTargetNotSynchronized {
                replica: self.target.clone(),
            })
        }
    }
}

/// A WSFC node without a vote cannot keep the group online after it takes
/// over.
#[derive(Debug)]
pub struct QuorumVoteValidator {
    ctx: ScenarioContext,
    target: String,
}

impl QuorumVoteValidator {
    /// Display name.
    pub const NAME: &'static str = "Checking the quorum vote configuration of the failover target";

    /// `target` names the replica to promote.
    pub fn new(ctx: ScenarioContext, target: &str) -> Self {
        Self {
            ctx,
            target: target.to_string(),
        }
    }
}

impl Validator for QuorumVoteValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        if self.ctx.topology().cluster_type != ClusterType::Wsfc {
            progress.report("the group is not hosted by a Windows cluster", SKIPPED);
            return Ok(());
        }
        let replica = self.ctx.replica(&self.target)?;
        let votes: u32 = self
            .ctx
            .admin()
            .quorum_votes(replica.connection())
            .map_err(|e| HadrError::admin("Query quorum votes", e))?
            .iter()
            .filter(|v| v.member.eq_ignore_ascii_case(&self.target))
            .map(|v| v.votes)
            .sum();
        if votes > 0 {
            Ok(())
        } else {
            Err(HadrError::FailoverTargetNoQuorumVote {
                replica: self.target.clone(),
            })
        }
    }
}
