use super::{constructed, HadrPlan};
use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use crate::tasks::{FailoverTask, WaitForGroupOnlineTask};
use crate::validators::{FailoverTargetValidator, QuorumVoteValidator, TargetSynchronizedValidator};
use hadr_kernel::provider::{BoxedValidator, ScenarioProvider};
use hadr_model::admin::AdminSurface;
use hadr_model::TopologySnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which replica to promote, and whether data loss is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverRequest {
    /// Replica that becomes the primary.
    pub target: String,
    /// Force the failover even if the target is not synchronized.
    #[serde(default)]
    pub allow_data_loss: bool,
}

impl FailoverRequest {
    /// A request that refuses to lose data.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            allow_data_loss: false,
        }
    }

    /// Forces the failover.
    pub fn allowing_data_loss(mut self) -> Self {
        self.allow_data_loss = true;
        self
    }
}

/// Promotes a secondary of an existing group. Construction checks run
/// against the target, which is where the failover is issued.
#[derive(Debug)]
pub struct FailoverProvider {
    ctx: ScenarioContext,
    request: FailoverRequest,
}

impl FailoverProvider {
    /// Scenario name shown in progress and reports.
    pub const NAME: &'static str = "Fail over availability group";

    /// Fails unless the target is a reachable data secondary.
    pub fn new(
        topology: Arc<TopologySnapshot>,
        admin: Arc<dyn AdminSurface>,
        request: FailoverRequest,
    ) -> Result<Self> {
        let ctx = ScenarioContext::new(topology, admin);
        constructed(Self::NAME, Self::build(ctx, request))
    }

    fn build(ctx: ScenarioContext, request: FailoverRequest) -> Result<Self> {
        let target = ctx.replica(&request.target)?;
        if !target.is_data_secondary() {
            return Err(HadrError::InvalidTopology(format!(
                "failover target '{}' is not a data secondary",
                request.target
            )));
        }
        ctx.check_server(target)?;
        Ok(Self { ctx, request })
    }

    /// The request being carried out.
    pub fn request(&self) -> &FailoverRequest {
        &self.request
    }
}

impl ScenarioProvider for FailoverProvider {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validators(&self) -> Vec<BoxedValidator<HadrError>> {
        let target = &self.request.target;
        vec![
            Box::new(FailoverTargetValidator::new(self.ctx.clone(), target)) as BoxedValidator<HadrError>,
            Box::new(TargetSynchronizedValidator::new(
                self.ctx.clone(),
                target,
                self.request.allow_data_loss,
            )),
            Box::new(QuorumVoteValidator::new(self.ctx.clone(), target)),
        ]
    }

    fn plan(&self) -> HadrPlan {
        let target = &self.request.target;
        let mut plan = HadrPlan::new();
        let failover = plan.push(
            format!("failover:{target}"),
            Box::new(FailoverTask::new(
                self.ctx.clone(),
                target,
                self.request.allow_data_loss,
            )),
        );
        plan.push_after(
            format!("wait-online:{target}"),
            [failover],
            Box::new(WaitForGroupOnlineTask::new(self.ctx.clone(), target)),
        );
        plan
    }
}
