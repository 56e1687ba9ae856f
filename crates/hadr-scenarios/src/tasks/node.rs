//! Per-node preparation: logins, the mirroring endpoint and the health
//! session.

use super::HEALTH_SESSION;
use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use hadr_kernel::policy::ExecutionPolicy;
use hadr_kernel::script::ScriptTarget;
use hadr_kernel::task::{Task, TaskContext};
use hadr_model::admin::EndpointDefinition;
use hadr_model::{AvailabilityMode, MirroringRole, ReplicaSpec};
use std::sync::Arc;

/// Creates the Windows logins a replica's endpoint grants need.
#[derive(Debug)]
pub struct CreateLoginsTask {
    ctx: ScenarioContext,
    replica: String,
    logins: Vec<String>,
    name: String,
}

impl CreateLoginsTask {
    /// `logins` are the accounts that do not map to a login on `replica` yet.
    pub fn new(ctx: ScenarioContext, replica: &str, logins: Vec<String>) -> Self {
        Self {
            name: format!("Creating logins on {replica}"),
            ctx,
            replica: replica.to_string(),
            logins,
        }
    }

    /// Logins the task creates when missing.
    pub fn logins(&self) -> &[String] {
        &self.logins
    }
}

impl Task for CreateLoginsTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, ctx: &TaskContext<'_>) -> Result<()> {
        let replica = self.ctx.replica(&self.replica)?;
        let admin = self.ctx.admin();
        for login in &self.logins {
            let exists = admin
                .login_exists(replica.connection(), login)
                .map_err(|e| HadrError::admin("Query logins", e))?;
            if exists {
                ctx.report(format!("login {login} already exists"));
                continue;
            }
            admin
                .create_login(replica.connection(), login)
                .map_err(|e| HadrError::admin("Create login", e))?;
        }
        Ok(())
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        self.ctx
            .replica(&self.replica)
            .map(|r| vec![self.ctx.target(r)])
            .unwrap_or_default()
    }
}

/// Creates or repairs the mirroring endpoint of a replica and grants the
/// other replicas' service accounts CONNECT on it.
#[derive(Debug)]
pub struct ConfigureEndpointsTask {
    ctx: ScenarioContext,
    replica: String,
    logins: Vec<String>,
    name: String,
}

impl ConfigureEndpointsTask {
    /// `logins` are granted CONNECT on the endpoint.
    pub fn new(ctx: ScenarioContext, replica: &str, logins: Vec<String>) -> Self {
        Self {
            name: format!("Configuring endpoints on {replica}"),
            ctx,
            replica: replica.to_string(),
            logins,
        }
    }

    /// Returns the name of the endpoint that now serves the replica.
    fn ensure_endpoint(&self, replica: &ReplicaSpec, ctx: &TaskContext<'_>) -> Result<String> {
        let admin = self.ctx.admin();
        let node = replica.connection();
        let live = admin
            .endpoint(node)
            .map_err(|e| HadrError::admin("Query endpoint", e))?;

        if !replica.is_new() || !replica.endpoint.can_be_configured {
            ctx.report("endpoint left unchanged");
            return Ok(live.map_or_else(|| replica.endpoint.name.clone(), |e| e.name));
        }

        if let Some(endpoint) = live {
            let configuration_only = replica.availability_mode == AvailabilityMode::ConfigurationOnly;
            if endpoint.role == MirroringRole::Witness && !configuration_only {
                admin
                    .alter_endpoint_role(node, &endpoint.name, MirroringRole::All)
                    .map_err(|e| HadrError::admin("Alter endpoint", e))?;
            }
            if !endpoint.started {
                admin
                    .start_endpoint(node, &endpoint.name)
                    .map_err(|e| HadrError::admin("Start endpoint", e))?;
            }
            return Ok(endpoint.name);
        }

        let definition = EndpointDefinition::for_replica(replica);
        admin
            .create_endpoint(node, &definition)
            .map_err(|e| HadrError::admin("Create endpoint", e))?;
        if let Err(start) = admin.start_endpoint(node, &definition.name) {
            if let Err(drop) = admin.drop_endpoint(node, &definition.name) {
                tracing::warn!(replica = %replica.name, error = %drop, "failed to drop endpoint that did not start");
            }
            return Err(HadrError::admin("Start endpoint", start));
        }
        Ok(definition.name)
    }
}

impl Task for ConfigureEndpointsTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, ctx: &TaskContext<'_>) -> Result<()> {
        let replica = self.ctx.replica(&self.replica)?;
        let endpoint = self.ensure_endpoint(replica, ctx)?;
        for login in &self.logins {
            self.ctx
                .admin()
                .grant_connect(replica.connection(), &endpoint, login)
                .map_err(|e| HadrError::admin("Grant endpoint connect", e))?;
        }
        Ok(())
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        self.ctx
            .replica(&self.replica)
            .map(|r| vec![self.ctx.target(r)])
            .unwrap_or_default()
    }
}

/// Starts the health session and marks it to start with the server.
#[derive(Debug)]
pub struct StartXeventSessionTask {
    ctx: ScenarioContext,
    replica: String,
    name: String,
}

impl StartXeventSessionTask {
    /// Starts the session on `replica`.
    pub fn new(ctx: ScenarioContext, replica: &str) -> Self {
        Self {
            name: format!("Starting the '{HEALTH_SESSION}' extended events session on {replica}"),
            ctx,
            replica: replica.to_string(),
        }
    }
}

impl Task for StartXeventSessionTask {
    type Error = HadrError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(&self, _policy: &mut dyn ExecutionPolicy, _ctx: &TaskContext<'_>) -> Result<()> {
        let replica = self.ctx.replica(&self.replica)?;
        self.ctx
            .admin()
            .start_xevent_session(replica.connection(), HEALTH_SESSION)
            .map_err(|e| HadrError::admin("Start extended events session", e))
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        self.ctx
            .replica(&self.replica)
            .map(|r| vec![self.ctx.target(r)])
            .unwrap_or_default()
    }
}
