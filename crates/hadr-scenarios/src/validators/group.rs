//! Group-level validators.

use super::DatabaseSet;
use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use hadr_kernel::policy::ExecutionPolicy;
use hadr_kernel::validator::{Validator, ValidatorProgress};
use hadr_model::{
    AvailabilityMode, ClusterType, EndpointEncryption, FailoverMode, ReadableSecondary,
    ReplicaSpec,
};

/// Synchronous-commit replicas a group may have.
pub const MAX_SYNCHRONOUS_REPLICAS: usize = 5;
/// Automatic-failover replicas a group may have.
pub const MAX_AUTOMATIC_FAILOVER_REPLICAS: usize = 5;

/// Every secondary's endpoint must agree with the primary's on encryption.
#[derive(Debug)]
pub struct CompatibleEncryptionValidator {
    ctx: ScenarioContext,
}

impl CompatibleEncryptionValidator {
    /// Display name.
    pub const NAME: &'static str = "Checking whether the endpoint is encrypted using a compatible algorithm";

    /// Checks the snapshot's secondaries.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self { ctx }
    }

    /// Live endpoint setting, falling back to what the snapshot asks for.
    fn encryption_of(&self, replica: &ReplicaSpec) -> Result<EndpointEncryption> {
        let live = self
            .ctx
            .admin()
            .endpoint(replica.connection())
            .map_err(|e| HadrError::admin("Query endpoint", e))?;
        Ok(live.map_or(replica.endpoint.encryption, |e| e.encryption))
    }
}

fn compatible(a: EndpointEncryption, b: EndpointEncryption) -> bool {
    !matches!(
        (a, b),
        (EndpointEncryption::Disabled, EndpointEncryption::Required)
            | (EndpointEncryption::Required, EndpointEncryption::Disabled)
    )
}

impl Validator for CompatibleEncryptionValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, _progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        let primary = self.ctx.primary()?;
        let expected = self.encryption_of(primary)?;
        for replica in self.ctx.topology().secondaries() {
            let encryption = self.encryption_of(replica)?;
            if !compatible(expected, encryption) {
                return Err(HadrError::IncompatibleEncryption {
                    replica: replica.name.clone(),
                    encryption,
                    primary: expected,
                });
            }
        }
        Ok(())
    }
}

/// Counts synchronous and automatic-failover replicas and rejects mode
/// combinations the group cannot run with.
#[derive(Debug)]
pub struct AvailabilityModeValidator {
    ctx: ScenarioContext,
}

impl AvailabilityModeValidator {
    /// Display name.
    pub const NAME: &'static str = "Checking replica availability mode";

    /// Checks every replica of the snapshot.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self { ctx }
    }
}

fn incompatible(replica: &ReplicaSpec, reason: impl Into<String>) -> HadrError {
    HadrError::AvailabilityModeIncompatible {
        replica: replica.name.clone(),
        reason: reason.into(),
    }
}

impl Validator for AvailabilityModeValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, _progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        let topology = self.ctx.topology();
        let mut synchronous = 0;
        let mut automatic = 0;

        for replica in &topology.replicas {
            match replica.availability_mode {
                AvailabilityMode::ConfigurationOnly => {
                    if replica.is_primary() {
                        return Err(incompatible(replica, "the primary cannot be configuration-only"));
                    }
                    if topology.cluster_type != ClusterType::External {
                        return Err(incompatible(
                            replica,
                            "configuration-only replicas require an EXTERNAL cluster type",
                        ));
                    }
                    continue;
                }
                AvailabilityMode::SynchronousCommit => synchronous += 1,
                AvailabilityMode::AsynchronousCommit => {
                    if replica.failover_mode == FailoverMode::Automatic {
                        return Err(incompatible(
                            replica,
                            "automatic failover requires synchronous commit",
                        ));
                    }
                }
            }
            if replica.failover_mode == FailoverMode::Automatic {
                automatic += 1;
            }
            if synchronous > MAX_SYNCHRONOUS_REPLICAS {
                return Err(incompatible(
                    replica,
                    format!("at most {MAX_SYNCHRONOUS_REPLICAS} replicas can use synchronous commit"),
                ));
            }
            if automatic > MAX_AUTOMATIC_FAILOVER_REPLICAS {
                return Err(incompatible(
                    replica,
                    format!("at most {MAX_AUTOMATIC_FAILOVER_REPLICAS} replicas can fail over automatically"),
                ));
            }
        }

        let required = topology.required_synchronized_secondaries_to_commit as usize;
        let synchronous_secondaries = topology
            .data_secondaries()
            .filter(|r| r.availability_mode == AvailabilityMode::SynchronousCommit)
            .count();
        if required > synchronous_secondaries {
            let primary = self.ctx.primary()?;
            return Err(incompatible(
                primary,
                format!(
                    "{required} synchronized secondaries are required to commit but only {synchronous_secondaries} use synchronous commit"
                ),
            ));
        }
        Ok(())
    }
}

/// Basic groups take two replicas, one database and no readable secondary.
#[derive(Debug)]
pub struct BasicAvailabilityGroupValidator {
    ctx: ScenarioContext,
}

impl BasicAvailabilityGroupValidator {
    /// Display name.
    pub const NAME: &'static str = "Checking basic availability group limits";

    /// Checks the snapshot's replicas and databases.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self { ctx }
    }
}

impl Validator for BasicAvailabilityGroupValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, _progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        let topology = self.ctx.topology();
        let limit = |reason: &str| HadrError::BasicGroupLimit {
            group: topology.group_name.clone(),
            reason: reason.to_string(),
        };

        if topology.replicas.len() > 2 {
            return Err(limit("a basic group has one primary and one secondary replica"));
        }
        if topology.new_databases.len() + topology.existing_databases.len() > 1 {
            return Err(limit("a basic group contains a single database"));
        }
        if topology
            .replicas
            .iter()
            .any(|r| r.readable_secondary != ReadableSecondary::No)
        {
            return Err(limit("secondaries of a basic group are not readable"));
        }
        Ok(())
    }
}

/// Master-key encrypted databases need their password to be opened on the
/// secondaries.
#[derive(Debug)]
pub struct DatabaseMasterKeyValidator {
    ctx: ScenarioContext,
    databases: DatabaseSet,
}

impl DatabaseMasterKeyValidator {
    /// Display name.
    pub const NAME: &'static str = "Checking password of the database master key";

    /// `databases` selects which set to check.
    pub fn new(ctx: ScenarioContext, databases: DatabaseSet) -> Self {
        Self { ctx, databases }
    }
}

impl Validator for DatabaseMasterKeyValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, _progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        let names = self.databases.names(self.ctx.topology());
        let missing: Vec<String> = self
            .ctx
            .master_key_databases(names.iter().map(String::as_str))?
            .into_iter()
            .filter(|name| {
                self.ctx
                    .topology()
                    .database(name)
                    .is_some_and(|d| d.master_key_password.is_none())
            })
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HadrError::MasterKeyPasswordMissing { databases: missing })
        }
    }
}

/// Reports every problem of the snapshot's listener. Without a listener the
/// result is a warning.
#[derive(Debug)]
pub struct ListenerConfigurationValidator {
    ctx: ScenarioContext,
}

impl ListenerConfigurationValidator {
    /// Display name.
    pub const NAME: &'static str = "Checking the listener configuration";

    /// Checks the snapshot's listener.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self { ctx }
    }
}

impl Validator for ListenerConfigurationValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, _progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        let topology = self.ctx.topology();
        let Some(listener) = &topology.listener else {
            return Err(HadrError::ListenerNotConfigured {
                group: topology.group_name.clone(),
            });
        };
        let problems = listener.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(HadrError::InvalidListener {
                listener: listener.name.clone(),
                problems,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_disabled_and_required_clash() {
        use EndpointEncryption::{Disabled, Required, Supported};
        assert!(!compatible(Disabled, Required));
        assert!(!compatible(Required, Disabled));
        assert!(compatible(Supported, Required));
        assert!(compatible(Disabled, Supported));
        assert!(compatible(Required, Required));
    }
}
