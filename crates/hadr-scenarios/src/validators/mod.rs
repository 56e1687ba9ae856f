//! Pre-flight validators
//!
//! Every validator expires its policy before checking anything, so a failed
//! check propagates on the first attempt.

mod backup_location;
mod failover;
mod group;
mod replica;

pub use backup_location::BackupLocationValidator;
pub use failover::{FailoverTargetValidator, QuorumVoteValidator, TargetSynchronizedValidator};
pub use group::{
    AvailabilityModeValidator, BasicAvailabilityGroupValidator, CompatibleEncryptionValidator,
    DatabaseMasterKeyValidator, ListenerConfigurationValidator,
};
pub use replica::{
    DatabaseExistenceValidator, DatabaseFileCompatibilityValidator,
    DatabaseFileExistenceValidator, FreeDiskSpaceValidator,
};

use hadr_model::TopologySnapshot;

/// Which databases of the snapshot a validator looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseSet {
    /// Databases being added to the group.
    New,
    /// Databases already in the group, copied to new replicas.
    Existing,
}

impl DatabaseSet {
    /// Names of the databases in the set, in snapshot order.
    pub fn names(self, topology: &TopologySnapshot) -> Vec<String> {
        let databases = match self {
            DatabaseSet::New => &topology.new_databases,
            DatabaseSet::Existing => &topology.existing_databases,
        };
        databases.iter().map(|d| d.name.clone()).collect()
    }
}

pub(crate) const SKIPPED: &str = "Skipped";
