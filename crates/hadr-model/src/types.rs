//! Enumerations shared by the topology and the administration surface.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a replica in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaRole {
    /// Accepts writes.
    Primary,
    /// Receives the log stream.
    Secondary,
}

/// Commit mode of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityMode {
    /// Commits wait for this replica to harden the log.
    #[default]
    SynchronousCommit,
    /// Commits do not wait.
    AsynchronousCommit,
    /// Holds configuration only, never data.
    ConfigurationOnly,
}

impl AvailabilityMode {
    /// Keyword used in T-SQL.
    pub fn keyword(self) -> &'static str {
        match self {
            AvailabilityMode::SynchronousCommit => "SYNCHRONOUS_COMMIT",
            AvailabilityMode::AsynchronousCommit => "ASYNCHRONOUS_COMMIT",
            AvailabilityMode::ConfigurationOnly => "CONFIGURATION_ONLY",
        }
    }
}

/// Who decides to fail over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverMode {
    /// The cluster fails over on its own.
    Automatic,
    /// Failover is requested by an operator.
    #[default]
    Manual,
    /// An external cluster manager decides.
    External,
}

impl FailoverMode {
    /// Keyword used in T-SQL.
    pub fn keyword(self) -> &'static str {
        match self {
            FailoverMode::Automatic => "AUTOMATIC",
            FailoverMode::Manual => "MANUAL",
            FailoverMode::External => "EXTERNAL",
        }
    }
}

/// Whether an object is being created by the scenario or already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    /// Created by the scenario.
    #[default]
    Creating,
    /// Already in place.
    Existing,
}

/// How secondaries get their initial copy of each database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSynchronization {
    /// Full backup and restore through a shared location.
    #[default]
    Full,
    /// Databases were restored on the secondaries already; only join them.
    JoinOnly,
    /// The engine seeds the secondaries itself.
    AutomaticSeeding,
    /// The operator initializes the secondaries.
    Manual,
}

/// Cluster technology under the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    /// Windows Server Failover Cluster.
    #[default]
    Wsfc,
    /// A third-party cluster manager, e.g. Pacemaker.
    External,
    /// No cluster. Failover is manual.
    None,
}

impl ClusterType {
    /// Keyword used in T-SQL.
    pub fn keyword(self) -> &'static str {
        match self {
            ClusterType::Wsfc => "WSFC",
            ClusterType::External => "EXTERNAL",
            ClusterType::None => "NONE",
        }
    }
}

/// Operating system of a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPlatform {
    /// Windows paths and backup locations.
    #[default]
    Windows,
    /// Linux paths and backup locations.
    Linux,
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPlatform::Windows => f.write_str("Windows"),
            HostPlatform::Linux => f.write_str("Linux"),
        }
    }
}

/// Quorum state reported by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterQuorumState {
    /// Regular quorum.
    #[default]
    NormalQuorum,
    /// Quorum forced by an operator.
    ForcedQuorum,
    /// The server could not tell.
    UnknownQuorumState,
    /// The server is not clustered.
    NotApplicable,
}

impl ClusterQuorumState {
    /// Normal or forced quorum.
    pub fn is_in_quorum(self) -> bool {
        !matches!(
            self,
            ClusterQuorumState::UnknownQuorumState | ClusterQuorumState::NotApplicable
        )
    }
}

/// Encryption setting of a mirroring endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointEncryption {
    /// Never encrypt.
    Disabled,
    /// Encrypt when the peer asks for it.
    Supported,
    /// Always encrypt.
    #[default]
    Required,
}

impl EndpointEncryption {
    /// Keyword used in T-SQL.
    pub fn keyword(self) -> &'static str {
        match self {
            EndpointEncryption::Disabled => "DISABLED",
            EndpointEncryption::Supported => "SUPPORTED",
            EndpointEncryption::Required => "REQUIRED",
        }
    }
}

/// Roles a mirroring endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirroringRole {
    /// Partner or witness.
    #[default]
    All,
    /// Data-bearing partner only.
    Partner,
    /// Witness only. Cannot host a replica.
    Witness,
}

impl MirroringRole {
    /// Keyword used in T-SQL.
    pub fn keyword(self) -> &'static str {
        match self {
            MirroringRole::All => "ALL",
            MirroringRole::Partner => "PARTNER",
            MirroringRole::Witness => "WITNESS",
        }
    }
}

/// Connections a secondary accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadableSecondary {
    /// No reads.
    #[default]
    No,
    /// Read-intent connections only.
    ReadIntentOnly,
    /// Any connection.
    All,
}

impl ReadableSecondary {
    /// Keyword used in T-SQL.
    pub fn keyword(self) -> &'static str {
        match self {
            ReadableSecondary::No => "NO",
            ReadableSecondary::ReadIntentOnly => "READ_ONLY",
            ReadableSecondary::All => "ALL",
        }
    }
}
