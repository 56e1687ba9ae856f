//! Error types for availability-group scenarios
//!
//! One enum for every validator, task and provider so that they can share a
//! plan. Each variant names the server, replica or database it concerns;
//! administrative failures keep the underlying [`AdminError`] as the source.

use hadr_kernel::{Cancelled, Classified, ErrorCategory};
use hadr_model::admin::AdminError;
use hadr_model::{ClusterQuorumState, EndpointEncryption};

/// Every way a scenario can fail or warn.
#[derive(Debug, thiserror::Error)]
pub enum HadrError {
    // Raised by provider constructors
    /// The availability-groups feature is off on the server.
    #[error("HADR is not enabled on server instance {server}")]
    HadrNotEnabled {
        /// Replica name of the server.
        server: String,
    },

    /// The login cannot read server state.
    #[error("the caller does not have VIEW SERVER STATE permission on {server}")]
    ViewServerStateDenied {
        /// Replica name of the server.
        server: String,
    },

    /// The node is not a voting member of a quorum-holding cluster.
    #[error("{server} is not part of the cluster quorum (state: {state:?})")]
    NotInQuorum {
        /// Replica name of the server.
        server: String,
        /// The state the node reported.
        state: ClusterQuorumState,
    },

    /// Seeding through backups needs a share for every platform in use.
    #[error("no backup location is configured for {platform} replicas of availability group '{group}'")]
    BackupLocationMissing {
        /// Availability group name.
        group: String,
        /// Platform lacking a location.
        platform: String,
    },

    /// The snapshot contradicts itself.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Server facts could not be read.
    #[error("cannot inspect {server}")]
    ServerUnavailable {
        /// Replica name of the server.
        server: String,
        /// What the admin surface reported.
        #[source]
        source: AdminError,
    },

    // Raised by validators
    /// The copies would not fit on the secondary.
    #[error(
        "not enough free disk space on replica {replica}: {required_kb} KB required, {available_kb} KB available in {path}"
    )]
    InsufficientFreeSpace {
        /// Secondary replica name.
        replica: String,
        /// Directory checked.
        path: String,
        /// Space the restored files need.
        required_kb: u64,
        /// Free space in `path`.
        available_kb: u64,
    },

    /// A database with the same name is already on the secondary.
    #[error("database(s) {} already exist on replica {replica}", .databases.join(", "))]
    DatabaseAlreadyExists {
        /// Secondary replica name.
        replica: String,
        /// Conflicting database names.
        databases: Vec<String>,
    },

    /// A restore target path is taken.
    #[error("database file(s) {} already exist on replica {replica}", .files.join(", "))]
    DatabaseFileAlreadyExists {
        /// Secondary replica name.
        replica: String,
        /// Conflicting file paths.
        files: Vec<String>,
    },

    /// A restore target directory is missing.
    #[error("folder(s) {} do not exist on replica {replica}", .directories.join(", "))]
    DatabaseFileIncompatible {
        /// Secondary replica name.
        replica: String,
        /// Missing directories.
        directories: Vec<String>,
    },

    /// The mirroring endpoints cannot negotiate encryption.
    #[error(
        "endpoint encryption on replica {replica} ({encryption:?}) is incompatible with the primary ({primary:?})"
    )]
    IncompatibleEncryption {
        /// Secondary replica name.
        replica: String,
        /// Setting of the secondary's endpoint.
        encryption: EndpointEncryption,
        /// Setting of the primary's endpoint.
        primary: EndpointEncryption,
    },

    /// The primary could not write a test file to the share.
    #[error("primary {server} cannot write to the backup location {location}")]
    PrimaryCannotWriteToLocation {
        /// Primary replica name.
        server: String,
        /// The share path.
        location: String,
        /// The failed write.
        #[source]
        source: AdminError,
    },

    /// A secondary cannot see the primary's backups.
    #[error("replica {replica} cannot read the backup location {location}: {reason}")]
    SecondaryCannotReadLocation {
        /// Secondary replica name.
        replica: String,
        /// The share path.
        location: String,
        /// Why the share is unreadable.
        reason: String,
        /// The failed read, when the surface raised one.
        #[source]
        source: Option<AdminError>,
    },

    /// Too many synchronous or automatic-failover replicas, or a mode the
    /// platform does not allow.
    #[error("availability mode of replica {replica} is not supported: {reason}")]
    AvailabilityModeIncompatible {
        /// Offending replica name.
        replica: String,
        /// Which limit was hit.
        reason: String,
    },

    /// Basic groups allow two replicas and one database.
    #[error("basic availability group '{group}' exceeds its limits: {reason}")]
    BasicGroupLimit {
        /// Availability group name.
        group: String,
        /// Which limit was hit.
        reason: String,
    },

    /// Master-key databases need a password to be copied.
    #[error("the password of the database master key is required for database(s) {}", .databases.join(", "))]
    MasterKeyPasswordMissing {
        /// Databases with a master key and no password.
        databases: Vec<String>,
    },

    /// Listener address or port is unusable.
    #[error("listener '{listener}' is invalid: {}", .problems.join("; "))]
    InvalidListener {
        /// Listener DNS name.
        listener: String,
        /// Every problem found.
        problems: Vec<String>,
    },

    /// The requested target cannot take over the group.
    #[error("replica {replica} cannot become the primary of '{group}': {reason}")]
    FailoverTargetInvalid {
        /// Requested target.
        replica: String,
        /// Availability group name.
        group: String,
        /// Why the target was refused.
        reason: String,
    },

    /// Failover without data loss needs a synchronized target.
    #[error("replica {replica} is not synchronized; failing over would lose data")]
    FailoverTargetNotSynchronized {
        /// Requested target.
        replica: String,
    },

    /// The target node has no cluster vote.
    #[error("replica {replica} has no quorum vote")]
    FailoverTargetNoQuorumVote {
        /// Requested target.
        replica: String,
    },

    // Warnings
    /// Clients will have to address replicas directly.
    #[error("no listener is configured for availability group '{group}'")]
    ListenerNotConfigured {
        /// Availability group name.
        group: String,
    },

    // Raised by tasks
    /// An administrative call failed.
    #[error("{operation} failed on {node}")]
    Admin {
        /// Display name of the interrupted step.
        operation: String,
        /// Replica the call went to.
        node: String,
        /// The admin surface's error.
        #[source]
        source: AdminError,
    },

    /// The group has not come online on the node yet.
    #[error("availability group '{group}' is not online on {server} yet")]
    GroupNotOnline {
        /// Availability group name.
        group: String,
        /// Replica polled.
        server: String,
    },

    /// A credential step found no master-key password.
    #[error("the password of the database master key for '{database}' was not supplied")]
    CredentialPasswordMissing {
        /// Database name.
        database: String,
    },

    /// The run was cancelled between statements.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl HadrError {
    /// Wrap an administration failure with the operation it interrupted.
    pub fn admin(operation: impl Into<String>, source: AdminError) -> Self {
        HadrError::Admin {
            operation: operation.into(),
            node: source.node().to_string(),
            source,
        }
    }
}

impl Classified for HadrError {
    fn category(&self) -> ErrorCategory {
        match self {
            HadrError::HadrNotEnabled { .. }
            | HadrError::ViewServerStateDenied { .. }
            | HadrError::NotInQuorum { .. }
            | HadrError::BackupLocationMissing { .. }
            | HadrError::InvalidTopology(_)
            | HadrError::ServerUnavailable { .. } => ErrorCategory::Argument,

            HadrError::InsufficientFreeSpace { .. }
            | HadrError::DatabaseAlreadyExists { .. }
            | HadrError::DatabaseFileAlreadyExists { .. }
            | HadrError::DatabaseFileIncompatible { .. }
            | HadrError::IncompatibleEncryption { .. }
            | HadrError::PrimaryCannotWriteToLocation { .. }
            | HadrError::SecondaryCannotReadLocation { .. }
            | HadrError::AvailabilityModeIncompatible { .. }
            | HadrError::BasicGroupLimit { .. }
            | HadrError::MasterKeyPasswordMissing { .. }
            | HadrError::InvalidListener { .. }
            | HadrError::FailoverTargetInvalid { .. }
            | HadrError::FailoverTargetNotSynchronized { .. }
            | HadrError::FailoverTargetNoQuorumVote { .. } => ErrorCategory::ValidationError,

            HadrError::ListenerNotConfigured { .. } => ErrorCategory::ValidationWarning,

            HadrError::Admin { .. }
            | HadrError::GroupNotOnline { .. }
            | HadrError::CredentialPasswordMissing { .. }
            | HadrError::Cancelled(_) => ErrorCategory::Task,
        }
    }
}

/// Result alias over [`HadrError`].
pub type Result<T, E = HadrError> = std::result::Result<T, E>;
