//! The administration surface
//!
//! Every remote operation the scenarios need, expressed as blocking calls
//! against one node. Implementations may fail any call; the retry loops
//! decide what happens next.

mod memory;
mod scripting;
pub mod tsql;

pub use memory::{InMemoryAdmin, LoginFact, NodeFacts, Operation, DEFAULT_FREE_SPACE_KB};
pub use scripting::ScriptingAdmin;

use crate::connection::NodeConnection;
use crate::database::Secret;
use crate::listener::ListenerSpec;
use crate::replica::ReplicaSpec;
use crate::snapshot::TopologySnapshot;
use crate::types::{ClusterQuorumState, EndpointEncryption, HostPlatform, MirroringRole};
use serde::{Deserialize, Serialize};

/// Failure of one administrative call. Every variant names the node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdminError {
    /// The node could not be reached.
    #[error("cannot connect to {node}")]
    Unavailable {
        /// Node name.
        node: String,
    },
    /// A referenced object is missing.
    #[error("{object} not found on {node}")]
    NotFound {
        /// Node name.
        node: String,
        /// What was looked up, e.g. `endpoint Hadr_endpoint`.
        object: String,
    },
    /// The object to create is already there.
    #[error("{object} already exists on {node}")]
    AlreadyExists {
        /// Node name.
        node: String,
        /// What was being created.
        object: String,
    },
    /// The server refused the call.
    #[error("{operation} rejected by {node}: {reason}")]
    Rejected {
        /// Node name.
        node: String,
        /// The refused operation.
        operation: String,
        /// Server message.
        reason: String,
    },
    /// The call was interrupted by an abort.
    #[error("{operation} on {node} was aborted")]
    Aborted {
        /// Node name.
        node: String,
        /// The interrupted operation.
        operation: String,
    },
}

impl AdminError {
    /// Node the call was made against.
    pub fn node(&self) -> &str {
        match self {
            AdminError::Unavailable { node }
            | AdminError::NotFound { node, .. }
            | AdminError::AlreadyExists { node, .. }
            | AdminError::Rejected { node, .. }
            | AdminError::Aborted { node, .. } => node,
        }
    }

    /// Shorthand for [`AdminError::Rejected`].
    pub fn rejected(node: &str, operation: &str, reason: impl Into<String>) -> Self {
        AdminError::Rejected {
            node: node.to_string(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Server-level facts used by construction checks and validators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Instance name.
    pub name: String,
    /// Operating system.
    pub platform: HostPlatform,
    /// The availability-groups feature is on.
    pub hadr_enabled: bool,
    /// The caller holds VIEW SERVER STATE.
    pub view_server_state: bool,
    /// Cluster quorum state.
    pub quorum_state: ClusterQuorumState,
    /// Default directory for data files.
    pub default_data_path: String,
    /// Default directory for log files.
    pub default_log_path: String,
}

/// Kind of a database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Rows data.
    Data,
    /// Transaction log.
    Log,
}

/// One physical file of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseFile {
    /// Logical file name.
    pub logical_name: String,
    /// Physical path.
    pub path: String,
    /// Data or log.
    pub kind: FileKind,
    /// Size in KB.
    #[serde(default)]
    pub size_kb: u64,
}

impl DatabaseFile {
    /// Directory part of [`DatabaseFile::path`], either separator.
    pub fn directory(&self) -> &str {
        self.path
            .rfind(is_separator)
            .map_or("", |idx| &self.path[..idx])
    }

    /// File part of [`DatabaseFile::path`].
    pub fn file_name(&self) -> &str {
        self.path
            .rfind(is_separator)
            .map_or(self.path.as_str(), |idx| &self.path[idx + 1..])
    }
}

/// Properties of a database on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// The database is online and readable.
    #[serde(default = "default_true")]
    pub accessible: bool,
    /// A database master key exists.
    #[serde(default)]
    pub has_master_key: bool,
    /// Transparent data encryption is on.
    #[serde(default)]
    pub encrypted: bool,
    /// Restored WITH NORECOVERY and waiting for log or a join.
    #[serde(default)]
    pub restoring: bool,
    /// Physical files.
    #[serde(default)]
    pub files: Vec<DatabaseFile>,
}

fn default_true() -> bool {
    true
}

fn is_separator(c: char) -> bool {
    c == '\\' || c == '/'
}

impl DatabaseInfo {
    /// Total size of the files of `kind`.
    pub fn size_kb(&self, kind: FileKind) -> u64 {
        self.files
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| f.size_kb)
            .sum()
    }
}

/// The mirroring endpoint found on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Endpoint name.
    pub name: String,
    /// TCP port.
    pub port: u16,
    /// Accepted roles.
    pub role: MirroringRole,
    /// Encryption setting.
    pub encryption: EndpointEncryption,
    /// The endpoint is started.
    pub started: bool,
    /// Logins granted CONNECT.
    #[serde(default)]
    pub connect_grants: Vec<String>,
}

/// Definition of an endpoint to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDefinition {
    /// Endpoint name.
    pub name: String,
    /// TCP port.
    pub port: u16,
    /// Accepted roles.
    pub role: MirroringRole,
    /// Encryption setting.
    pub encryption: EndpointEncryption,
}

impl EndpointDefinition {
    /// The endpoint `replica` asks for.
    pub fn for_replica(replica: &ReplicaSpec) -> Self {
        Self {
            name: replica.endpoint.name.clone(),
            port: replica.endpoint.port,
            role: replica.endpoint_role(),
            encryption: replica.endpoint.encryption,
        }
    }
}

/// A replica as the group reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    /// Replica name.
    pub name: String,
    /// Currently primary.
    pub is_primary: bool,
    /// Joined to the group.
    pub joined: bool,
    /// Caught up with the primary.
    pub synchronized: bool,
}

/// A group as a node reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    /// Group name.
    pub name: String,
    /// Current primary.
    pub primary: String,
    /// The group is online.
    pub online: bool,
    /// Replicas in the group.
    pub replicas: Vec<ReplicaState>,
    /// Databases in the group.
    pub databases: Vec<String>,
    /// Listener name, if one exists.
    #[serde(default)]
    pub listener: Option<String>,
}

impl GroupState {
    /// Replica by name, ignoring case.
    pub fn replica(&self, name: &str) -> Option<&ReplicaState> {
        self.replicas
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }
}

/// Votes one cluster member holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumVote {
    /// Member name.
    pub member: String,
    /// Votes held.
    pub votes: u32,
}

/// Full database or log backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Full database backup.
    Full,
    /// Transaction log backup.
    Log,
}

/// A backup to run on the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    /// Database name.
    pub database: String,
    /// Backup file path.
    pub device: String,
    /// Full or log.
    pub kind: BackupKind,
}

/// Move a logical file to a new physical path during restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMove {
    /// Logical file name.
    pub logical_name: String,
    /// New physical path.
    pub path: String,
}

/// A restore to run on a secondary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Database name.
    pub database: String,
    /// Backup file path.
    pub device: String,
    /// Full or log.
    pub kind: BackupKind,
    /// Files to place somewhere else than in the backup.
    pub relocate: Vec<FileMove>,
}

/// One backup set in a backup file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHeader {
    /// Database the set belongs to.
    pub database_name: String,
    /// Full or log.
    pub kind: BackupKind,
}

/// Blocking administrative calls against individual nodes.
pub trait AdminSurface: Send + Sync {
    // Queries
    /// Server-level facts.
    fn server_info(&self, node: &NodeConnection) -> Result<ServerInfo, AdminError>;

    /// Properties of database `name`, if it exists.
    fn database(&self, node: &NodeConnection, name: &str) -> Result<Option<DatabaseInfo>, AdminError>;

    /// Every database on the node.
    fn database_names(&self, node: &NodeConnection) -> Result<Vec<String>, AdminError>;

    /// Free space, in KB, on the volume holding `path`.
    fn free_space_kb(&self, node: &NodeConnection, path: &str) -> Result<u64, AdminError>;

    /// Whether the directory exists on the node.
    fn directory_exists(&self, node: &NodeConnection, path: &str) -> Result<bool, AdminError>;

    /// Whether the file exists on the node.
    fn file_exists(&self, node: &NodeConnection, path: &str) -> Result<bool, AdminError>;

    /// Name of the login that carries `sid` (hex), if any.
    fn login_for_sid(&self, node: &NodeConnection, sid: &str) -> Result<Option<String>, AdminError>;

    /// Whether a login called `login` exists.
    fn login_exists(&self, node: &NodeConnection, login: &str) -> Result<bool, AdminError>;

    /// The mirroring endpoint, if one exists.
    fn endpoint(&self, node: &NodeConnection) -> Result<Option<EndpointInfo>, AdminError>;

    /// Votes per cluster member.
    fn quorum_votes(&self, node: &NodeConnection) -> Result<Vec<QuorumVote>, AdminError>;

    /// The group as seen from `node`.
    fn group_state(&self, node: &NodeConnection, group: &str) -> Result<Option<GroupState>, AdminError>;

    /// Backup sets in the file at `device`.
    fn read_backup_header(&self, node: &NodeConnection, device: &str) -> Result<Vec<BackupHeader>, AdminError>;

    // Mutations
    /// Create a Windows login.
    fn create_login(&self, node: &NodeConnection, login: &str) -> Result<(), AdminError>;

    /// Create a stopped endpoint.
    fn create_endpoint(&self, node: &NodeConnection, endpoint: &EndpointDefinition) -> Result<(), AdminError>;

    /// Change the roles an endpoint accepts.
    fn alter_endpoint_role(&self, node: &NodeConnection, endpoint: &str, role: MirroringRole) -> Result<(), AdminError>;

    /// Start a stopped endpoint.
    fn start_endpoint(&self, node: &NodeConnection, endpoint: &str) -> Result<(), AdminError>;

    /// Drop the endpoint.
    fn drop_endpoint(&self, node: &NodeConnection, endpoint: &str) -> Result<(), AdminError>;

    /// Grant `login` CONNECT on the endpoint.
    fn grant_connect(&self, node: &NodeConnection, endpoint: &str, login: &str) -> Result<(), AdminError>;

    /// Start the health session and make it start with the server.
    fn start_xevent_session(&self, node: &NodeConnection, session: &str) -> Result<(), AdminError>;

    /// Create the group on the primary.
    fn create_availability_group(&self, node: &NodeConnection, topology: &TopologySnapshot) -> Result<(), AdminError>;

    /// Add `replicas` to an existing group.
    fn add_replicas(&self, node: &NodeConnection, topology: &TopologySnapshot, replicas: &[&ReplicaSpec]) -> Result<(), AdminError>;

    /// Join a secondary to the group.
    fn join_group(&self, node: &NodeConnection, topology: &TopologySnapshot) -> Result<(), AdminError>;

    /// Create the listener on the primary.
    fn create_listener(&self, node: &NodeConnection, group: &str, listener: &ListenerSpec) -> Result<(), AdminError>;

    /// Add databases to the group on the primary.
    fn add_databases(&self, node: &NodeConnection, group: &str, databases: &[&str]) -> Result<(), AdminError>;

    /// Allow automatic seeding to create databases on a secondary.
    fn grant_create_any_database(&self, node: &NodeConnection, group: &str) -> Result<(), AdminError>;

    /// Create an empty database.
    fn create_database(&self, node: &NodeConnection, name: &str) -> Result<(), AdminError>;

    /// Drop a database.
    fn drop_database(&self, node: &NodeConnection, name: &str) -> Result<(), AdminError>;

    /// Run a backup.
    fn backup(&self, node: &NodeConnection, request: &BackupRequest) -> Result<(), AdminError>;

    /// Restore `WITH NORECOVERY`.
    fn restore(&self, node: &NodeConnection, request: &RestoreRequest) -> Result<(), AdminError>;

    /// Join a restoring database to the group.
    fn join_database(&self, node: &NodeConnection, group: &str, database: &str) -> Result<(), AdminError>;

    /// Store the master key password on the node.
    fn add_database_credential(&self, node: &NodeConnection, database: &str, password: &Secret) -> Result<(), AdminError>;

    /// Make `node` the primary.
    fn failover(&self, node: &NodeConnection, group: &str, allow_data_loss: bool) -> Result<(), AdminError>;

    /// Interrupt the backup or restore currently running on `node`.
    fn abort_operation(&self, node: &NodeConnection) -> Result<(), AdminError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_path_parts_handle_both_separators() {
        let win = DatabaseFile {
            logical_name: "Sales".into(),
            path: "D:\\Data\\Sales.mdf".into(),
            kind: FileKind::Data,
            size_kb: 0,
        };
        assert_eq!(win.directory(), "D:\\Data");
        assert_eq!(win.file_name(), "Sales.mdf");

        let linux = DatabaseFile {
            path: "/var/opt/mssql/data/Sales_log.ldf".into(),
            kind: FileKind::Log,
            ..win
        };
        assert_eq!(linux.directory(), "/var/opt/mssql/data");
        assert_eq!(linux.file_name(), "Sales_log.ldf");
    }
}
