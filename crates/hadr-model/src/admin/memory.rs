//! In-memory administration surface
//!
//! Holds the facts of a set of nodes and applies mutations to them. Backups
//! land in one shared store keyed by file name, so a backup written through a
//! Windows path can be read back through the matching Linux path.

use super::{
    tsql, AdminError, AdminSurface, BackupHeader, BackupKind, BackupRequest, DatabaseFile,
    DatabaseInfo, EndpointDefinition, EndpointInfo, FileKind, GroupState, QuorumVote,
    ReplicaState, RestoreRequest, ServerInfo,
};
use crate::connection::NodeConnection;
use crate::database::Secret;
use crate::listener::ListenerSpec;
use crate::replica::ReplicaSpec;
use crate::snapshot::TopologySnapshot;
use crate::types::{ClusterQuorumState, HostPlatform, MirroringRole};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Free space of a node that does not set it: 100 GB.
pub const DEFAULT_FREE_SPACE_KB: u64 = 100 * 1024 * 1024;

fn default_true() -> bool {
    true
}

fn default_free_space() -> u64 {
    DEFAULT_FREE_SPACE_KB
}

/// A login present on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginFact {
    /// Login name.
    pub name: String,
    /// Hex-encoded SID.
    #[serde(default)]
    pub sid: Option<String>,
}

/// Everything the in-memory surface knows about one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeFacts {
    /// Instance name.
    pub name: String,
    /// Operating system.
    #[serde(default)]
    pub platform: HostPlatform,
    /// The availability-groups feature is on.
    #[serde(default = "default_true")]
    pub hadr_enabled: bool,
    /// The caller holds VIEW SERVER STATE.
    #[serde(default = "default_true")]
    pub view_server_state: bool,
    /// Cluster quorum state.
    #[serde(default)]
    pub quorum_state: ClusterQuorumState,
    /// Default data directory. Platform default when absent.
    #[serde(default)]
    pub default_data_path: Option<String>,
    /// Default log directory. Platform default when absent.
    #[serde(default)]
    pub default_log_path: Option<String>,
    /// Free space on every volume.
    #[serde(default = "default_free_space")]
    pub free_space_kb: u64,
    /// Databases on the node.
    #[serde(default)]
    pub databases: Vec<DatabaseInfo>,
    /// Logins on the node.
    #[serde(default)]
    pub logins: Vec<LoginFact>,
    /// The mirroring endpoint, if any.
    #[serde(default)]
    pub endpoint: Option<EndpointInfo>,
    /// Directories that exist besides the default ones.
    #[serde(default)]
    pub directories: Vec<String>,
    /// Files that exist outside any database.
    #[serde(default)]
    pub files: Vec<String>,
    /// Votes per cluster member as seen from this node.
    #[serde(default)]
    pub quorum_votes: Vec<QuorumVote>,
    /// Started extended-event sessions.
    #[serde(default)]
    pub xevent_sessions: Vec<String>,
    /// Every call against the node fails as if it were unreachable.
    #[serde(default)]
    pub unreachable: bool,
}

impl NodeFacts {
    /// A reachable node with default settings and nothing on it.
    pub fn new(name: impl Into<String>, platform: HostPlatform) -> Self {
        Self {
            name: name.into(),
            platform,
            hadr_enabled: true,
            view_server_state: true,
            quorum_state: ClusterQuorumState::NormalQuorum,
            default_data_path: None,
            default_log_path: None,
            free_space_kb: DEFAULT_FREE_SPACE_KB,
            databases: Vec::new(),
            logins: Vec::new(),
            endpoint: None,
            directories: Vec::new(),
            files: Vec::new(),
            quorum_votes: Vec::new(),
            xevent_sessions: Vec::new(),
            unreachable: false,
        }
    }

    /// A database with one data and one log file in the default directories.
    pub fn with_database(mut self, name: &str, size_kb: u64) -> Self {
        let files = default_files(&self, name, size_kb);
        self.databases.push(DatabaseInfo {
            name: name.to_string(),
            accessible: true,
            has_master_key: false,
            encrypted: false,
            restoring: false,
            files,
        });
        self
    }

    /// Add a database as given.
    pub fn with_database_info(mut self, database: DatabaseInfo) -> Self {
        self.databases.push(database);
        self
    }

    /// Add a login.
    pub fn with_login(mut self, name: impl Into<String>, sid: Option<&str>) -> Self {
        self.logins.push(LoginFact {
            name: name.into(),
            sid: sid.map(str::to_string),
        });
        self
    }

    /// Set the mirroring endpoint.
    pub fn with_endpoint(mut self, endpoint: EndpointInfo) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the free space.
    pub fn with_free_space_kb(mut self, free_space_kb: u64) -> Self {
        self.free_space_kb = free_space_kb;
        self
    }

    /// Add an existing directory.
    pub fn with_directory(mut self, path: impl Into<String>) -> Self {
        self.directories.push(path.into());
        self
    }

    /// Add an existing file.
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Record the votes of a cluster member.
    pub fn with_quorum_vote(mut self, member: impl Into<String>, votes: u32) -> Self {
        self.quorum_votes.push(QuorumVote {
            member: member.into(),
            votes,
        });
        self
    }

    /// Default data directory.
    pub fn data_path(&self) -> String {
        self.default_data_path
            .clone()
            .unwrap_or_else(|| platform_default_path(self.platform, FileKind::Data).to_string())
    }

    /// Default log directory.
    pub fn log_path(&self) -> String {
        self.default_log_path
            .clone()
            .unwrap_or_else(|| platform_default_path(self.platform, FileKind::Log).to_string())
    }

    fn find_database(&self, name: &str) -> Option<&DatabaseInfo> {
        self.databases
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    fn find_database_mut(&mut self, name: &str) -> Option<&mut DatabaseInfo> {
        self.databases
            .iter_mut()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    fn same_path(&self, a: &str, b: &str) -> bool {
        let a = a.trim_end_matches(is_separator);
        let b = b.trim_end_matches(is_separator);
        match self.platform {
            HostPlatform::Windows => a.eq_ignore_ascii_case(b),
            HostPlatform::Linux => a == b,
        }
    }
}

fn is_separator(c: char) -> bool {
    c == '\\' || c == '/'
}

fn platform_default_path(platform: HostPlatform, kind: FileKind) -> &'static str {
    match (platform, kind) {
        (HostPlatform::Windows, FileKind::Data) => "C:\\Program Files\\Microsoft SQL Server\\MSSQL\\DATA",
        (HostPlatform::Windows, FileKind::Log) => "C:\\Program Files\\Microsoft SQL Server\\MSSQL\\Log",
        (HostPlatform::Linux, _) => "/var/opt/mssql/data",
    }
}

fn join_path(platform: HostPlatform, directory: &str, file: &str) -> String {
    let separator = match platform {
        HostPlatform::Windows => '\\',
        HostPlatform::Linux => '/',
    };
    format!("{}{separator}{file}", directory.trim_end_matches(is_separator))
}

fn default_files(facts: &NodeFacts, name: &str, size_kb: u64) -> Vec<DatabaseFile> {
    vec![
        DatabaseFile {
            logical_name: name.to_string(),
            path: join_path(facts.platform, &facts.data_path(), &format!("{name}.mdf")),
            kind: FileKind::Data,
            size_kb,
        },
        DatabaseFile {
            logical_name: format!("{name}_log"),
            path: join_path(facts.platform, &facts.log_path(), &format!("{name}_log.ldf")),
            kind: FileKind::Log,
            size_kb: size_kb / 4,
        },
    ]
}

/// Last path segment, lowercased. Backups are shared by this key.
fn device_key(device: &str) -> String {
    device
        .rsplit(is_separator)
        .next()
        .unwrap_or(device)
        .to_ascii_lowercase()
}

/// One applied mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Node the mutation ran on.
    pub node: String,
    /// Equivalent T-SQL.
    pub statement: String,
}

#[derive(Debug, Default)]
struct State {
    nodes: IndexMap<String, NodeFacts>,
    backups: IndexMap<String, BackupHeader>,
    groups: IndexMap<String, GroupState>,
    seeding_grants: Vec<(String, String)>,
    operations: Vec<Operation>,
}

impl State {
    fn node(&self, node: &NodeConnection) -> Result<&NodeFacts, AdminError> {
        match self.nodes.get(&node.name().to_ascii_lowercase()) {
            Some(facts) if !facts.unreachable => Ok(facts),
            _ => Err(AdminError::Unavailable {
                node: node.name().to_string(),
            }),
        }
    }

    fn node_mut(&mut self, node: &NodeConnection) -> Result<&mut NodeFacts, AdminError> {
        match self.nodes.get_mut(&node.name().to_ascii_lowercase()) {
            Some(facts) if !facts.unreachable => Ok(facts),
            _ => Err(AdminError::Unavailable {
                node: node.name().to_string(),
            }),
        }
    }

    fn group_mut(&mut self, node: &NodeConnection, group: &str) -> Result<&mut GroupState, AdminError> {
        self.groups
            .get_mut(&group.to_ascii_lowercase())
            .ok_or_else(|| not_found(node, format!("availability group '{group}'")))
    }

    fn log(&mut self, node: &NodeConnection, statement: String) {
        tracing::debug!(node = node.name(), %statement, "applied");
        self.operations.push(Operation {
            node: node.name().to_string(),
            statement,
        });
    }
}

fn not_found(node: &NodeConnection, object: impl Into<String>) -> AdminError {
    AdminError::NotFound {
        node: node.name().to_string(),
        object: object.into(),
    }
}

fn already_exists(node: &NodeConnection, object: impl Into<String>) -> AdminError {
    AdminError::AlreadyExists {
        node: node.name().to_string(),
        object: object.into(),
    }
}

/// An [`AdminSurface`] over in-process node facts. Mutations change the
/// facts and are logged as statements.
#[derive(Debug, Default)]
pub struct InMemoryAdmin {
    state: Mutex<State>,
}

impl InMemoryAdmin {
    /// No nodes, no groups.
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface holding `nodes`.
    pub fn from_nodes(nodes: impl IntoIterator<Item = NodeFacts>) -> Self {
        nodes.into_iter().fold(Self::new(), Self::with_node)
    }

    /// Add or replace a node.
    pub fn with_node(self, facts: NodeFacts) -> Self {
        self.state
            .lock()
            .nodes
            .insert(facts.name.to_ascii_lowercase(), facts);
        self
    }

    /// Current facts of `name`.
    pub fn node(&self, name: &str) -> Option<NodeFacts> {
        self.state.lock().nodes.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Edit the facts of `name`. False when there is no such node.
    pub fn update_node(&self, name: &str, update: impl FnOnce(&mut NodeFacts)) -> bool {
        match self.state.lock().nodes.get_mut(&name.to_ascii_lowercase()) {
            Some(facts) => {
                update(facts);
                true
            }
            None => false,
        }
    }

    /// Current state of group `name`.
    pub fn group(&self, name: &str) -> Option<GroupState> {
        self.state.lock().groups.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Register a group that already exists before the scenario starts.
    pub fn insert_group(&self, group: GroupState) {
        self.state
            .lock()
            .groups
            .insert(group.name.to_ascii_lowercase(), group);
    }

    /// Flip the online flag. False when there is no such group.
    pub fn set_group_online(&self, name: &str, online: bool) -> bool {
        match self.state.lock().groups.get_mut(&name.to_ascii_lowercase()) {
            Some(group) => {
                group.online = online;
                true
            }
            None => false,
        }
    }

    /// Every mutation applied so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().operations.clone()
    }
}

impl AdminSurface for InMemoryAdmin {
    fn server_info(&self, node: &NodeConnection) -> Result<ServerInfo, AdminError> {
        let state = self.state.lock();
        let facts = state.node(node)?;
        Ok(ServerInfo {
            name: facts.name.clone(),
            platform: facts.platform,
            hadr_enabled: facts.hadr_enabled,
            view_server_state: facts.view_server_state,
            quorum_state: facts.quorum_state,
            default_data_path: facts.data_path(),
            default_log_path: facts.log_path(),
        })
    }

    fn database(&self, node: &NodeConnection, name: &str) -> Result<Option<DatabaseInfo>, AdminError> {
        let state = self.state.lock();
        Ok(state.node(node)?.find_database(name).cloned())
    }

    fn database_names(&self, node: &NodeConnection) -> Result<Vec<String>, AdminError> {
        let state = self.state.lock();
        Ok(state
            .node(node)?
            .databases
            .iter()
            .map(|d| d.name.clone())
            .collect())
    }

    fn free_space_kb(&self, node: &NodeConnection, _path: &str) -> Result<u64, AdminError> {
        let state = self.state.lock();
        Ok(state.node(node)?.free_space_kb)
    }

    fn directory_exists(&self, node: &NodeConnection, path: &str) -> Result<bool, AdminError> {
        let state = self.state.lock();
        let facts = state.node(node)?;
        let known = [facts.data_path(), facts.log_path()];
        let exists = known.iter().any(|d| facts.same_path(d, path))
            || facts.directories.iter().any(|d| facts.same_path(d, path))
            || facts
                .databases
                .iter()
                .flat_map(|d| &d.files)
                .any(|f| facts.same_path(f.directory(), path));
        Ok(exists)
    }

    fn file_exists(&self, node: &NodeConnection, path: &str) -> Result<bool, AdminError> {
        let state = self.state.lock();
        let facts = state.node(node)?;
        let exists = facts.files.iter().any(|f| facts.same_path(f, path))
            || facts
                .databases
                .iter()
                .flat_map(|d| &d.files)
                .any(|f| facts.same_path(&f.path, path));
        Ok(exists)
    }

    fn login_for_sid(&self, node: &NodeConnection, sid: &str) -> Result<Option<String>, AdminError> {
        let state = self.state.lock();
        Ok(state
            .node(node)?
            .logins
            .iter()
            .find(|l| l.sid.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(sid)))
            .map(|l| l.name.clone()))
    }

    fn login_exists(&self, node: &NodeConnection, login: &str) -> Result<bool, AdminError> {
        let state = self.state.lock();
        Ok(state
            .node(node)?
            .logins
            .iter()
            .any(|l| l.name.eq_ignore_ascii_case(login)))
    }

    fn endpoint(&self, node: &NodeConnection) -> Result<Option<EndpointInfo>, AdminError> {
        let state = self.state.lock();
        Ok(state.node(node)?.endpoint.clone())
    }

    fn quorum_votes(&self, node: &NodeConnection) -> Result<Vec<QuorumVote>, AdminError> {
        let state = self.state.lock();
        Ok(state.node(node)?.quorum_votes.clone())
    }

    fn group_state(&self, node: &NodeConnection, group: &str) -> Result<Option<GroupState>, AdminError> {
        let state = self.state.lock();
        state.node(node)?;
        Ok(state.groups.get(&group.to_ascii_lowercase()).cloned())
    }

    fn read_backup_header(&self, node: &NodeConnection, device: &str) -> Result<Vec<BackupHeader>, AdminError> {
        let state = self.state.lock();
        state.node(node)?;
        match state.backups.get(&device_key(device)) {
            Some(header) => Ok(vec![header.clone()]),
            None => Err(not_found(node, format!("backup device '{device}'"))),
        }
    }

    fn create_login(&self, node: &NodeConnection, login: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node_mut(node)?;
        if facts.logins.iter().any(|l| l.name.eq_ignore_ascii_case(login)) {
            return Err(already_exists(node, format!("login '{login}'")));
        }
        facts.logins.push(LoginFact {
            name: login.to_string(),
            sid: None,
        });
        state.log(node, tsql::create_login(login));
        Ok(())
    }

    fn create_endpoint(&self, node: &NodeConnection, endpoint: &EndpointDefinition) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node_mut(node)?;
        if let Some(existing) = &facts.endpoint {
            return Err(already_exists(node, format!("endpoint '{}'", existing.name)));
        }
        facts.endpoint = Some(EndpointInfo {
            name: endpoint.name.clone(),
            port: endpoint.port,
            role: endpoint.role,
            encryption: endpoint.encryption,
            started: false,
            connect_grants: Vec::new(),
        });
        state.log(node, tsql::create_endpoint(endpoint));
        Ok(())
    }

    fn alter_endpoint_role(&self, node: &NodeConnection, endpoint: &str, role: MirroringRole) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let info = named_endpoint(state.node_mut(node)?, node, endpoint)?;
        info.role = role;
        state.log(node, tsql::alter_endpoint_role(endpoint, role));
        Ok(())
    }

    fn start_endpoint(&self, node: &NodeConnection, endpoint: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let info = named_endpoint(state.node_mut(node)?, node, endpoint)?;
        info.started = true;
        state.log(node, tsql::start_endpoint(endpoint));
        Ok(())
    }

    fn drop_endpoint(&self, node: &NodeConnection, endpoint: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node_mut(node)?;
        named_endpoint(facts, node, endpoint)?;
        facts.endpoint = None;
        state.log(node, tsql::drop_endpoint(endpoint));
        Ok(())
    }

    fn grant_connect(&self, node: &NodeConnection, endpoint: &str, login: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node_mut(node)?;
        if !facts.logins.iter().any(|l| l.name.eq_ignore_ascii_case(login)) {
            return Err(not_found(node, format!("login '{login}'")));
        }
        let info = named_endpoint(facts, node, endpoint)?;
        if !info.connect_grants.iter().any(|g| g.eq_ignore_ascii_case(login)) {
            info.connect_grants.push(login.to_string());
        }
        state.log(node, tsql::grant_connect(endpoint, login));
        Ok(())
    }

    fn start_xevent_session(&self, node: &NodeConnection, session: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node_mut(node)?;
        if !facts.xevent_sessions.iter().any(|s| s == session) {
            facts.xevent_sessions.push(session.to_string());
        }
        state.log(node, tsql::start_xevent_session(session));
        Ok(())
    }

    fn create_availability_group(&self, node: &NodeConnection, topology: &TopologySnapshot) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node(node)?;
        let missing: Vec<&str> = topology
            .new_databases
            .iter()
            .filter(|d| facts.find_database(&d.name).is_none())
            .map(|d| d.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(not_found(node, format!("database(s) {}", missing.join(", "))));
        }
        let key = topology.group_name.to_ascii_lowercase();
        if state.groups.contains_key(&key) {
            return Err(already_exists(
                node,
                format!("availability group '{}'", topology.group_name),
            ));
        }
        let replicas = topology
            .replicas
            .iter()
            .map(|r| {
                let local = r.name.eq_ignore_ascii_case(node.name());
                ReplicaState {
                    name: r.name.clone(),
                    is_primary: local,
                    joined: local,
                    synchronized: local,
                }
            })
            .collect();
        state.groups.insert(
            key,
            GroupState {
                name: topology.group_name.clone(),
                primary: node.name().to_string(),
                online: true,
                replicas,
                databases: topology.new_databases.iter().map(|d| d.name.clone()).collect(),
                listener: None,
            },
        );
        state.log(node, tsql::create_availability_group(topology));
        Ok(())
    }

    fn add_replicas(&self, node: &NodeConnection, topology: &TopologySnapshot, replicas: &[&ReplicaSpec]) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.node(node)?;
        let group = state.group_mut(node, &topology.group_name)?;
        if !group.primary.eq_ignore_ascii_case(node.name()) {
            return Err(AdminError::rejected(
                node.name(),
                "add replica",
                "replicas can only be added on the primary",
            ));
        }
        for replica in replicas {
            if group.replica(&replica.name).is_some() {
                return Err(already_exists(node, format!("replica '{}'", replica.name)));
            }
        }
        group.replicas.extend(replicas.iter().map(|r| ReplicaState {
            name: r.name.clone(),
            is_primary: false,
            joined: false,
            synchronized: false,
        }));
        state.log(node, tsql::add_replicas(topology, replicas));
        Ok(())
    }

    fn join_group(&self, node: &NodeConnection, topology: &TopologySnapshot) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.node(node)?;
        let group = state.group_mut(node, &topology.group_name)?;
        let Some(replica) = group
            .replicas
            .iter_mut()
            .find(|r| r.name.eq_ignore_ascii_case(node.name()))
        else {
            return Err(AdminError::rejected(
                node.name(),
                "join availability group",
                format!("{} is not a replica of '{}'", node.name(), topology.group_name),
            ));
        };
        replica.joined = true;
        if topology.will_perform_automatic_seeding() {
            state
                .seeding_grants
                .push((node.name().to_ascii_lowercase(), topology.group_name.to_ascii_lowercase()));
        }
        state.log(node, tsql::join_group(topology));
        Ok(())
    }

    fn create_listener(&self, node: &NodeConnection, group: &str, listener: &ListenerSpec) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.node(node)?;
        let entry = state.group_mut(node, group)?;
        if entry.listener.is_some() {
            return Err(already_exists(node, format!("listener '{}'", listener.name)));
        }
        entry.listener = Some(listener.name.clone());
        state.log(node, tsql::create_listener(group, listener));
        Ok(())
    }

    fn add_databases(&self, node: &NodeConnection, group: &str, databases: &[&str]) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node(node)?;
        if let Some(missing) = databases.iter().find(|d| facts.find_database(d).is_none()) {
            return Err(not_found(node, format!("database '{missing}'")));
        }
        let entry = state.group_mut(node, group)?;
        for database in databases {
            if !entry.databases.iter().any(|d| d.eq_ignore_ascii_case(database)) {
                entry.databases.push((*database).to_string());
            }
        }
        state.log(node, tsql::add_databases(group, databases));
        Ok(())
    }

    fn grant_create_any_database(&self, node: &NodeConnection, group: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.node(node)?;
        state.group_mut(node, group)?;
        state
            .seeding_grants
            .push((node.name().to_ascii_lowercase(), group.to_ascii_lowercase()));
        state.log(node, tsql::grant_create_any_database(group));
        Ok(())
    }

    fn create_database(&self, node: &NodeConnection, name: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node_mut(node)?;
        if facts.find_database(name).is_some() {
            return Err(already_exists(node, format!("database '{name}'")));
        }
        let files = default_files(facts, name, 0);
        facts.databases.push(DatabaseInfo {
            name: name.to_string(),
            accessible: true,
            has_master_key: false,
            encrypted: false,
            restoring: false,
            files,
        });
        state.log(node, tsql::create_database(name));
        Ok(())
    }

    fn drop_database(&self, node: &NodeConnection, name: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node_mut(node)?;
        let before = facts.databases.len();
        facts.databases.retain(|d| !d.name.eq_ignore_ascii_case(name));
        if facts.databases.len() == before {
            return Err(not_found(node, format!("database '{name}'")));
        }
        state.log(node, tsql::drop_database(name));
        Ok(())
    }

    fn backup(&self, node: &NodeConnection, request: &BackupRequest) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        let facts = state.node(node)?;
        match facts.find_database(&request.database) {
            None => return Err(not_found(node, format!("database '{}'", request.database))),
            Some(db) if db.restoring => {
                return Err(AdminError::rejected(
                    node.name(),
                    "backup",
                    format!("database '{}' is restoring", request.database),
                ))
            }
            Some(_) => {}
        }
        state.backups.insert(
            device_key(&request.device),
            BackupHeader {
                database_name: request.database.clone(),
                kind: request.kind,
            },
        );
        state.log(node, tsql::backup(request));
        Ok(())
    }

    fn restore(&self, node: &NodeConnection, request: &RestoreRequest) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.node(node)?;
        let Some(header) = state.backups.get(&device_key(&request.device)).cloned() else {
            return Err(not_found(node, format!("backup device '{}'", request.device)));
        };
        if header.kind != request.kind || !header.database_name.eq_ignore_ascii_case(&request.database) {
            return Err(AdminError::rejected(
                node.name(),
                "restore",
                format!(
                    "device '{}' holds a {:?} backup of '{}'",
                    request.device, header.kind, header.database_name
                ),
            ));
        }
        let facts = state.node_mut(node)?;
        match request.kind {
            BackupKind::Full => {
                if facts.find_database(&request.database).is_some() {
                    return Err(already_exists(node, format!("database '{}'", request.database)));
                }
                let files = if request.relocate.is_empty() {
                    default_files(facts, &request.database, 0)
                } else {
                    request
                        .relocate
                        .iter()
                        .map(|m| DatabaseFile {
                            logical_name: m.logical_name.clone(),
                            path: m.path.clone(),
                            kind: if m.path.to_ascii_lowercase().ends_with(".ldf") {
                                FileKind::Log
                            } else {
                                FileKind::Data
                            },
                            size_kb: 0,
                        })
                        .collect()
                };
                facts.databases.push(DatabaseInfo {
                    name: request.database.clone(),
                    accessible: false,
                    has_master_key: false,
                    encrypted: false,
                    restoring: true,
                    files,
                });
            }
            BackupKind::Log => match facts.find_database(&request.database) {
                Some(db) if db.restoring => {}
                Some(_) => {
                    return Err(AdminError::rejected(
                        node.name(),
                        "restore log",
                        format!("database '{}' is not restoring", request.database),
                    ))
                }
                None => return Err(not_found(node, format!("database '{}'", request.database))),
            },
        }
        state.log(node, tsql::restore(request));
        Ok(())
    }

    fn join_database(&self, node: &NodeConnection, group: &str, database: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.node(node)?;
        let seeded = state.seeding_grants.iter().any(|(n, g)| {
            *n == node.name().to_ascii_lowercase() && *g == group.to_ascii_lowercase()
        });
        let entry = state.group_mut(node, group)?;
        if !entry.databases.iter().any(|d| d.eq_ignore_ascii_case(database)) {
            return Err(AdminError::rejected(
                node.name(),
                "join database",
                format!("database '{database}' is not part of '{group}'"),
            ));
        }
        let Some(replica) = entry
            .replicas
            .iter_mut()
            .find(|r| r.name.eq_ignore_ascii_case(node.name()))
        else {
            return Err(AdminError::rejected(
                node.name(),
                "join database",
                format!("{} is not a replica of '{group}'", node.name()),
            ));
        };
        if !replica.joined {
            return Err(AdminError::rejected(
                node.name(),
                "join database",
                format!("{} has not joined '{group}'", node.name()),
            ));
        }
        replica.synchronized = true;

        let facts = state.node_mut(node)?;
        match facts.find_database_mut(database) {
            Some(db) => {
                db.restoring = false;
                db.accessible = true;
            }
            None if seeded => {
                let files = default_files(facts, database, 0);
                facts.databases.push(DatabaseInfo {
                    name: database.to_string(),
                    accessible: true,
                    has_master_key: false,
                    encrypted: false,
                    restoring: false,
                    files,
                });
            }
            None => return Err(not_found(node, format!("database '{database}'"))),
        }
        state.log(node, tsql::join_database(group, database));
        Ok(())
    }

    fn add_database_credential(&self, node: &NodeConnection, database: &str, password: &Secret) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        if state.node(node)?.find_database(database).is_none() {
            return Err(not_found(node, format!("database '{database}'")));
        }
        state.log(node, tsql::add_database_credential(database, password));
        Ok(())
    }

    fn failover(&self, node: &NodeConnection, group: &str, allow_data_loss: bool) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.node(node)?;
        let entry = state.group_mut(node, group)?;
        let Some(target) = entry.replica(node.name()).cloned() else {
            return Err(AdminError::rejected(
                node.name(),
                "failover",
                format!("{} is not a replica of '{group}'", node.name()),
            ));
        };
        if target.is_primary {
            return Err(AdminError::rejected(node.name(), "failover", "already the primary"));
        }
        if !target.joined {
            return Err(AdminError::rejected(node.name(), "failover", "replica has not joined"));
        }
        if !target.synchronized && !allow_data_loss {
            return Err(AdminError::rejected(
                node.name(),
                "failover",
                "replica is not synchronized",
            ));
        }
        for replica in &mut entry.replicas {
            replica.is_primary = replica.name.eq_ignore_ascii_case(node.name());
        }
        entry.primary = target.name;
        state.log(node, tsql::failover(group, allow_data_loss));
        Ok(())
    }

    fn abort_operation(&self, node: &NodeConnection) -> Result<(), AdminError> {
        let state = self.state.lock();
        state.node(node)?;
        tracing::info!(node = node.name(), "abort requested with nothing in flight");
        Ok(())
    }
}

fn named_endpoint<'a>(
    facts: &'a mut NodeFacts,
    node: &NodeConnection,
    endpoint: &str,
) -> Result<&'a mut EndpointInfo, AdminError> {
    match facts.endpoint.as_mut() {
        Some(info) if info.name.eq_ignore_ascii_case(endpoint) => Ok(info),
        _ => Err(not_found(node, format!("endpoint '{endpoint}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::FileMove;

    fn node(name: &str, platform: HostPlatform) -> NodeConnection {
        NodeConnection::new(name, platform)
    }

    #[test]
    fn backups_are_shared_across_platform_paths() {
        let admin = InMemoryAdmin::from_nodes([
            NodeFacts::new("R1", HostPlatform::Windows).with_database("Sales", 1024),
            NodeFacts::new("L1", HostPlatform::Linux),
        ]);
        let r1 = node("R1", HostPlatform::Windows);
        let l1 = node("L1", HostPlatform::Linux);

        admin
            .backup(
                &r1,
                &BackupRequest {
                    database: "Sales".into(),
                    device: "\\\\share\\backups\\Sales.bak".into(),
                    kind: BackupKind::Full,
                },
            )
            .unwrap();
        let headers = admin.read_backup_header(&l1, "/mnt/backups/Sales.bak").unwrap();
        assert_eq!(headers[0].database_name, "Sales");

        admin
            .restore(
                &l1,
                &RestoreRequest {
                    database: "Sales".into(),
                    device: "/mnt/backups/Sales.bak".into(),
                    kind: BackupKind::Full,
                    relocate: vec![FileMove {
                        logical_name: "Sales_log".into(),
                        path: "/var/opt/mssql/data/Sales_log.ldf".into(),
                    }],
                },
            )
            .unwrap();
        let restored = admin.database(&l1, "Sales").unwrap().unwrap();
        assert!(restored.restoring);
        assert_eq!(restored.files[0].kind, FileKind::Log);
    }

    #[test]
    fn unknown_and_unreachable_nodes_are_unavailable() {
        let mut facts = NodeFacts::new("R2", HostPlatform::Windows);
        facts.unreachable = true;
        let admin = InMemoryAdmin::new().with_node(facts);
        for name in ["R2", "R9"] {
            let err = admin.server_info(&node(name, HostPlatform::Windows)).unwrap_err();
            assert_eq!(err, AdminError::Unavailable { node: name.into() });
        }
    }

    #[test]
    fn failover_requires_synchronized_target_unless_forced() {
        let admin = InMemoryAdmin::from_nodes([
            NodeFacts::new("R1", HostPlatform::Windows),
            NodeFacts::new("R2", HostPlatform::Windows),
        ]);
        admin.insert_group(GroupState {
            name: "ag1".into(),
            primary: "R1".into(),
            online: true,
            replicas: vec![
                ReplicaState {
                    name: "R1".into(),
                    is_primary: true,
                    joined: true,
                    synchronized: true,
                },
                ReplicaState {
                    name: "R2".into(),
                    is_primary: false,
                    joined: true,
                    synchronized: false,
                },
            ],
            databases: Vec::new(),
            listener: None,
        });
        let r2 = node("R2", HostPlatform::Windows);
        assert!(matches!(
            admin.failover(&r2, "ag1", false),
            Err(AdminError::Rejected { .. })
        ));
        admin.failover(&r2, "ag1", true).unwrap();
        let group = admin.group("ag1").unwrap();
        assert_eq!(group.primary, "R2");
        assert!(group.replica("R2").unwrap().is_primary);
        assert!(!group.replica("R1").unwrap().is_primary);
        assert_eq!(admin.operations().len(), 1);
    }

    #[test]
    fn directory_lookup_is_case_insensitive_on_windows_only() {
        let admin = InMemoryAdmin::from_nodes([
            NodeFacts::new("R1", HostPlatform::Windows).with_directory("D:\\Data"),
            NodeFacts::new("L1", HostPlatform::Linux).with_directory("/data"),
        ]);
        assert!(admin
            .directory_exists(&node("R1", HostPlatform::Windows), "d:\\data\\")
            .unwrap());
        assert!(!admin
            .directory_exists(&node("L1", HostPlatform::Linux), "/DATA")
            .unwrap());
    }
}
