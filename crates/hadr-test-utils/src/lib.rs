//! Testing utilities for the HADR workspace
//!
//! Shared fixtures for availability-group scenarios and an administration
//! surface that fails on demand.

use hadr_kernel::progress::ProgressRecord;
use hadr_model::admin::{
    AdminError, AdminSurface, BackupHeader, BackupRequest, DatabaseInfo, EndpointDefinition,
    EndpointInfo, GroupState, InMemoryAdmin, NodeFacts, QuorumVote, RestoreRequest, ServerInfo,
};
use hadr_model::{
    DataSynchronization, DatabaseSpec, HostPlatform, ListenerSpec, MirroringRole, NodeConnection,
    ObjectState, ReplicaSpec, Secret, TopologySnapshot,
};
use parking_lot::Mutex;

/// Availability group of every fixture.
pub const GROUP: &str = "ag1";
/// Primary replica.
pub const PRIMARY: &str = "P";
/// The two secondaries, in snapshot order.
pub const SECONDARIES: [&str; 2] = ["S1", "S2"];
/// The one user database, present on the primary.
pub const DATABASE: &str = "Sales";
/// Windows backup location of the fixture group.
pub const BACKUP_SHARE: &str = r"\\share\backups";

/// Facts of a healthy Windows node where every fixture replica has a
/// quorum vote.
pub fn node(name: &str) -> NodeFacts {
    std::iter::once(PRIMARY)
        .chain(SECONDARIES)
        .fold(NodeFacts::new(name, HostPlatform::Windows), |facts, member| {
            facts.with_quorum_vote(member, 1)
        })
}

/// Primary `P` holding `Sales`, secondaries `S1` and `S2` empty.
pub fn three_node_admin() -> InMemoryAdmin {
    InMemoryAdmin::from_nodes([
        node(PRIMARY).with_database(DATABASE, 4096),
        node(SECONDARIES[0]),
        node(SECONDARIES[1]),
    ])
}

/// A new group over `P`, `S1` and `S2` adding `Sales`.
pub fn three_node_topology(data_sync: DataSynchronization) -> TopologySnapshot {
    TopologySnapshot::new(
        GROUP,
        vec![
            ReplicaSpec::primary(PRIMARY),
            ReplicaSpec::secondary(SECONDARIES[0]),
            ReplicaSpec::secondary(SECONDARIES[1]),
        ],
    )
    .with_databases(vec![DatabaseSpec::new(DATABASE)])
    .with_data_sync(data_sync)
    .with_backup_location(Some(BACKUP_SHARE), None)
}

/// The running group described by the replicas and databases of
/// `topology` that already exist.
pub fn running_group(topology: &TopologySnapshot) -> GroupState {
    GroupState {
        name: topology.group_name.clone(),
        primary: PRIMARY.to_string(),
        online: true,
        replicas: topology
            .replicas
            .iter()
            .filter(|r| !r.is_new())
            .map(|r| hadr_model::admin::ReplicaState {
                name: r.name.clone(),
                is_primary: r.is_primary(),
                joined: true,
                synchronized: true,
            })
            .collect(),
        databases: topology
            .existing_databases
            .iter()
            .map(|d| d.name.clone())
            .collect(),
        listener: None,
    }
}

/// `S2` added to a group that already spans `P` and `S1` and holds `Sales`.
pub fn add_replica_topology(data_sync: DataSynchronization) -> TopologySnapshot {
    let mut topology = TopologySnapshot::new(
        GROUP,
        vec![
            ReplicaSpec::primary(PRIMARY).with_state(ObjectState::Existing),
            ReplicaSpec::secondary(SECONDARIES[0]).with_state(ObjectState::Existing),
            ReplicaSpec::secondary(SECONDARIES[1]),
        ],
    )
    .with_data_sync(data_sync)
    .with_backup_location(Some(BACKUP_SHARE), None);
    topology.state = ObjectState::Existing;
    topology.existing_databases = vec![DatabaseSpec::existing(DATABASE)];
    topology
}

/// Details reported under `name`, in emission order.
pub fn details_of<'a>(records: &'a [ProgressRecord], name: &str) -> Vec<&'a str> {
    records
        .iter()
        .filter(|r| r.event.name() == name)
        .map(|r| r.event.details())
        .collect()
}

#[derive(Debug, Clone)]
struct Fault {
    operation: &'static str,
    node: String,
    remaining: u32,
}

/// Forwards to an [`InMemoryAdmin`] but rejects chosen operations on chosen
/// nodes a fixed number of times. Every call is counted.
#[derive(Debug, Default)]
pub struct FaultyAdmin {
    inner: InMemoryAdmin,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl FaultyAdmin {
    /// Passes every call through until [`fail`](Self::fail) arms a rejection.
    pub fn new(inner: InMemoryAdmin) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reject the next `times` calls of `operation` against `node`.
    pub fn fail(self, operation: &'static str, node: &str, times: u32) -> Self {
        self.faults.lock().push(Fault {
            operation,
            node: node.to_string(),
            remaining: times,
        });
        self
    }

    /// The wrapped admin, for inspecting node facts.
    pub fn inner(&self) -> &InMemoryAdmin {
        &self.inner
    }

    /// How often `operation` reached `node`, failed calls included.
    pub fn calls(&self, operation: &str, node: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(op, n)| *op == operation && n.eq_ignore_ascii_case(node))
            .count()
    }

    fn enter(&self, operation: &'static str, node: &NodeConnection) -> Result<(), AdminError> {
        self.calls.lock().push((operation, node.name().to_string()));
        let mut faults = self.faults.lock();
        let fault = faults.iter_mut().find(|f| {
            f.operation == operation && f.node.eq_ignore_ascii_case(node.name()) && f.remaining > 0
        });
        match fault {
            Some(fault) => {
                fault.remaining -= 1;
                Err(AdminError::rejected(node.name(), operation, "injected failure"))
            }
            None => Ok(()),
        }
    }
}

impl AdminSurface for FaultyAdmin {
    fn server_info(&self, node: &NodeConnection) -> Result<ServerInfo, AdminError> {
        self.enter("server_info", node)?;
        self.inner.server_info(node)
    }

    fn database(&self, node: &NodeConnection, name: &str) -> Result<Option<DatabaseInfo>, AdminError> {
        self.enter("database", node)?;
        self.inner.database(node, name)
    }

    fn database_names(&self, node: &NodeConnection) -> Result<Vec<String>, AdminError> {
        self.enter("database_names", node)?;
        self.inner.database_names(node)
    }

    fn free_space_kb(&self, node: &NodeConnection, path: &str) -> Result<u64, AdminError> {
        self.enter("free_space_kb", node)?;
        self.inner.free_space_kb(node, path)
    }

    fn directory_exists(&self, node: &NodeConnection, path: &str) -> Result<bool, AdminError> {
        self.enter("directory_exists", node)?;
        self.inner.directory_exists(node, path)
    }

    fn file_exists(&self, node: &NodeConnection, path: &str) -> Result<bool, AdminError> {
        self.enter("file_exists", node)?;
        self.inner.file_exists(node, path)
    }

    fn login_for_sid(&self, node: &NodeConnection, sid: &str) -> Result<Option<String>, AdminError> {
        self.enter("login_for_sid", node)?;
        self.inner.login_for_sid(node, sid)
    }

    fn login_exists(&self, node: &NodeConnection, login: &str) -> Result<bool, AdminError> {
        self.enter("login_exists", node)?;
        self.inner.login_exists(node, login)
    }

    fn endpoint(&self, node: &NodeConnection) -> Result<Option<EndpointInfo>, AdminError> {
        self.enter("endpoint", node)?;
        self.inner.endpoint(node)
    }

    fn quorum_votes(&self, node: &NodeConnection) -> Result<Vec<QuorumVote>, AdminError> {
        self.enter("quorum_votes", node)?;
        self.inner.quorum_votes(node)
    }

    fn group_state(&self, node: &NodeConnection, group: &str) -> Result<Option<GroupState>, AdminError> {
        self.enter("group_state", node)?;
        self.inner.group_state(node, group)
    }

    fn read_backup_header(&self, node: &NodeConnection, device: &str) -> Result<Vec<BackupHeader>, AdminError> {
        self.enter("read_backup_header", node)?;
        self.inner.read_backup_header(node, device)
    }

    fn create_login(&self, node: &NodeConnection, login: &str) -> Result<(), AdminError> {
        self.enter("create_login", node)?;
        self.inner.create_login(node, login)
    }

    fn create_endpoint(&self, node: &NodeConnection, endpoint: &EndpointDefinition) -> Result<(), AdminError> {
        self.enter("create_endpoint", node)?;
        self.inner.create_endpoint(node, endpoint)
    }

    fn alter_endpoint_role(&self, node: &NodeConnection, endpoint: &str, role: MirroringRole) -> Result<(), AdminError> {
        self.enter("alter_endpoint_role", node)?;
        self.inner.alter_endpoint_role(node, endpoint, role)
    }

    fn start_endpoint(&self, node: &NodeConnection, endpoint: &str) -> Result<(), AdminError> {
        self.enter("start_endpoint", node)?;
        self.inner.start_endpoint(node, endpoint)
    }

    fn drop_endpoint(&self, node: &NodeConnection, endpoint: &str) -> Result<(), AdminError> {
        self.enter("drop_endpoint", node)?;
        self.inner.drop_endpoint(node, endpoint)
    }

    fn grant_connect(&self, node: &NodeConnection, endpoint: &str, login: &str) -> Result<(), AdminError> {
        self.enter("grant_connect", node)?;
        self.inner.grant_connect(node, endpoint, login)
    }

    fn start_xevent_session(&self, node: &NodeConnection, session: &str) -> Result<(), AdminError> {
        self.enter("start_xevent_session", node)?;
        self.inner.start_xevent_session(node, session)
    }

    fn create_availability_group(&self, node: &NodeConnection, topology: &TopologySnapshot) -> Result<(), AdminError> {
        self.enter("create_availability_group", node)?;
        self.inner.create_availability_group(node, topology)
    }

    fn add_replicas(&self, node: &NodeConnection, topology: &TopologySnapshot, replicas: &[&ReplicaSpec]) -> Result<(), AdminError> {
        self.enter("add_replicas", node)?;
        self.inner.add_replicas(node, topology, replicas)
    }

    fn join_group(&self, node: &NodeConnection, topology: &TopologySnapshot) -> Result<(), AdminError> {
        self.enter("join_group", node)?;
        self.inner.join_group(node, topology)
    }

    fn create_listener(&self, node: &NodeConnection, group: &str, listener: &ListenerSpec) -> Result<(), AdminError> {
        self.enter("create_listener", node)?;
        self.inner.create_listener(node, group, listener)
    }

    fn add_databases(&self, node: &NodeConnection, group: &str, databases: &[&str]) -> Result<(), AdminError> {
        self.enter("add_databases", node)?;
        self.inner.add_databases(node, group, databases)
    }

    fn grant_create_any_database(&self, node: &NodeConnection, group: &str) -> Result<(), AdminError> {
        self.enter("grant_create_any_database", node)?;
        self.inner.grant_create_any_database(node, group)
    }

    fn create_database(&self, node: &NodeConnection, name: &str) -> Result<(), AdminError> {
        self.enter("create_database", node)?;
        self.inner.create_database(node, name)
    }

    fn drop_database(&self, node: &NodeConnection, name: &str) -> Result<(), AdminError> {
        self.enter("drop_database", node)?;
        self.inner.drop_database(node, name)
    }

    fn backup(&self, node: &NodeConnection, request: &BackupRequest) -> Result<(), AdminError> {
        self.enter("backup", node)?;
        self.inner.backup(node, request)
    }

    fn restore(&self, node: &NodeConnection, request: &RestoreRequest) -> Result<(), AdminError> {
        self.enter("restore", node)?;
        self.inner.restore(node, request)
    }

    fn join_database(&self, node: &NodeConnection, group: &str, database: &str) -> Result<(), AdminError> {
        self.enter("join_database", node)?;
        self.inner.join_database(node, group, database)
    }

    fn add_database_credential(&self, node: &NodeConnection, database: &str, password: &Secret) -> Result<(), AdminError> {
        self.enter("add_database_credential", node)?;
        self.inner.add_database_credential(node, database, password)
    }

    fn failover(&self, node: &NodeConnection, group: &str, allow_data_loss: bool) -> Result<(), AdminError> {
        self.enter("failover", node)?;
        self.inner.failover(node, group, allow_data_loss)
    }

    fn abort_operation(&self, node: &NodeConnection) -> Result<(), AdminError> {
        self.enter("abort_operation", node)?;
        self.inner.abort_operation(node)
    }
}
