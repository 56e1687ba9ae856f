use super::{
    tsql, AdminError, AdminSurface, BackupHeader, BackupRequest, DatabaseInfo, EndpointDefinition,
    EndpointInfo, GroupState, QuorumVote, RestoreRequest, ServerInfo,
};
use crate::connection::NodeConnection;
use crate::database::Secret;
use crate::listener::ListenerSpec;
use crate::replica::ReplicaSpec;
use crate::snapshot::TopologySnapshot;
use crate::types::MirroringRole;
use hadr_kernel::script::ScriptTarget;

/// Wraps an [`AdminSurface`] so that mutations against a capturing
/// connection are recorded as statements on that connection instead of
/// being executed. Queries always reach the inner surface.
#[derive(Debug, Clone)]
pub struct ScriptingAdmin<A> {
    inner: A,
}

impl<A: AdminSurface> ScriptingAdmin<A> {
    /// Wrap `inner`.
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    /// The wrapped surface.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn mutate(
        &self,
        node: &NodeConnection,
        statement: impl FnOnce() -> String,
        execute: impl FnOnce(&A) -> Result<(), AdminError>,
    ) -> Result<(), AdminError> {
        if node.is_capturing() {
            node.record(statement());
            Ok(())
        } else {
            execute(&self.inner)
        }
    }
}

impl<A: AdminSurface> AdminSurface for ScriptingAdmin<A> {
    fn server_info(&self, node: &NodeConnection) -> Result<ServerInfo, AdminError> {
        self.inner.server_info(node)
    }

    fn database(&self, node: &NodeConnection, name: &str) -> Result<Option<DatabaseInfo>, AdminError> {
        self.inner.database(node, name)
    }

    fn database_names(&self, node: &NodeConnection) -> Result<Vec<String>, AdminError> {
        self.inner.database_names(node)
    }

    fn free_space_kb(&self, node: &NodeConnection, path: &str) -> Result<u64, AdminError> {
        self.inner.free_space_kb(node, path)
    }

    fn directory_exists(&self, node: &NodeConnection, path: &str) -> Result<bool, AdminError> {
        self.inner.directory_exists(node, path)
    }

    fn file_exists(&self, node: &NodeConnection, path: &str) -> Result<bool, AdminError> {
        self.inner.file_exists(node, path)
    }

    fn login_for_sid(&self, node: &NodeConnection, sid: &str) -> Result<Option<String>, AdminError> {
        self.inner.login_for_sid(node, sid)
    }

    fn login_exists(&self, node: &NodeConnection, login: &str) -> Result<bool, AdminError> {
        self.inner.login_exists(node, login)
    }

    fn endpoint(&self, node: &NodeConnection) -> Result<Option<EndpointInfo>, AdminError> {
        self.inner.endpoint(node)
    }

    fn quorum_votes(&self, node: &NodeConnection) -> Result<Vec<QuorumVote>, AdminError> {
        self.inner.quorum_votes(node)
    }

    fn group_state(&self, node: &NodeConnection, group: &str) -> Result<Option<GroupState>, AdminError> {
        self.inner.group_state(node, group)
    }

    fn read_backup_header(&self, node: &NodeConnection, device: &str) -> Result<Vec<BackupHeader>, AdminError> {
        self.inner.read_backup_header(node, device)
    }

    fn create_login(&self, node: &NodeConnection, login: &str) -> Result<(), AdminError> {
        self.mutate(node, || tsql::create_login(login), |a| a.create_login(node, login))
    }

    fn create_endpoint(&self, node: &NodeConnection, endpoint: &EndpointDefinition) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::create_endpoint(endpoint),
            |a| a.create_endpoint(node, endpoint),
        )
    }

    fn alter_endpoint_role(&self, node: &NodeConnection, endpoint: &str, role: MirroringRole) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::alter_endpoint_role(endpoint, role),
            |a| a.alter_endpoint_role(node, endpoint, role),
        )
    }

    fn start_endpoint(&self, node: &NodeConnection, endpoint: &str) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::start_endpoint(endpoint),
            |a| a.start_endpoint(node, endpoint),
        )
    }

    fn drop_endpoint(&self, node: &NodeConnection, endpoint: &str) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::drop_endpoint(endpoint),
            |a| a.drop_endpoint(node, endpoint),
        )
    }

    fn grant_connect(&self, node: &NodeConnection, endpoint: &str, login: &str) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::grant_connect(endpoint, login),
            |a| a.grant_connect(node, endpoint, login),
        )
    }

    fn start_xevent_session(&self, node: &NodeConnection, session: &str) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::start_xevent_session(session),
            |a| a.start_xevent_session(node, session),
        )
    }

    fn create_availability_group(&self, node: &NodeConnection, topology: &TopologySnapshot) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::create_availability_group(topology),
            |a| a.create_availability_group(node, topology),
        )
    }

    fn add_replicas(&self, node: &NodeConnection, topology: &TopologySnapshot, replicas: &[&ReplicaSpec]) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::add_replicas(topology, replicas),
            |a| a.add_replicas(node, topology, replicas),
        )
    }

    fn join_group(&self, node: &NodeConnection, topology: &TopologySnapshot) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::join_group(topology),
            |a| a.join_group(node, topology),
        )
    }

    fn create_listener(&self, node: &NodeConnection, group: &str, listener: &ListenerSpec) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::create_listener(group, listener),
            |a| a.create_listener(node, group, listener),
        )
    }

    fn add_databases(&self, node: &NodeConnection, group: &str, databases: &[&str]) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::add_databases(group, databases),
            |a| a.add_databases(node, group, databases),
        )
    }

    fn grant_create_any_database(&self, node: &NodeConnection, group: &str) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::grant_create_any_database(group),
            |a| a.grant_create_any_database(node, group),
        )
    }

    fn create_database(&self, node: &NodeConnection, name: &str) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::create_database(name),
            |a| a.create_database(node, name),
        )
    }

    fn drop_database(&self, node: &NodeConnection, name: &str) -> Result<(), AdminError> {
        self.mutate(node, || tsql::drop_database(name), |a| a.drop_database(node, name))
    }

    fn backup(&self, node: &NodeConnection, request: &BackupRequest) -> Result<(), AdminError> {
        self.mutate(node, || tsql::backup(request), |a| a.backup(node, request))
    }

    fn restore(&self, node: &NodeConnection, request: &RestoreRequest) -> Result<(), AdminError> {
        self.mutate(node, || tsql::restore(request), |a| a.restore(node, request))
    }

    fn join_database(&self, node: &NodeConnection, group: &str, database: &str) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::join_database(group, database),
            |a| a.join_database(node, group, database),
        )
    }

    fn add_database_credential(&self, node: &NodeConnection, database: &str, password: &Secret) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::add_database_credential(database, password),
            |a| a.add_database_credential(node, database, password),
        )
    }

    fn failover(&self, node: &NodeConnection, group: &str, allow_data_loss: bool) -> Result<(), AdminError> {
        self.mutate(
            node,
            || tsql::failover(group, allow_data_loss),
            |a| a.failover(node, group, allow_data_loss),
        )
    }

    fn abort_operation(&self, node: &NodeConnection) -> Result<(), AdminError> {
        self.inner.abort_operation(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{InMemoryAdmin, NodeFacts};
    use crate::types::HostPlatform;

    #[test]
    fn capturing_connection_records_instead_of_executing() {
        let memory = InMemoryAdmin::new().with_node(NodeFacts::new("R1", HostPlatform::Windows));
        let admin = ScriptingAdmin::new(memory);
        let node = NodeConnection::new("R1", HostPlatform::Windows);

        node.set_capture(true);
        admin.create_login(&node, "CORP\\svc").unwrap();
        assert_eq!(node.captured(), vec!["CREATE LOGIN [CORP\\svc] FROM WINDOWS"]);
        assert!(!admin.login_exists(&node, "CORP\\svc").unwrap());

        node.set_capture(false);
        admin.create_login(&node, "CORP\\svc").unwrap();
        assert!(admin.login_exists(&node, "CORP\\svc").unwrap());
        assert_eq!(node.captured().len(), 1);
    }
}
