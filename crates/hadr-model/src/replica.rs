//! Replica settings.

use crate::connection::NodeConnection;
use crate::types::{
    AvailabilityMode, EndpointEncryption, FailoverMode, HostPlatform, MirroringRole, ObjectState,
    ReadableSecondary, ReplicaRole,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Endpoint name used when the document does not set one.
pub const DEFAULT_ENDPOINT_NAME: &str = "Hadr_endpoint";
/// Endpoint port used when the document does not set one.
pub const DEFAULT_ENDPOINT_PORT: u16 = 5022;
/// Backup priority of a replica that does not set one.
pub const DEFAULT_BACKUP_PRIORITY: u8 = 50;

fn default_endpoint_name() -> String {
    DEFAULT_ENDPOINT_NAME.to_string()
}

fn default_endpoint_port() -> u16 {
    DEFAULT_ENDPOINT_PORT
}

fn default_backup_priority() -> u8 {
    DEFAULT_BACKUP_PRIORITY
}

fn default_true() -> bool {
    true
}

/// Database-mirroring endpoint settings of one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    /// Endpoint name.
    #[serde(default = "default_endpoint_name")]
    pub name: String,
    /// TCP port.
    #[serde(default = "default_endpoint_port")]
    pub port: u16,
    /// Explicit URL; derived from the host name and port when absent.
    #[serde(default)]
    pub url: Option<String>,
    /// Encryption setting.
    #[serde(default)]
    pub encryption: EndpointEncryption,
    /// An endpoint already exists on the node.
    #[serde(default)]
    pub present: bool,
    /// The wizard may create or alter the endpoint.
    #[serde(default = "default_true")]
    pub can_be_configured: bool,
}

impl Default for EndpointSpec {
    fn default() -> Self {
        Self {
            name: default_endpoint_name(),
            port: DEFAULT_ENDPOINT_PORT,
            url: None,
            encryption: EndpointEncryption::default(),
            present: false,
            can_be_configured: true,
        }
    }
}

/// One replica of the group as the caller wants it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicaSpec {
    /// Server instance name.
    pub name: String,
    /// Intended role.
    pub role: ReplicaRole,
    /// Operating system of the instance.
    #[serde(default)]
    pub platform: HostPlatform,
    /// Fully qualified host name used in the endpoint URL.
    #[serde(default)]
    pub fqdn: Option<String>,
    /// Commit mode.
    #[serde(default)]
    pub availability_mode: AvailabilityMode,
    /// Failover mode.
    #[serde(default)]
    pub failover_mode: FailoverMode,
    /// 0 to 100. Higher is preferred for backups.
    #[serde(default = "default_backup_priority")]
    pub backup_priority: u8,
    /// Connections accepted in the secondary role.
    #[serde(default)]
    pub readable_secondary: ReadableSecondary,
    /// URL read-intent connections are routed to.
    #[serde(default)]
    pub read_only_routing_url: Option<String>,
    /// Replicas read-intent connections go to while this one is primary.
    #[serde(default)]
    pub read_only_routing_list: Vec<String>,
    /// Whether the replica is already in the group.
    #[serde(default)]
    pub state: ObjectState,
    /// Mirroring endpoint settings.
    #[serde(default)]
    pub endpoint: EndpointSpec,
    /// `DOMAIN\user` account the instance runs as.
    #[serde(default)]
    pub service_account: Option<String>,
    /// Hex-encoded SID of [`ReplicaSpec::service_account`].
    #[serde(default)]
    pub service_account_sid: Option<String>,
    #[serde(skip)]
    connection: OnceLock<Arc<NodeConnection>>,
}

impl PartialEq for ReplicaSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.role == other.role
            && self.platform == other.platform
            && self.fqdn == other.fqdn
            && self.availability_mode == other.availability_mode
            && self.failover_mode == other.failover_mode
            && self.backup_priority == other.backup_priority
            && self.readable_secondary == other.readable_secondary
            && self.read_only_routing_url == other.read_only_routing_url
            && self.read_only_routing_list == other.read_only_routing_list
            && self.state == other.state
            && self.endpoint == other.endpoint
            && self.service_account == other.service_account
            && self.service_account_sid == other.service_account_sid
    }
}

impl ReplicaSpec {
    /// A new replica with default settings.
    pub fn new(name: impl Into<String>, role: ReplicaRole) -> Self {
        Self {
            name: name.into(),
            role,
            platform: HostPlatform::default(),
            fqdn: None,
            availability_mode: AvailabilityMode::default(),
            failover_mode: FailoverMode::default(),
            backup_priority: DEFAULT_BACKUP_PRIORITY,
            readable_secondary: ReadableSecondary::default(),
            read_only_routing_url: None,
            read_only_routing_list: Vec::new(),
            state: ObjectState::Creating,
            endpoint: EndpointSpec::default(),
            service_account: None,
            service_account_sid: None,
            connection: OnceLock::new(),
        }
    }

    /// A new primary replica.
    pub fn primary(name: impl Into<String>) -> Self {
        Self::new(name, ReplicaRole::Primary)
    }

    /// A new secondary replica.
    pub fn secondary(name: impl Into<String>) -> Self {
        Self::new(name, ReplicaRole::Secondary)
    }

    /// Set the platform.
    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    /// Set whether the replica already exists.
    pub fn with_state(mut self, state: ObjectState) -> Self {
        self.state = state;
        self
    }

    /// Set the commit mode.
    pub fn with_availability_mode(mut self, mode: AvailabilityMode) -> Self {
        self.availability_mode = mode;
        self
    }

    /// Set the failover mode.
    pub fn with_failover_mode(mut self, mode: FailoverMode) -> Self {
        self.failover_mode = mode;
        self
    }

    /// Set the service account and its SID.
    pub fn with_service_account(mut self, account: impl Into<String>, sid: impl Into<String>) -> Self {
        self.service_account = Some(account.into());
        self.service_account_sid = Some(sid.into());
        self
    }

    /// The shared connection to this replica's node.
    pub fn connection(&self) -> &Arc<NodeConnection> {
        self.connection
            .get_or_init(|| Arc::new(NodeConnection::new(self.name.clone(), self.platform)))
    }

    /// Whether the replica is meant to be the primary.
    pub fn is_primary(&self) -> bool {
        self.role == ReplicaRole::Primary
    }

    /// Whether the replica is meant to be a secondary.
    pub fn is_secondary(&self) -> bool {
        self.role == ReplicaRole::Secondary
    }

    /// Whether the scenario creates this replica.
    pub fn is_new(&self) -> bool {
        self.state == ObjectState::Creating
    }

    /// A secondary that will hold data.
    pub fn is_data_secondary(&self) -> bool {
        self.is_secondary() && self.availability_mode != AvailabilityMode::ConfigurationOnly
    }

    /// `TCP://<host>:<port>`, preferring an explicit URL.
    pub fn endpoint_url(&self) -> String {
        if let Some(url) = self.endpoint.url.as_ref().filter(|u| !u.is_empty()) {
            return url.clone();
        }
        let host = self.fqdn.as_deref().unwrap_or(&self.name);
        format!("TCP://{host}:{}", self.endpoint.port)
    }

    /// Role new endpoints on this replica are created with.
    pub fn endpoint_role(&self) -> MirroringRole {
        if self.availability_mode == AvailabilityMode::ConfigurationOnly {
            MirroringRole::Witness
        } else {
            MirroringRole::All
        }
    }

    /// An endpoint the scenario may not touch counts as valid.
    pub fn has_valid_endpoint(&self) -> bool {
        if !self.endpoint.can_be_configured {
            return true;
        }
        !self.endpoint.name.is_empty() && self.endpoint.port > 0
    }
}

/// `DOMAIN\user`, excluding `.\user` local accounts.
pub fn is_domain_account(account: &str) -> bool {
    match account.split_once('\\') {
        Some((domain, user)) => !domain.is_empty() && domain != "." && !user.is_empty(),
        None => false,
    }
}
