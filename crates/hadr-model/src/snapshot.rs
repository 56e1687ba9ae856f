//! Topology snapshot
//!
//! The desired end state of one availability group change. Owned by the
//! caller and shared read-only with every provider, validator and task of a
//! run. The only write is the group handle, recorded once by the task that
//! creates the group.

use crate::admin::AdminSurface;
use crate::database::DatabaseSpec;
use crate::listener::ListenerSpec;
use crate::replica::{is_domain_account, ReplicaSpec};
use crate::types::{ClusterType, DataSynchronization, HostPlatform, ObjectState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Why a topology document was rejected.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The file could not be read.
    #[error("failed to read topology file {}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying read failure.
        #[source]
        source: std::io::Error,
    },
    /// The TOML did not match the expected shape.
    #[error("failed to parse topology")]
    Parse(#[from] toml::de::Error),
    /// A structural rule was broken.
    #[error("invalid topology: {0}")]
    Invalid(String),
    /// The group handle is write-once.
    #[error("group handle for '{group}' was already recorded")]
    HandleAlreadyRecorded {
        /// Group name.
        group: String,
    },
}

/// Handle to the administered group, recorded after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHandle {
    /// Group name.
    pub name: String,
    /// Replica that was primary at creation.
    pub primary: String,
    /// When the group was created.
    pub created_at: DateTime<Utc>,
}

/// A login a replica needs so that another replica's service account can
/// connect to its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredLogin {
    /// Login name.
    pub name: String,
    /// The SID already maps to a login on the replica.
    pub exists: bool,
}

/// Desired end state of the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologySnapshot {
    /// Group name.
    pub group_name: String,
    /// Cluster technology.
    #[serde(default)]
    pub cluster_type: ClusterType,
    /// Cluster name, when clustered.
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// Whether the group itself exists already.
    #[serde(default)]
    pub state: ObjectState,
    /// Every replica, existing or new.
    pub replicas: Vec<ReplicaSpec>,
    /// Databases the scenario adds.
    #[serde(default)]
    pub new_databases: Vec<DatabaseSpec>,
    /// Databases already in the group.
    #[serde(default)]
    pub existing_databases: Vec<DatabaseSpec>,
    /// How secondaries get their copies.
    #[serde(default)]
    pub data_sync: DataSynchronization,
    /// Share used by Windows replicas.
    #[serde(default)]
    pub backup_location_windows: Option<String>,
    /// Path used by Linux replicas.
    #[serde(default)]
    pub backup_location_linux: Option<String>,
    /// Listener to create, if any.
    #[serde(default)]
    pub listener: Option<ListenerSpec>,
    /// Basic group: two replicas and one database.
    #[serde(default)]
    pub is_basic: bool,
    /// Contained group with its own system databases.
    #[serde(default)]
    pub is_contained: bool,
    /// Reuse contained system databases left by an earlier group.
    #[serde(default)]
    pub reuse_system_databases: bool,
    /// Per-database DTC support.
    #[serde(default)]
    pub dtc_support: bool,
    /// Database-level health detection.
    #[serde(default)]
    pub database_health_trigger: bool,
    /// Secondaries that must harden a commit.
    #[serde(default)]
    pub required_synchronized_secondaries_to_commit: u32,
    #[serde(skip)]
    group_handle: OnceLock<GroupHandle>,
}

impl TopologySnapshot {
    /// A group being created, with default settings.
    pub fn new(group_name: impl Into<String>, replicas: Vec<ReplicaSpec>) -> Self {
        Self {
            group_name: group_name.into(),
            cluster_type: ClusterType::default(),
            cluster_name: None,
            state: ObjectState::Creating,
            replicas,
            new_databases: Vec::new(),
            existing_databases: Vec::new(),
            data_sync: DataSynchronization::default(),
            backup_location_windows: None,
            backup_location_linux: None,
            listener: None,
            is_basic: false,
            is_contained: false,
            reuse_system_databases: false,
            dtc_support: false,
            database_health_trigger: false,
            required_synchronized_secondaries_to_commit: 0,
            group_handle: OnceLock::new(),
        }
    }

    /// Parse and validate a topology document.
    pub fn from_toml_str(input: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = toml::from_str(input)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Read, parse and validate the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Structural checks that do not need a live node.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.group_name.trim().is_empty() {
            return Err(SnapshotError::Invalid("group_name is empty".into()));
        }
        let primaries = self.replicas.iter().filter(|r| r.is_primary()).count();
        if primaries != 1 {
            return Err(SnapshotError::Invalid(format!(
                "expected exactly one primary replica, found {primaries}"
            )));
        }
        let mut names = HashSet::new();
        for replica in &self.replicas {
            if !names.insert(replica.name.to_ascii_lowercase()) {
                return Err(SnapshotError::Invalid(format!(
                    "replica '{}' is listed twice",
                    replica.name
                )));
            }
        }
        let mut databases = HashSet::new();
        for db in self.new_databases.iter().chain(&self.existing_databases) {
            if !databases.insert(db.name.to_ascii_lowercase()) {
                return Err(SnapshotError::Invalid(format!(
                    "database '{}' is listed twice",
                    db.name
                )));
            }
        }
        Ok(())
    }

    /// Set the databases to add.
    pub fn with_databases(mut self, databases: Vec<DatabaseSpec>) -> Self {
        self.new_databases = databases;
        self
    }

    /// Set the synchronization mode.
    pub fn with_data_sync(mut self, data_sync: DataSynchronization) -> Self {
        self.data_sync = data_sync;
        self
    }

    /// Set the listener.
    pub fn with_listener(mut self, listener: ListenerSpec) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set the backup locations per platform.
    pub fn with_backup_location(mut self, windows: Option<&str>, linux: Option<&str>) -> Self {
        self.backup_location_windows = windows.map(str::to_string);
        self.backup_location_linux = linux.map(str::to_string);
        self
    }

    /// The single primary.
    pub fn primary_replica(&self) -> Option<&ReplicaSpec> {
        self.replicas.iter().find(|r| r.is_primary())
    }

    /// Replica by name, ignoring case.
    pub fn replica(&self, name: &str) -> Option<&ReplicaSpec> {
        self.replicas
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Every secondary, configuration-only included.
    pub fn secondaries(&self) -> impl Iterator<Item = &ReplicaSpec> {
        self.replicas.iter().filter(|r| r.is_secondary())
    }

    /// Secondaries that hold data, i.e. not configuration-only.
    pub fn data_secondaries(&self) -> impl Iterator<Item = &ReplicaSpec> {
        self.replicas.iter().filter(|r| r.is_data_secondary())
    }

    /// Secondaries being added by this change.
    pub fn new_secondaries(&self) -> impl Iterator<Item = &ReplicaSpec> {
        self.secondaries().filter(|r| r.is_new())
    }

    /// Full synchronization only.
    pub fn will_perform_backup_restore(&self) -> bool {
        self.data_sync == DataSynchronization::Full
    }

    /// Every mode except manual.
    pub fn will_perform_database_join(&self) -> bool {
        matches!(
            self.data_sync,
            DataSynchronization::Full
                | DataSynchronization::JoinOnly
                | DataSynchronization::AutomaticSeeding
        )
    }

    /// Full synchronization or automatic seeding.
    pub fn will_perform_database_initialization(&self) -> bool {
        matches!(
            self.data_sync,
            DataSynchronization::Full | DataSynchronization::AutomaticSeeding
        )
    }

    /// Automatic seeding only.
    pub fn will_perform_automatic_seeding(&self) -> bool {
        self.data_sync == DataSynchronization::AutomaticSeeding
    }

    /// Non-blank backup location for `platform`.
    pub fn backup_path_for(&self, platform: HostPlatform) -> Option<&str> {
        match platform {
            HostPlatform::Windows => self.backup_location_windows.as_deref(),
            HostPlatform::Linux => self.backup_location_linux.as_deref(),
        }
        .filter(|p| !p.trim().is_empty())
    }

    /// Whether a backup location is set for at least one platform.
    pub fn has_backup_location(&self) -> bool {
        self.backup_path_for(HostPlatform::Windows).is_some()
            || self.backup_path_for(HostPlatform::Linux).is_some()
    }

    /// Full device path of `file_name` in the backup share as seen from `platform`.
    pub fn backup_device_for(&self, platform: HostPlatform, file_name: &str) -> Option<String> {
        self.backup_path_for(platform).map(|base| {
            let separator = match platform {
                HostPlatform::Windows => '\\',
                HostPlatform::Linux => '/',
            };
            let base = base.trim_end_matches(['\\', '/']);
            format!("{base}{separator}{file_name}")
        })
    }

    /// Whether replicas run on more than one platform.
    pub fn is_cross_platform(&self) -> bool {
        let Some(primary) = self.primary_replica() else {
            return false;
        };
        self.secondaries().any(|r| r.platform != primary.platform)
    }

    /// System databases a contained group carries.
    pub fn contained_system_databases(&self) -> Vec<String> {
        if !self.is_contained {
            return Vec::new();
        }
        vec![
            format!("{}_master", self.group_name),
            format!("{}_msdb", self.group_name),
        ]
    }

    /// New or existing database by name, ignoring case.
    pub fn database(&self, name: &str) -> Option<&DatabaseSpec> {
        self.new_databases
            .iter()
            .chain(&self.existing_databases)
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Handle recorded by the create task.
    pub fn group_handle(&self) -> Option<&GroupHandle> {
        self.group_handle.get()
    }

    /// Record the administered group. Write-once.
    pub fn record_group_handle(&self, handle: GroupHandle) -> Result<(), SnapshotError> {
        self.group_handle
            .set(handle)
            .map_err(|_| SnapshotError::HandleAlreadyRecorded {
                group: self.group_name.clone(),
            })
    }

    /// Logins `replica` needs for the service accounts of the other replicas.
    ///
    /// Only Windows replicas authenticate endpoints with service accounts.
    /// Accounts are de-duplicated by SID; when the SID already maps to a
    /// login on the replica, that login name is used. Only `DOMAIN\user`
    /// accounts qualify.
    pub fn login_names(&self, replica: &ReplicaSpec, admin: &dyn AdminSurface) -> Vec<RequiredLogin> {
        if replica.platform != HostPlatform::Windows {
            return Vec::new();
        }

        let mut sids: Vec<(String, &str)> = Vec::new();
        for other in &self.replicas {
            if other.name.eq_ignore_ascii_case(&replica.name) {
                continue;
            }
            let (Some(sid), Some(account)) = (&other.service_account_sid, &other.service_account)
            else {
                continue;
            };
            let sid = sid.to_ascii_lowercase();
            if !sids.iter().any(|(known, _)| *known == sid) {
                sids.push((sid, account.as_str()));
            }
        }

        let mut logins: Vec<RequiredLogin> = Vec::new();
        for (sid, account) in sids {
            let existing = match admin.login_for_sid(replica.connection(), &sid) {
                Ok(found) => found,
                Err(e) => {
                    tracing::debug!(replica = %replica.name, %sid, error = %e, "SID lookup failed");
                    None
                }
            };
            let (name, exists) = match existing {
                Some(local) => (local, true),
                None => (account.to_string(), false),
            };
            if !is_domain_account(&name) || logins.iter().any(|l| l.name == name) {
                continue;
            }
            logins.push(RequiredLogin { name, exists });
        }
        logins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AvailabilityMode;

    fn three_nodes() -> TopologySnapshot {
        TopologySnapshot::new(
            "ag1",
            vec![
                ReplicaSpec::primary("R1"),
                ReplicaSpec::secondary("R2"),
                ReplicaSpec::secondary("W1")
                    .with_availability_mode(AvailabilityMode::ConfigurationOnly),
            ],
        )
    }

    #[test]
    fn data_secondaries_skip_configuration_only() {
        let topology = three_nodes();
        assert_eq!(topology.secondaries().count(), 2);
        let data: Vec<_> = topology.data_secondaries().map(|r| r.name.as_str()).collect();
        assert_eq!(data, vec!["R2"]);
        assert_eq!(topology.primary_replica().map(|r| r.name.as_str()), Some("R1"));
    }

    #[test]
    fn sync_mode_views() {
        let topology = three_nodes().with_data_sync(DataSynchronization::JoinOnly);
        assert!(!topology.will_perform_backup_restore());
        assert!(topology.will_perform_database_join());
        assert!(!topology.will_perform_database_initialization());

        let manual = three_nodes().with_data_sync(DataSynchronization::Manual);
        assert!(!manual.will_perform_database_join());
    }

    #[test]
    fn backup_device_uses_platform_separator() {
        let topology =
            three_nodes().with_backup_location(Some("\\\\share\\backups\\"), Some("/mnt/backups"));
        assert_eq!(
            topology.backup_device_for(HostPlatform::Windows, "Sales.bak"),
            Some("\\\\share\\backups\\Sales.bak".to_string())
        );
        assert_eq!(
            topology.backup_device_for(HostPlatform::Linux, "Sales.bak"),
            Some("/mnt/backups/Sales.bak".to_string())
        );
    }

    #[test]
    fn group_handle_is_write_once() {
        let topology = three_nodes();
        let handle = GroupHandle {
            name: "ag1".into(),
            primary: "R1".into(),
            created_at: Utc::now(),
        };
        assert!(topology.record_group_handle(handle.clone()).is_ok());
        assert!(matches!(
            topology.record_group_handle(handle),
            Err(SnapshotError::HandleAlreadyRecorded { .. })
        ));
        assert_eq!(topology.group_handle().map(|h| h.primary.as_str()), Some("R1"));
    }

    #[test]
    fn two_primaries_are_rejected() {
        let topology = TopologySnapshot::new(
            "ag1",
            vec![ReplicaSpec::primary("R1"), ReplicaSpec::primary("R2")],
        );
        assert!(matches!(topology.validate(), Err(SnapshotError::Invalid(_))));
    }

    #[test]
    fn contained_groups_seed_system_databases() {
        let mut topology = three_nodes();
        assert!(topology.contained_system_databases().is_empty());
        topology.is_contained = true;
        assert_eq!(
            topology.contained_system_databases(),
            vec!["ag1_master", "ag1_msdb"]
        );
    }
}
