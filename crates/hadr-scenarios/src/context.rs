//! Shared scenario state
//!
//! Every validator and task of a run holds a clone of the same
//! [`ScenarioContext`]: the topology snapshot and the administration surface.

use crate::error::{HadrError, Result};
use hadr_kernel::script::ScriptTarget;
use hadr_model::admin::{AdminSurface, DatabaseFile, DatabaseInfo, FileMove, ServerInfo};
use hadr_model::{HostPlatform, ReplicaSpec, TopologySnapshot};
use std::fmt;
use std::sync::Arc;

/// The topology and admin surface one scenario run works against.
#[derive(Clone)]
pub struct ScenarioContext {
    topology: Arc<TopologySnapshot>,
    admin: Arc<dyn AdminSurface>,
}

impl fmt::Debug for ScenarioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioContext")
            .field("group", &self.topology.group_name)
            .field("replicas", &self.topology.replicas.len())
            .finish_non_exhaustive()
    }
}

impl ScenarioContext {
    /// Wraps the shared snapshot and surface; cloning the context is cheap.
    pub fn new(topology: Arc<TopologySnapshot>, admin: Arc<dyn AdminSurface>) -> Self {
        Self { topology, admin }
    }

    /// The desired end state.
    pub fn topology(&self) -> &TopologySnapshot {
        &self.topology
    }

    /// The administration surface every check and step goes through.
    pub fn admin(&self) -> &dyn AdminSurface {
        self.admin.as_ref()
    }

    /// Name of the availability group.
    pub fn group(&self) -> &str {
        &self.topology.group_name
    }

    /// The primary replica, or [`HadrError::InvalidTopology`] if none is declared.
    pub fn primary(&self) -> Result<&ReplicaSpec> {
        self.topology
            .primary_replica()
            .ok_or_else(|| HadrError::InvalidTopology("the topology has no primary replica".into()))
    }

    /// Looks up a replica by name.
    pub fn replica(&self, name: &str) -> Result<&ReplicaSpec> {
        self.topology
            .replica(name)
            .ok_or_else(|| HadrError::InvalidTopology(format!("replica '{name}' is not in the topology")))
    }

    /// The connection of `replica` as a script target.
    pub fn target(&self, replica: &ReplicaSpec) -> Arc<dyn ScriptTarget> {
        replica.connection().clone()
    }

    /// Inspects the node behind `replica`.
    pub fn server_info(&self, replica: &ReplicaSpec) -> Result<ServerInfo> {
        self.admin
            .server_info(replica.connection())
            .map_err(|source| HadrError::ServerUnavailable {
                server: replica.name.clone(),
                source,
            })
    }

    /// The database as the primary sees it.
    pub fn primary_database(&self, name: &str) -> Result<Option<DatabaseInfo>> {
        let primary = self.primary()?;
        self.admin
            .database(primary.connection(), name)
            .map_err(|e| HadrError::admin("Read database properties", e))
    }

    /// Checks that decide whether a scenario can be attempted against
    /// `replica` at all.
    pub fn check_server(&self, replica: &ReplicaSpec) -> Result<ServerInfo> {
        let info = self.server_info(replica)?;
        if !info.hadr_enabled {
            return Err(HadrError::HadrNotEnabled {
                server: replica.name.clone(),
            });
        }
        if !info.view_server_state {
            return Err(HadrError::ViewServerStateDenied {
                server: replica.name.clone(),
            });
        }
        if !info.quorum_state.is_in_quorum() {
            return Err(HadrError::NotInQuorum {
                server: replica.name.clone(),
                state: info.quorum_state,
            });
        }
        Ok(info)
    }

    /// Every platform that will read or write the backup share needs a
    /// location.
    pub fn check_backup_locations<'a>(&self, replicas: impl IntoIterator<Item = &'a ReplicaSpec>) -> Result<()> {
        for replica in replicas {
            if self.topology.backup_path_for(replica.platform).is_none() {
                return Err(HadrError::BackupLocationMissing {
                    group: self.topology.group_name.clone(),
                    platform: replica.platform.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether master-key credential tasks are needed for `database`. A
    /// failed lookup on the primary is an error, not a "no".
    pub fn credential_needed(&self, database: &str) -> Result<bool> {
        let password = self
            .topology
            .database(database)
            .is_some_and(|d| d.master_key_password.is_some());
        if !password {
            return Ok(false);
        }
        Ok(self
            .primary_database(database)?
            .is_some_and(|info| info.accessible && info.has_master_key))
    }

    /// Databases among `names` that carry a master key on the primary.
    pub fn master_key_databases<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for name in names {
            if self.primary_database(name)?.is_some_and(|info| info.has_master_key) {
                found.push(name.to_string());
            }
        }
        Ok(found)
    }
}

/// Where one primary file lands on a secondary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlacement {
    /// The file as it exists on the primary.
    pub file: DatabaseFile,
    /// Full path on the secondary.
    pub target: String,
    /// True when `target` differs from the primary path.
    pub relocated: bool,
}

/// Files keep their path unless the secondary runs on another platform, in
/// which case they move to the secondary's default directories.
pub fn place_files(
    files: &[DatabaseFile],
    primary: HostPlatform,
    secondary: &ServerInfo,
) -> Vec<FilePlacement> {
    files
        .iter()
        .map(|file| {
            if secondary.platform == primary {
                return FilePlacement {
                    file: file.clone(),
                    target: file.path.clone(),
                    relocated: false,
                };
            }
            let directory = match file.kind {
                hadr_model::admin::FileKind::Data => &secondary.default_data_path,
                hadr_model::admin::FileKind::Log => &secondary.default_log_path,
            };
            let separator = match secondary.platform {
                HostPlatform::Windows => '\\',
                HostPlatform::Linux => '/',
            };
            FilePlacement {
                file: file.clone(),
                target: format!(
                    "{}{separator}{}",
                    directory.trim_end_matches(['\\', '/']),
                    file.file_name()
                ),
                relocated: true,
            }
        })
        .collect()
}

/// The `MOVE` clauses a restore needs for relocated files.
pub fn relocations(placements: &[FilePlacement]) -> Vec<FileMove> {
    placements
        .iter()
        .filter(|p| p.relocated)
        .map(|p| FileMove {
            logical_name: p.file.logical_name.clone(),
            path: p.target.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hadr_model::admin::FileKind;
    use hadr_model::ClusterQuorumState;

    fn linux_server() -> ServerInfo {
        ServerInfo {
            name: "L1".into(),
            platform: HostPlatform::Linux,
            hadr_enabled: true,
            view_server_state: true,
            quorum_state: ClusterQuorumState::NormalQuorum,
            default_data_path: "/var/opt/mssql/data/".into(),
            default_log_path: "/var/opt/mssql/log".into(),
        }
    }

    #[test]
    fn cross_platform_files_move_to_default_directories() {
        let files = vec![
            DatabaseFile {
                logical_name: "Sales".into(),
                path: "D:\\Data\\Sales.mdf".into(),
                kind: FileKind::Data,
                size_kb: 10,
            },
            DatabaseFile {
                logical_name: "Sales_log".into(),
                path: "E:\\Logs\\Sales_log.ldf".into(),
                kind: FileKind::Log,
                size_kb: 2,
            },
        ];
        let placements = place_files(&files, HostPlatform::Windows, &linux_server());
        assert_eq!(placements[0].target, "/var/opt/mssql/data/Sales.mdf");
        assert_eq!(placements[1].target, "/var/opt/mssql/log/Sales_log.ldf");
        assert_eq!(relocations(&placements).len(), 2);

        let same = place_files(&files, HostPlatform::Linux, &linux_server());
        assert!(relocations(&same).is_empty());
        assert_eq!(same[0].target, "D:\\Data\\Sales.mdf");
    }
}
