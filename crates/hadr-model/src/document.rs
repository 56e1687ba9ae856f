//! Topology documents
//!
//! A TOML file pairing the desired topology with the facts of each node,
//! enough to drive a scenario against the in-memory surface.
//!
//! ```toml
//! [topology]
//! group_name = "ag1"
//! data_sync = "join_only"
//!
//! [[topology.replicas]]
//! name = "R1"
//! role = "primary"
//!
//! [[nodes]]
//! name = "R1"
//! ```

use crate::admin::{InMemoryAdmin, NodeFacts};
use crate::snapshot::{SnapshotError, TopologySnapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A topology plus the node facts the in-memory surface starts from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyDocument {
    /// The desired end state.
    pub topology: TopologySnapshot,
    /// One entry per replica.
    #[serde(default)]
    pub nodes: Vec<NodeFacts>,
}

impl TopologyDocument {
    /// Parse a document. Every replica needs a `[[nodes]]` entry.
    pub fn from_toml_str(input: &str) -> Result<Self, SnapshotError> {
        let document: Self = toml::from_str(input)?;
        document.topology.validate()?;
        for replica in &document.topology.replicas {
            let described = document
                .nodes
                .iter()
                .any(|n| n.name.eq_ignore_ascii_case(&replica.name));
            if !described {
                return Err(SnapshotError::Invalid(format!(
                    "replica '{}' has no [[nodes]] entry",
                    replica.name
                )));
            }
        }
        Ok(document)
    }

    /// Read and parse the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// The topology and a surface seeded with the node facts.
    pub fn into_parts(self) -> (TopologySnapshot, InMemoryAdmin) {
        let admin = InMemoryAdmin::from_nodes(self.nodes);
        (self.topology, admin)
    }
}
