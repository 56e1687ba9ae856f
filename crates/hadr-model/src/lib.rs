//! HADR Model (hadr-model)
//!
//! Domain data for availability-group scenarios:
//! - [`TopologySnapshot`]: the desired end state, shared read-only by a run
//! - [`NodeConnection`]: one node, switchable into capture mode
//! - [`AdminSurface`](admin::AdminSurface): blocking administrative calls,
//!   with a scripting decorator and an in-memory implementation

pub mod admin;
pub mod connection;
pub mod database;
pub mod document;
pub mod listener;
pub mod replica;
pub mod snapshot;
pub mod types;

pub use connection::NodeConnection;
pub use database::{DatabaseSpec, Secret};
pub use document::TopologyDocument;
pub use listener::{ListenerAddress, ListenerSpec};
pub use replica::{EndpointSpec, ReplicaSpec};
pub use snapshot::{GroupHandle, RequiredLogin, SnapshotError, TopologySnapshot};
pub use types::*;
