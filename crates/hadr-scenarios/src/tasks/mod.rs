//! Administrative tasks
//!
//! Each task does one administrative step against one or more nodes. Bodies
//! run a single attempt; the executor's policy decides on retries. Tasks that
//! mutate a node list its connection in `script_targets` so the step can be
//! captured as a script instead of executed.

mod database;
mod group;
mod node;

pub use database::{
    AddDatabaseCredentialTask, AddDatabasesToGroupTask, BackupDatabaseTask,
    GrantCreateAnyDatabaseTask, JoinDatabaseTask, RestoreDatabaseTask,
};
pub use group::{
    AddReplicasTask, CreateAvailabilityGroupTask, CreateListenerTask, FailoverTask,
    JoinSecondariesTask, QuorumVoteTask, WaitForGroupOnlineTask,
};
pub use node::{ConfigureEndpointsTask, CreateLoginsTask, StartXeventSessionTask};

/// Health session started on every new replica.
pub const HEALTH_SESSION: &str = "AlwaysOn_health";
