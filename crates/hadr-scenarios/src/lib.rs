//! HADR Scenarios (hadr-scenarios)
//!
//! Availability-group changes built on the kernel:
//! - [`error`]: one error enum for every validator and task, classified for
//!   the runner
//! - [`validators`] and [`tasks`]: the pre-flight checks and administrative
//!   steps
//! - [`providers`]: Create-AG, Add-Replica, Add-Database and Failover
//!
//! ```rust,ignore
//! use hadr_scenarios::prelude::*;
//!
//! let document = TopologyDocument::load("topology.toml")?;
//! let (topology, admin) = document.into_parts();
//! let provider = CreateAvailabilityGroupProvider::new(Arc::new(topology), Arc::new(admin))?;
//! let report = ScenarioRunner::new(EngineConfig::default()).run(&provider)?;
//! ```

pub mod context;
pub mod error;
pub mod providers;
pub mod tasks;
pub mod validators;

pub use context::ScenarioContext;
pub use error::{HadrError, Result};

/// Everything needed to build and run a scenario.
pub mod prelude {
    pub use crate::context::ScenarioContext;
    pub use crate::error::HadrError;
    pub use crate::providers::{
        AddDatabaseProvider, AddReplicasProvider, CreateAvailabilityGroupProvider,
        FailoverProvider, FailoverRequest,
    };
    pub use crate::validators::DatabaseSet;
    pub use hadr_kernel::prelude::*;
    pub use hadr_model::admin::{AdminSurface, InMemoryAdmin, NodeFacts, ScriptingAdmin};
    pub use hadr_model::{TopologyDocument, TopologySnapshot};
}
