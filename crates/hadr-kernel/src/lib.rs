//! HADR Kernel (hadr-kernel)
//!
//! Generic orchestration engine for multi-step administrative changes:
//! 1. **Validation phase**: run named precondition checks, each single-attempt
//! 2. **Task phase**: run an ordered plan of tasks, each under a retry policy
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use hadr_kernel::prelude::*;
//!
//! let (sink, feed) = ProgressChannel::unbounded();
//! let runner = ScenarioRunner::new(EngineConfig::default()).with_progress(sink);
//! let report = runner.run(&provider)?;
//! for record in feed.drain() {
//!     println!("{} {}", record.event.name(), record.event.details());
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod policy;
pub mod progress;
pub mod provider;
pub mod runner;
pub mod script;
pub mod task;
pub mod validator;

mod retry;

pub use error::*;

/// Common imports for providers, validators and tasks.
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::config::{EngineConfig, PolicySpec};
    pub use crate::error::{Cancelled, Classified, ErrorCategory, ExecutionError};
    pub use crate::plan::{PlanError, PlanStep, StepId, TaskPlan};
    pub use crate::policy::{
        ExecutionPolicy, FixedRetryCountPolicy, FixedTimeoutRetryPolicy, Outcome, RunOncePolicy,
    };
    pub use crate::progress::{
        ProgressChannel, ProgressEvent, ProgressFeed, ProgressRecord, ProgressSink, TaskStatus,
    };
    pub use crate::provider::{BoxedTask, BoxedValidator, ScenarioProvider};
    pub use crate::runner::{ScenarioError, ScenarioReport, ScenarioRunner, ScenarioWarning};
    pub use crate::script::{CapturedScript, ScriptTarget};
    pub use crate::task::{Capabilities, Task, TaskContext, TaskExecutor, TaskRun};
    pub use crate::validator::{ValidationExecutor, Validator, ValidatorProgress};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
