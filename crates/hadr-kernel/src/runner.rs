//! Scenario runner
//!
//! Runs a provider's validators, then its tasks, strictly one after the
//! other on the calling thread. The first unrecovered error ends the run.

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{Classified, ErrorCategory, ExecutionError};
use crate::plan::PlanError;
use crate::progress::{ProgressSink, TaskStatus};
use crate::provider::{BoxedTask, ScenarioProvider};
use crate::task::TaskExecutor;
use crate::validator::ValidationExecutor;
use serde::Serialize;
use uuid::Uuid;

/// A validation warning the run continued past.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioWarning {
    /// Validator that raised the warning.
    pub validator: String,
    /// The warning text.
    pub message: String,
}

/// What a run got through. Produced on success and on cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// Fresh for every run, also recorded on the run's tracing span.
    pub run_id: Uuid,
    /// Provider name.
    pub scenario: String,
    /// Validators that passed, in order.
    pub validators_passed: Vec<String>,
    /// Validators disabled in the configuration.
    pub validators_skipped: Vec<String>,
    /// Warnings the run continued past.
    pub warnings: Vec<ScenarioWarning>,
    /// Tasks that completed, in order.
    pub tasks_completed: Vec<String>,
    /// Task at which cancellation was observed.
    pub cancelled_at: Option<String>,
}

impl ScenarioReport {
    fn new(scenario: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scenario: scenario.to_string(),
            validators_passed: Vec::new(),
            validators_skipped: Vec::new(),
            warnings: Vec::new(),
            tasks_completed: Vec::new(),
            cancelled_at: None,
        }
    }

    /// Whether the run stopped on cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }
}

/// Why a scenario run stopped.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError<E> {
    /// A validator reported an error, or a warning under
    /// `treat_warnings_as_errors`.
    #[error("validation '{validator}' failed")]
    Validation {
        /// Name of the failing validator.
        validator: String,
        /// What the retry loop ended with.
        #[source]
        error: ExecutionError<E>,
    },
    /// A task failed.
    #[error("task '{task}' failed")]
    Task {
        /// Name of the failing task.
        task: String,
        /// What the retry loop ended with.
        #[source]
        error: ExecutionError<E>,
    },
    /// The provider's task plan is inconsistent.
    #[error("invalid task plan")]
    Plan(#[source] PlanError),
    /// Rollback was requested for a scenario that cannot undo itself.
    #[error("scenario '{scenario}' does not support rollback")]
    RollbackUnavailable {
        /// Scenario name.
        scenario: String,
    },
}

impl<E: Classified> ScenarioError<E> {
    /// Category of the underlying failure. Plan and rollback errors are
    /// argument errors.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScenarioError::Validation { error, .. } | ScenarioError::Task { error, .. } => {
                error.category()
            }
            ScenarioError::Plan(_) | ScenarioError::RollbackUnavailable { .. } => {
                ErrorCategory::Argument
            }
        }
    }
}

impl<E> ScenarioError<E> {
    /// The typed error raised by the failing validator or task body.
    pub fn body_error(&self) -> Option<&E> {
        match self {
            ScenarioError::Validation { error, .. } | ScenarioError::Task { error, .. } => {
                error.body_error()
            }
            ScenarioError::Plan(_) | ScenarioError::RollbackUnavailable { .. } => None,
        }
    }
}

/// Drives providers one at a time on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    config: EngineConfig,
    cancel: CancellationToken,
    progress: ProgressSink,
}

impl ScenarioRunner {
    /// A runner with its own cancellation token and no progress feed.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            progress: ProgressSink::disabled(),
        }
    }

    /// Send progress records to `progress`.
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Share `cancel` with the caller.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Settings the runner was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token that cancels the run from another thread.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Validators, then tasks.
    pub fn run<P>(&self, provider: &P) -> Result<ScenarioReport, ScenarioError<P::Error>>
    where
        P: ScenarioProvider + ?Sized,
    {
        let span = tracing::info_span!("scenario", name = provider.name());
        let _entered = span.enter();

        let mut report = ScenarioReport::new(provider.name());
        tracing::info!(run_id = %report.run_id, "scenario started");

        self.run_validators(provider, &mut report)?;

        let plan = provider.plan();
        plan.verify().map_err(ScenarioError::Plan)?;
        self.run_tasks(&plan.into_items(), &mut report)?;

        tracing::info!(
            run_id = %report.run_id,
            tasks = report.tasks_completed.len(),
            warnings = report.warnings.len(),
            cancelled = report.is_cancelled(),
            "scenario finished"
        );
        Ok(report)
    }

    /// Only the validation phase.
    pub fn validate<P>(&self, provider: &P) -> Result<ScenarioReport, ScenarioError<P::Error>>
    where
        P: ScenarioProvider + ?Sized,
    {
        let mut report = ScenarioReport::new(provider.name());
        self.run_validators(provider, &mut report)?;
        Ok(report)
    }

    /// Run the provider's compensating tasks.
    pub fn rollback<P>(&self, provider: &P) -> Result<ScenarioReport, ScenarioError<P::Error>>
    where
        P: ScenarioProvider + ?Sized,
    {
        let Some(tasks) = provider.rollback_tasks() else {
            return Err(ScenarioError::RollbackUnavailable {
                scenario: provider.name().to_string(),
            });
        };
        let mut report = ScenarioReport::new(provider.name());
        tracing::info!(run_id = %report.run_id, scenario = provider.name(), "rollback started");
        self.run_tasks(&tasks, &mut report)?;
        Ok(report)
    }

    fn run_validators<P>(
        &self,
        provider: &P,
        report: &mut ScenarioReport,
    ) -> Result<(), ScenarioError<P::Error>>
    where
        P: ScenarioProvider + ?Sized,
    {
        let executor = ValidationExecutor::new(self.progress.clone());
        for validator in provider.validators() {
            let name = validator.name().to_string();
            if self.config.is_validator_disabled(&name) {
                tracing::info!(validator = %name, "validator disabled, skipping");
                self.progress
                    .validator(&name, "disabled by configuration", "Skipped");
                report.validators_skipped.push(name);
                continue;
            }

            let mut policy = self.config.validation.policy.build();
            match executor.run(validator.as_ref(), policy.as_mut()) {
                Ok(_) => report.validators_passed.push(name),
                Err(error)
                    if error.category().is_warning() && !self.config.treat_warnings_as_errors =>
                {
                    tracing::warn!(validator = %name, %error, "validation warning");
                    report.warnings.push(ScenarioWarning {
                        validator: name,
                        message: error.to_string(),
                    });
                }
                Err(error) => {
                    return Err(ScenarioError::Validation {
                        validator: name,
                        error,
                    })
                }
            }
        }
        Ok(())
    }

    fn run_tasks<E>(
        &self,
        tasks: &[BoxedTask<E>],
        report: &mut ScenarioReport,
    ) -> Result<(), ScenarioError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        for task in tasks {
            self.progress.task(task.name(), "", TaskStatus::NotStart);
        }

        let executor = TaskExecutor::new(self.cancel.clone(), self.progress.clone());
        for task in tasks {
            let mut policy = self.config.tasks.policy.build();
            match executor.perform(task.as_ref(), policy.as_mut()) {
                Ok(run) if run.is_cancelled() => {
                    report.cancelled_at = Some(task.name().to_string());
                    return Ok(());
                }
                Ok(_) => report.tasks_completed.push(task.name().to_string()),
                Err(error) => {
                    return Err(ScenarioError::Task {
                        task: task.name().to_string(),
                        error,
                    })
                }
            }
        }
        Ok(())
    }
}
