//! Tasks and the task executor
//!
//! A [`Task`] is a named unit of work with a perform body, an optional
//! rollback body and an optional set of scriptable connections. The
//! [`TaskExecutor`] owns the retry loop; bodies only ever run one attempt.

use crate::cancel::CancellationToken;
use crate::error::ExecutionError;
use crate::policy::ExecutionPolicy;
use crate::progress::{ProgressSink, TaskStatus};
use crate::retry::{self, LoopEvent, LoopOutcome};
use crate::script::ScriptTarget;
use std::sync::Arc;

/// What a task supports besides perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// [`Task::rollback_step`] undoes [`Task::perform_step`].
    pub rollback: bool,
}

impl Capabilities {
    /// Forward only.
    pub const PERFORM_ONLY: Self = Self { rollback: false };
    /// Forward and compensating bodies.
    pub const PERFORM_AND_ROLLBACK: Self = Self { rollback: true };
}

/// Handed to a task body for the duration of one attempt.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    name: &'a str,
    cancel: &'a CancellationToken,
    progress: &'a ProgressSink,
}

impl<'a> TaskContext<'a> {
    /// Context for the task called `name`.
    pub fn new(name: &'a str, cancel: &'a CancellationToken, progress: &'a ProgressSink) -> Self {
        Self {
            name,
            cancel,
            progress,
        }
    }

    /// Whether the run was cancelled while this attempt is running.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The run's token, for cancellable waits.
    pub fn cancellation(&self) -> &CancellationToken {
        self.cancel
    }

    /// Report intermediate progress, e.g. one secondary joined out of three.
    pub fn report(&self, details: impl Into<String>) {
        self.progress.task(self.name, details, TaskStatus::Running);
    }
}

/// A named administrative operation.
///
/// Bodies implement a single attempt and never retry on their own; the
/// [`TaskExecutor`] decides whether another attempt follows. A body that
/// reaches a state where retrying is pointless says so through the policy,
/// either with [`ExecutionPolicy::expire`] or by declaring an outcome.
pub trait Task: Send + Sync {
    /// Error raised by the bodies.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Display name, also used in progress records and logs.
    fn name(&self) -> &str;

    /// Perform only, unless overridden.
    fn capabilities(&self) -> Capabilities {
        Capabilities::PERFORM_ONLY
    }

    /// One attempt of the forward operation.
    fn perform_step(
        &self,
        policy: &mut dyn ExecutionPolicy,
        ctx: &TaskContext<'_>,
    ) -> Result<(), Self::Error>;

    /// One attempt of the compensating operation. Only called when
    /// [`Task::capabilities`] advertises rollback.
    fn rollback_step(
        &self,
        _policy: &mut dyn ExecutionPolicy,
        _ctx: &TaskContext<'_>,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Connections this task will issue administrative calls on.
    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        Vec::new()
    }

    /// Interrupt an in-flight long-running operation. Called out-of-band,
    /// typically from another thread while `perform` is blocked.
    fn abort(&self) -> Result<(), ExecutionError<Self::Error>> {
        Err(ExecutionError::AbortUnsupported {
            name: self.name().to_string(),
        })
    }
}

/// How a task invocation ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRun {
    /// The body succeeded on attempt `attempts`.
    Completed {
        /// Attempts made.
        attempts: u32,
    },
    /// Cancellation was observed before an attempt; the body may have run
    /// `attempts` times before that.
    Cancelled {
        /// Attempts made before cancellation.
        attempts: u32,
    },
    /// An override delegate replaced the loop.
    Delegated,
}

impl TaskRun {
    /// Whether the run stopped on cancellation.
    pub fn is_cancelled(self) -> bool {
        matches!(self, TaskRun::Cancelled { .. })
    }

    /// Attempts made, `None` for a delegated run.
    pub fn attempts(self) -> Option<u32> {
        match self {
            TaskRun::Completed { attempts } | TaskRun::Cancelled { attempts } => Some(attempts),
            TaskRun::Delegated => None,
        }
    }
}

impl From<LoopOutcome> for TaskRun {
    fn from(outcome: LoopOutcome) -> Self {
        match outcome {
            LoopOutcome::Completed { attempts } => TaskRun::Completed { attempts },
            LoopOutcome::Cancelled { attempts } => TaskRun::Cancelled { attempts },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Perform,
    Rollback,
}

impl Direction {
    fn metric_kind(self) -> &'static str {
        match self {
            Direction::Perform => "task",
            Direction::Rollback => "rollback",
        }
    }
}

/// Drives tasks through the retry loop, reporting to a progress sink.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutor {
    cancel: CancellationToken,
    progress: ProgressSink,
}

impl TaskExecutor {
    /// An executor observing `cancel` and reporting to `progress`.
    pub fn new(cancel: CancellationToken, progress: ProgressSink) -> Self {
        Self { cancel, progress }
    }

    /// Token checked before every attempt.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Where status changes go.
    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    /// Run [`Task::perform_step`] until it succeeds or `policy` gives up.
    ///
    /// Reports `Started`, then `Running` before each retry, then one of
    /// `Completed`, `Failed` or `Cancelled`. A terminal body failure comes
    /// back unchanged as [`ExecutionError::Failed`].
    pub fn perform<T>(
        &self,
        task: &T,
        policy: &mut dyn ExecutionPolicy,
    ) -> Result<TaskRun, ExecutionError<T::Error>>
    where
        T: Task + ?Sized,
    {
        self.drive(task, policy, Direction::Perform)
    }

    /// Run `delegate` instead of the loop. No progress is reported.
    pub fn perform_with<T, F>(
        &self,
        task: &T,
        policy: &mut dyn ExecutionPolicy,
        delegate: F,
    ) -> Result<TaskRun, ExecutionError<T::Error>>
    where
        T: Task + ?Sized,
        F: FnOnce(&mut dyn ExecutionPolicy) -> Result<(), T::Error>,
    {
        tracing::debug!(task = task.name(), "perform overridden by delegate");
        delegate(policy).map_err(ExecutionError::Failed)?;
        Ok(TaskRun::Delegated)
    }

    /// Like [`TaskExecutor::perform`] for [`Task::rollback_step`]. Fails with
    /// [`ExecutionError::RollbackUnsupported`] unless the task advertises it.
    pub fn rollback<T>(
        &self,
        task: &T,
        policy: &mut dyn ExecutionPolicy,
    ) -> Result<TaskRun, ExecutionError<T::Error>>
    where
        T: Task + ?Sized,
    {
        ensure_rollback(task)?;
        self.drive(task, policy, Direction::Rollback)
    }

    /// Rollback counterpart of [`TaskExecutor::perform_with`].
    pub fn rollback_with<T, F>(
        &self,
        task: &T,
        policy: &mut dyn ExecutionPolicy,
        delegate: F,
    ) -> Result<TaskRun, ExecutionError<T::Error>>
    where
        T: Task + ?Sized,
        F: FnOnce(&mut dyn ExecutionPolicy) -> Result<(), T::Error>,
    {
        ensure_rollback(task)?;
        tracing::debug!(task = task.name(), "rollback overridden by delegate");
        delegate(policy).map_err(ExecutionError::Failed)?;
        Ok(TaskRun::Delegated)
    }

    fn drive<T>(
        &self,
        task: &T,
        policy: &mut dyn ExecutionPolicy,
        direction: Direction,
    ) -> Result<TaskRun, ExecutionError<T::Error>>
    where
        T: Task + ?Sized,
    {
        let name = task.name();
        let span = tracing::info_span!("task", name, direction = ?direction);
        let _entered = span.enter();

        let ctx = TaskContext::new(name, &self.cancel, &self.progress);
        let progress = &self.progress;
        let report = |event: LoopEvent<'_>| {
            let status = match event {
                LoopEvent::Started => TaskStatus::Started,
                LoopEvent::Retrying { .. } => TaskStatus::Running,
                LoopEvent::Cancelled => TaskStatus::Cancelled,
                LoopEvent::Failed { .. } => TaskStatus::Failed,
                LoopEvent::Completed => TaskStatus::Completed,
            };
            progress.task(name, event.details(), status);
        };

        let outcome = retry::run(
            direction.metric_kind(),
            name,
            policy,
            Some(&self.cancel),
            report,
            |policy| match direction {
                Direction::Perform => task.perform_step(policy, &ctx),
                Direction::Rollback => task.rollback_step(policy, &ctx),
            },
        )?;
        Ok(outcome.into())
    }
}

fn ensure_rollback<T: Task + ?Sized>(task: &T) -> Result<(), ExecutionError<T::Error>> {
    if task.capabilities().rollback {
        Ok(())
    } else {
        Err(ExecutionError::RollbackUnsupported {
            name: task.name().to_string(),
        })
    }
}
