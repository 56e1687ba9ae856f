//! Progress reporting
//!
//! Tasks and validators push [`ProgressRecord`]s into a queue that the caller
//! drains at its own pace. Nothing is dispatched back into caller code while
//! a body is blocked on a remote call. Records are kept in emission order; a
//! feed created after a record was sent never sees it.

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use std::fmt;

/// Lifecycle status of a task as seen by an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Announced by the runner before any task starts.
    NotStart,
    /// The first attempt is about to run.
    Started,
    /// An attempt failed and another one follows.
    Running,
    /// Cancellation was observed before an attempt.
    Cancelled,
    /// The task ended with an error.
    Failed,
    /// The task finished.
    Completed,
}

impl TaskStatus {
    /// Whether no further status follows.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Failed | TaskStatus::Completed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::NotStart => "not started",
            TaskStatus::Started => "started",
            TaskStatus::Running => "running",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
            TaskStatus::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// A single progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Status change of a task.
    Task {
        /// Task name.
        name: String,
        /// Free text, e.g. the error behind a retry.
        details: String,
        /// New status.
        status: TaskStatus,
    },
    /// Validators report free-text status.
    Validator {
        /// Validator name.
        name: String,
        /// Free text, e.g. the replica being checked.
        details: String,
        /// Free-text status such as `Started` or `Failed`.
        status: String,
    },
}

impl ProgressEvent {
    /// Task or validator name.
    pub fn name(&self) -> &str {
        match self {
            ProgressEvent::Task { name, .. } | ProgressEvent::Validator { name, .. } => name,
        }
    }

    /// Free-text details.
    pub fn details(&self) -> &str {
        match self {
            ProgressEvent::Task { details, .. } | ProgressEvent::Validator { details, .. } => {
                details
            }
        }
    }

    /// The status, for task events.
    pub fn task_status(&self) -> Option<TaskStatus> {
        match self {
            ProgressEvent::Task { status, .. } => Some(*status),
            ProgressEvent::Validator { .. } => None,
        }
    }
}

/// An event stamped with the time it was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    /// Emission time.
    pub at: DateTime<Utc>,
    /// What happened.
    pub event: ProgressEvent,
}

/// Sending half. Cheap to clone; a disabled sink drops every record.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<Sender<ProgressRecord>>,
}

impl ProgressSink {
    /// A sink that only mirrors events to tracing.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Whether a feed is attached.
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Log `event` at debug level and queue it for the feed.
    pub fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Task {
                name,
                details,
                status,
            } => tracing::debug!(task = %name, %status, details = %details, "task progress"),
            ProgressEvent::Validator {
                name,
                details,
                status,
            } => {
                tracing::debug!(validator = %name, %status, details = %details, "validator progress");
            }
        }
        if let Some(tx) = &self.tx {
            // A dropped feed means nobody is listening any more.
            let _ = tx.send(ProgressRecord {
                at: Utc::now(),
                event,
            });
        }
    }

    /// Emit a task status change.
    pub fn task(&self, name: &str, details: impl Into<String>, status: TaskStatus) {
        self.emit(ProgressEvent::Task {
            name: name.to_string(),
            details: details.into(),
            status,
        });
    }

    /// Emit a validator report.
    pub fn validator(&self, name: &str, details: impl Into<String>, status: impl Into<String>) {
        self.emit(ProgressEvent::Validator {
            name: name.to_string(),
            details: details.into(),
            status: status.into(),
        });
    }
}

/// Receiving half, drained by the caller.
#[derive(Debug)]
pub struct ProgressFeed {
    rx: Receiver<ProgressRecord>,
}

impl ProgressFeed {
    /// Next queued record without blocking.
    pub fn try_next(&self) -> Option<ProgressRecord> {
        self.rx.try_recv().ok()
    }

    /// Everything queued so far.
    pub fn drain(&self) -> Vec<ProgressRecord> {
        self.rx.try_iter().collect()
    }

    /// Drained task statuses reported under `name`, in order.
    pub fn task_statuses(records: &[ProgressRecord], name: &str) -> Vec<TaskStatus> {
        records
            .iter()
            .filter(|r| r.event.name() == name)
            .filter_map(|r| r.event.task_status())
            .collect()
    }
}

impl Iterator for ProgressFeed {
    type Item = ProgressRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next()
    }
}

/// Constructor for a connected sink and feed.
pub struct ProgressChannel;

impl ProgressChannel {
    /// A sink and the feed that receives everything sent through it.
    pub fn unbounded() -> (ProgressSink, ProgressFeed) {
        let (tx, rx) = channel::unbounded();
        (ProgressSink { tx: Some(tx) }, ProgressFeed { rx })
    }
}
