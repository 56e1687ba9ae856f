//! Capture-mode scripting
//!
//! A scriptable task exposes the connections it will act on. Switching those
//! connections into capture mode makes every mutating call record the
//! equivalent statement instead of executing it; the task body is unaware of
//! the difference.

use crate::error::ExecutionError;
use crate::policy::ExecutionPolicy;
use crate::task::{Task, TaskExecutor, TaskRun};
use std::fmt;
use std::sync::Arc;

/// A node connection that can be toggled between execute and capture mode.
pub trait ScriptTarget: Send + Sync + fmt::Debug {
    /// Stable name of the node behind the connection.
    fn target_name(&self) -> &str;

    /// Switch capture mode on or off.
    fn set_capture(&self, capture: bool);

    /// Whether mutating calls are being recorded.
    fn is_capturing(&self) -> bool;

    /// Takes every statement recorded since the last call.
    fn take_captured(&self) -> Vec<String>;
}

/// Statements captured for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedScript {
    /// Node name.
    pub target: String,
    /// Statements in the order they were recorded.
    pub statements: Vec<String>,
}

impl CapturedScript {
    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Statements joined with batch separators.
    pub fn render(&self) -> String {
        let mut out = format!("-- {}\n", self.target);
        for statement in &self.statements {
            out.push_str(statement);
            out.push_str("\nGO\n");
        }
        out
    }
}

/// Result of a captured run: the task outcome plus what each target recorded.
#[derive(Debug)]
pub struct ScriptRun {
    /// How the task run ended.
    pub run: TaskRun,
    /// One entry per target, in target order.
    pub scripts: Vec<CapturedScript>,
}

/// Restores execute mode on drop.
struct CaptureGuard {
    targets: Vec<Arc<dyn ScriptTarget>>,
}

impl CaptureGuard {
    fn engage(targets: Vec<Arc<dyn ScriptTarget>>) -> Self {
        for target in &targets {
            target.set_capture(true);
        }
        Self { targets }
    }

    fn collect(&self) -> Vec<CapturedScript> {
        let mut scripts: Vec<CapturedScript> = Vec::new();
        for target in &self.targets {
            let statements = target.take_captured();
            // A task may list the same node twice.
            match scripts
                .iter_mut()
                .find(|s| s.target == target.target_name())
            {
                Some(existing) => existing.statements.extend(statements),
                None => scripts.push(CapturedScript {
                    target: target.target_name().to_string(),
                    statements,
                }),
            }
        }
        scripts
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        for target in &self.targets {
            target.set_capture(false);
        }
    }
}

/// Perform `task` with all of its script targets in capture mode.
///
/// Execute mode is restored on every target before returning, whether the
/// task succeeded or not. Statements captured before a failure are
/// discarded along with the error.
pub fn capture<T>(
    executor: &TaskExecutor,
    task: &T,
    policy: &mut dyn ExecutionPolicy,
) -> Result<ScriptRun, ExecutionError<T::Error>>
where
    T: Task + ?Sized,
{
    let targets = task.script_targets();
    tracing::debug!(task = task.name(), targets = targets.len(), "capturing script");
    let guard = CaptureGuard::engage(targets);
    let run = executor.perform(task, policy)?;
    let scripts = guard.collect();
    Ok(ScriptRun { run, scripts })
}

/// Whether `task` can produce a script at all.
pub fn is_scriptable<T: Task + ?Sized>(task: &T) -> bool {
    !task.script_targets().is_empty()
}
