use hadr_kernel::prelude::*;
use hadr_kernel::script::{self, ScriptTarget};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("transient failure #{0}")]
struct Transient(u32);

struct AlwaysFails {
    calls: AtomicU32,
}

impl AlwaysFails {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Task for AlwaysFails {
    type Error = Transient;

    fn name(&self) -> &str {
        "Join secondaries"
    }

    fn perform_step(
        &self,
        _policy: &mut dyn ExecutionPolicy,
        _ctx: &TaskContext<'_>,
    ) -> Result<(), Transient> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(Transient(call))
    }
}

struct DeclaresFailure;

impl Task for DeclaresFailure {
    type Error = Transient;

    fn name(&self) -> &str {
        "Wait for online"
    }

    fn perform_step(
        &self,
        policy: &mut dyn ExecutionPolicy,
        _ctx: &TaskContext<'_>,
    ) -> Result<(), Transient> {
        policy.fail();
        Ok(())
    }
}

#[test]
fn test_fixed_retry_count_runs_body_four_times_and_returns_last_error() {
    let executor = TaskExecutor::default();
    let task = AlwaysFails::new();
    let mut policy = FixedRetryCountPolicy::new(3, Duration::from_millis(1));

    let err = executor.perform(&task, &mut policy).unwrap_err();

    assert_eq!(task.calls(), 4);
    assert_eq!(err.into_body_error(), Some(Transient(4)));
}

#[test]
fn test_run_once_never_retries() {
    let (sink, feed) = ProgressChannel::unbounded();
    let executor = TaskExecutor::new(CancellationToken::new(), sink);
    let task = AlwaysFails::new();

    let err = executor
        .perform(&task, &mut RunOncePolicy::new())
        .unwrap_err();

    assert_eq!(task.calls(), 1);
    assert_eq!(err.to_string(), "transient failure #1");
    let statuses = ProgressFeed::task_statuses(&feed.drain(), "Join secondaries");
    assert_eq!(statuses, vec![TaskStatus::Started, TaskStatus::Failed]);
}

#[test]
fn test_no_sleep_after_final_attempt() {
    let executor = TaskExecutor::default();
    let task = AlwaysFails::new();
    let mut policy = FixedRetryCountPolicy::new(0, Duration::from_secs(30));

    let started = Instant::now();
    assert!(executor.perform(&task, &mut policy).is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_cancellation_before_first_attempt_skips_body() {
    let (sink, feed) = ProgressChannel::unbounded();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let executor = TaskExecutor::new(cancel, sink);
    let task = AlwaysFails::new();

    let run = executor
        .perform(&task, &mut FixedRetryCountPolicy::new(3, Duration::ZERO))
        .unwrap();

    assert_eq!(run, TaskRun::Cancelled { attempts: 0 });
    assert_eq!(task.calls(), 0);
    let statuses = ProgressFeed::task_statuses(&feed.drain(), "Join secondaries");
    assert_eq!(statuses, vec![TaskStatus::Started, TaskStatus::Cancelled]);
}

#[test]
fn test_cancellation_between_retries_stops_the_loop() {
    struct CancelsItself {
        cancel: CancellationToken,
        calls: AtomicU32,
    }

    impl Task for CancelsItself {
        type Error = Transient;

        fn name(&self) -> &str {
            "Restore database"
        }

        fn perform_step(
            &self,
            _policy: &mut dyn ExecutionPolicy,
            _ctx: &TaskContext<'_>,
        ) -> Result<(), Transient> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.cancel.cancel();
            Err(Transient(call))
        }
    }

    let cancel = CancellationToken::new();
    let executor = TaskExecutor::new(cancel.clone(), ProgressSink::disabled());
    let task = CancelsItself {
        cancel,
        calls: AtomicU32::new(0),
    };

    let run = executor
        .perform(&task, &mut FixedRetryCountPolicy::new(5, Duration::ZERO))
        .unwrap();

    assert_eq!(run, TaskRun::Cancelled { attempts: 1 });
    assert_eq!(task.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_declared_failure_is_distinct_from_body_error() {
    let executor = TaskExecutor::default();
    let err = executor
        .perform(&DeclaresFailure, &mut FixedRetryCountPolicy::new(3, Duration::ZERO))
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::DeclaredFailed { attempts: 1, .. }
    ));
}

#[test]
fn test_pre_expired_policy_reports_exhaustion() {
    let executor = TaskExecutor::default();
    let task = AlwaysFails::new();
    let mut policy = RunOncePolicy::new();
    policy.expire();

    let err = executor.perform(&task, &mut policy).unwrap_err();

    assert!(matches!(err, ExecutionError::Exhausted { attempts: 0, .. }));
    assert_eq!(task.calls(), 0);
}

#[test]
fn test_progress_history_reports_each_retry_then_failure() {
    let (sink, feed) = ProgressChannel::unbounded();
    let executor = TaskExecutor::new(CancellationToken::new(), sink.clone());
    let task = AlwaysFails::new();
    sink.task(task.name(), "", TaskStatus::NotStart);

    let _ = executor.perform(&task, &mut FixedRetryCountPolicy::new(2, Duration::ZERO));

    let statuses = ProgressFeed::task_statuses(&feed.drain(), "Join secondaries");
    assert_eq!(
        statuses,
        vec![
            TaskStatus::NotStart,
            TaskStatus::Started,
            TaskStatus::Running,
            TaskStatus::Running,
            TaskStatus::Failed
        ]
    );
}

#[derive(Debug, Default)]
struct RecordingTarget {
    name: String,
    capturing: AtomicBool,
    captured: Mutex<Vec<String>>,
    executed: AtomicU32,
}

impl RecordingTarget {
    fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Self::default()
        })
    }

    fn issue(&self, statement: &str) {
        if self.is_capturing() {
            self.captured.lock().unwrap().push(statement.to_string());
        } else {
            self.executed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl ScriptTarget for RecordingTarget {
    fn target_name(&self) -> &str {
        &self.name
    }

    fn set_capture(&self, capture: bool) {
        self.capturing.store(capture, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn take_captured(&self) -> Vec<String> {
        std::mem::take(&mut *self.captured.lock().unwrap())
    }
}

struct CreateLogins {
    nodes: Vec<Arc<RecordingTarget>>,
    fail: bool,
}

impl Task for CreateLogins {
    type Error = Transient;

    fn name(&self) -> &str {
        "Create logins"
    }

    fn perform_step(
        &self,
        _policy: &mut dyn ExecutionPolicy,
        _ctx: &TaskContext<'_>,
    ) -> Result<(), Transient> {
        for node in &self.nodes {
            node.issue(&format!("CREATE LOGIN [CORP\\svc] FROM WINDOWS -- {}", node.name));
        }
        if self.fail {
            return Err(Transient(1));
        }
        Ok(())
    }

    fn script_targets(&self) -> Vec<Arc<dyn ScriptTarget>> {
        self.nodes
            .iter()
            .map(|n| Arc::clone(n) as Arc<dyn ScriptTarget>)
            .collect()
    }
}

#[test]
fn test_capture_collects_statements_and_restores_execute_mode() {
    let nodes = vec![RecordingTarget::named("R1"), RecordingTarget::named("R2")];
    let task = CreateLogins {
        nodes: nodes.clone(),
        fail: false,
    };

    let run = script::capture(&TaskExecutor::default(), &task, &mut RunOncePolicy::new()).unwrap();

    assert_eq!(run.run, TaskRun::Completed { attempts: 1 });
    assert_eq!(run.scripts.len(), 2);
    assert_eq!(run.scripts[0].target, "R1");
    assert_eq!(run.scripts[0].statements.len(), 1);
    assert!(run.scripts[1].render().contains("GO"));
    for node in &nodes {
        assert!(!node.is_capturing());
        assert_eq!(node.executed.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn test_capture_restores_execute_mode_on_failure() {
    let nodes = vec![RecordingTarget::named("R1")];
    let task = CreateLogins {
        nodes: nodes.clone(),
        fail: true,
    };

    let result = script::capture(&TaskExecutor::default(), &task, &mut RunOncePolicy::new());

    assert!(result.is_err());
    assert!(!nodes[0].is_capturing());
    assert!(script::is_scriptable(&task));
}

#[test]
fn test_override_delegate_replaces_the_loop() {
    let (sink, feed) = ProgressChannel::unbounded();
    let executor = TaskExecutor::new(CancellationToken::new(), sink);
    let task = AlwaysFails::new();
    let mut policy = FixedRetryCountPolicy::new(3, Duration::ZERO);

    let run = executor
        .perform_with(&task, &mut policy, |policy| {
            policy.succeed();
            Ok(())
        })
        .unwrap();

    assert_eq!(run, TaskRun::Delegated);
    assert_eq!(task.calls(), 0);
    assert!(feed.drain().is_empty());
    assert_eq!(policy.outcome(), Outcome::Succeeded);
}

#[test]
fn test_rollback_without_capability_is_refused_silently() {
    let (sink, feed) = ProgressChannel::unbounded();
    let executor = TaskExecutor::new(CancellationToken::new(), sink);
    let task = AlwaysFails::new();

    let err = executor
        .rollback(&task, &mut RunOncePolicy::new())
        .unwrap_err();

    assert!(matches!(err, ExecutionError::RollbackUnsupported { .. }));
    assert!(err.is_unsupported());
    assert_eq!(task.calls(), 0);
    assert!(feed.drain().is_empty());
}

#[test]
fn test_rollback_runs_the_compensating_body() {
    struct DropsDatabase {
        rolled_back: AtomicU32,
    }

    impl Task for DropsDatabase {
        type Error = Transient;

        fn name(&self) -> &str {
            "Create scratch database"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::PERFORM_AND_ROLLBACK
        }

        fn perform_step(
            &self,
            _policy: &mut dyn ExecutionPolicy,
            _ctx: &TaskContext<'_>,
        ) -> Result<(), Transient> {
            Ok(())
        }

        fn rollback_step(
            &self,
            _policy: &mut dyn ExecutionPolicy,
            _ctx: &TaskContext<'_>,
        ) -> Result<(), Transient> {
            self.rolled_back.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let task = DropsDatabase {
        rolled_back: AtomicU32::new(0),
    };
    let run = TaskExecutor::default()
        .rollback(&task, &mut RunOncePolicy::new())
        .unwrap();

    assert_eq!(run, TaskRun::Completed { attempts: 1 });
    assert_eq!(task.rolled_back.load(Ordering::SeqCst), 1);
}

#[test]
fn test_abort_is_unsupported_by_default() {
    let err = AlwaysFails::new().abort().unwrap_err();
    assert!(matches!(err, ExecutionError::AbortUnsupported { ref name } if name == "Join secondaries"));
}

struct MissingDirectory {
    calls: AtomicU32,
}

impl Validator for MissingDirectory {
    type Error = Transient;

    fn name(&self) -> &str {
        "Checking database file paths"
    }

    fn validate(
        &self,
        policy: &mut dyn ExecutionPolicy,
        progress: &ValidatorProgress<'_>,
    ) -> Result<(), Transient> {
        policy.expire();
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        progress.report("D:\\Data does not exist", "Failed");
        Err(Transient(call))
    }
}

#[test]
fn test_validator_propagates_on_first_attempt_without_sleeping() {
    let (sink, feed) = ProgressChannel::unbounded();
    let validator = MissingDirectory {
        calls: AtomicU32::new(0),
    };
    let mut policy = FixedRetryCountPolicy::new(5, Duration::from_secs(30));

    let started = Instant::now();
    let err = ValidationExecutor::new(sink)
        .run(&validator, &mut policy)
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.into_body_error(), Some(Transient(1)));
    let details: Vec<String> = feed
        .drain()
        .iter()
        .map(|r| r.event.details().to_string())
        .collect();
    assert!(details.iter().any(|d| d.contains("D:\\Data")));
}
