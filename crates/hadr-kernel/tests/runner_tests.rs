use hadr_kernel::config::ConfigError;
use hadr_kernel::prelude::*;
use hadr_kernel::provider::task_names;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error("listener is not configured")]
    NoListener,
    #[error("not enough disk space on {0}")]
    NoSpace(String),
    #[error("endpoint on {0} did not start")]
    Endpoint(String),
}

impl Classified for DemoError {
    fn category(&self) -> ErrorCategory {
        match self {
            DemoError::NoListener => ErrorCategory::ValidationWarning,
            DemoError::NoSpace(_) => ErrorCategory::ValidationError,
            DemoError::Endpoint(_) => ErrorCategory::Task,
        }
    }
}

struct Check {
    name: &'static str,
    outcome: fn() -> Result<(), DemoError>,
}

impl Validator for Check {
    type Error = DemoError;

    fn name(&self) -> &str {
        self.name
    }

    fn validate(
        &self,
        policy: &mut dyn ExecutionPolicy,
        _progress: &ValidatorProgress<'_>,
    ) -> Result<(), DemoError> {
        policy.expire();
        (self.outcome)()
    }
}

struct Step {
    name: String,
    fails: bool,
    cancel_after: Option<CancellationToken>,
    calls: Arc<AtomicU32>,
}

impl Task for Step {
    type Error = DemoError;

    fn name(&self) -> &str {
        &self.name
    }

    fn perform_step(
        &self,
        _policy: &mut dyn ExecutionPolicy,
        _ctx: &TaskContext<'_>,
    ) -> Result<(), DemoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_after {
            token.cancel();
        }
        if self.fails {
            return Err(DemoError::Endpoint(self.name.clone()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Demo {
    warn_listener: bool,
    no_space: bool,
    failing_task: Option<&'static str>,
    cancelling_task: Option<(&'static str, CancellationToken)>,
    broken_plan: bool,
    calls: Arc<AtomicU32>,
}

impl Demo {
    fn step(&self, name: &str) -> BoxedTask<DemoError> {
        Box::new(Step {
            name: name.to_string(),
            fails: self.failing_task == Some(name),
            cancel_after: self
                .cancelling_task
                .as_ref()
                .filter(|(n, _)| *n == name)
                .map(|(_, token)| token.clone()),
            calls: Arc::clone(&self.calls),
        })
    }
}

impl ScenarioProvider for Demo {
    type Error = DemoError;

    fn name(&self) -> &str {
        "demo"
    }

    fn validators(&self) -> Vec<BoxedValidator<DemoError>> {
        let disk: fn() -> Result<(), DemoError> = if self.no_space {
            || Err(DemoError::NoSpace("R2".into()))
        } else {
            || Ok(())
        };
        let listener: fn() -> Result<(), DemoError> = if self.warn_listener {
            || Err(DemoError::NoListener)
        } else {
            || Ok(())
        };
        vec![
            Box::new(Check {
                name: "Checking disk space",
                outcome: disk,
            }),
            Box::new(Check {
                name: "Checking listener configuration",
                outcome: listener,
            }),
        ]
    }

    fn plan(&self) -> TaskPlan<BoxedTask<DemoError>> {
        let mut plan = TaskPlan::new();
        if self.broken_plan {
            plan.push_after("join", ["create"], self.step("Join secondaries"));
            plan.push("create", self.step("Create availability group"));
            return plan;
        }
        let create = plan.push("create", self.step("Create availability group"));
        let wait = plan.push_after("wait", [create], self.step("Wait for online"));
        plan.push_after("join", [wait], self.step("Join secondaries"));
        plan
    }
}

fn runner() -> ScenarioRunner {
    ScenarioRunner::new(
        EngineConfig::default().with_task_policy(PolicySpec::FixedRetryCount {
            retries: 1,
            backoff_ms: 0,
        }),
    )
}

#[test]
fn test_successful_run_reports_every_step() {
    let (sink, feed) = ProgressChannel::unbounded();
    let report = runner().with_progress(sink).run(&Demo::default()).unwrap();

    assert_eq!(
        report.tasks_completed,
        vec![
            "Create availability group",
            "Wait for online",
            "Join secondaries"
        ]
    );
    assert_eq!(report.validators_passed.len(), 2);
    assert!(!report.is_cancelled());

    let records = feed.drain();
    let first_task_events: Vec<TaskStatus> = records
        .iter()
        .filter_map(|r| r.event.task_status())
        .take(3)
        .collect();
    assert_eq!(first_task_events, vec![TaskStatus::NotStart; 3]);
}

#[test]
fn test_warning_is_recorded_and_run_continues() {
    let demo = Demo {
        warn_listener: true,
        ..Demo::default()
    };
    let report = runner().run(&demo).unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].validator, "Checking listener configuration");
    assert_eq!(report.tasks_completed.len(), 3);
}

#[test]
fn test_warning_is_fatal_when_configured() {
    let demo = Demo {
        warn_listener: true,
        ..Demo::default()
    };
    let mut config = EngineConfig::default();
    config.treat_warnings_as_errors = true;
    let err = ScenarioRunner::new(config).run(&demo).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ValidationWarning);
    assert_eq!(demo.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_disabled_validator_is_skipped() {
    let demo = Demo {
        warn_listener: true,
        ..Demo::default()
    };
    let config = EngineConfig::default().disable_validator("Checking listener configuration");
    let report = ScenarioRunner::new(config).run(&demo).unwrap();
    assert!(report.warnings.is_empty());
    assert_eq!(
        report.validators_skipped,
        vec!["Checking listener configuration"]
    );
}

#[test]
fn test_validation_error_stops_before_tasks() {
    let demo = Demo {
        no_space: true,
        ..Demo::default()
    };
    let err = runner().run(&demo).unwrap_err();
    match &err {
        ScenarioError::Validation { validator, .. } => assert_eq!(validator, "Checking disk space"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.to_string(), "validation 'Checking disk space' failed");
    let cause = std::error::Error::source(&err).map(ToString::to_string);
    assert_eq!(cause.as_deref(), Some("not enough disk space on R2"));
    assert_eq!(demo.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_first_task_failure_stops_the_run() {
    let demo = Demo {
        failing_task: Some("Wait for online"),
        ..Demo::default()
    };
    let err = runner().run(&demo).unwrap_err();
    assert!(matches!(err, ScenarioError::Task { ref task, .. } if task == "Wait for online"));
    assert!(matches!(err.body_error(), Some(DemoError::Endpoint(_))));
    // create once, wait twice (one retry), join never
    assert_eq!(demo.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_cancellation_is_reported_not_raised() {
    let runner = runner();
    let demo = Demo {
        cancelling_task: Some(("Create availability group", runner.cancellation().clone())),
        ..Demo::default()
    };
    let report = runner.run(&demo).unwrap();
    assert_eq!(report.tasks_completed, vec!["Create availability group"]);
    assert_eq!(report.cancelled_at.as_deref(), Some("Wait for online"));
}

#[test]
fn test_out_of_order_plan_is_rejected() {
    let demo = Demo {
        broken_plan: true,
        ..Demo::default()
    };
    let err = runner().run(&demo).unwrap_err();
    assert!(matches!(err, ScenarioError::Plan(PlanError::OutOfOrder { .. })));
    assert_eq!(demo.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rollback_unavailable_without_rollback_tasks() {
    let err = runner().rollback(&Demo::default()).unwrap_err();
    assert!(matches!(err, ScenarioError::RollbackUnavailable { .. }));
}

#[test]
fn test_flattened_tasks_keep_plan_order() {
    assert_eq!(
        task_names(&Demo::default()),
        vec![
            "Create availability group",
            "Wait for online",
            "Join secondaries"
        ]
    );
}

#[test]
fn test_config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
treat_warnings_as_errors = true
disabled_validators = ["Checking listener configuration"]

[tasks.policy]
kind = "fixed_timeout_retry"
timeout_ms = 60000
backoff_ms = 500
"#
    )
    .unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    assert!(config.treat_warnings_as_errors);
    assert!(config.is_validator_disabled("Checking listener configuration"));
    assert_eq!(
        config.tasks.policy,
        PolicySpec::FixedTimeoutRetry {
            timeout_ms: 60_000,
            backoff_ms: 500
        }
    );
}

#[test]
fn test_missing_config_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}
