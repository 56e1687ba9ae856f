//! Validators
//!
//! Same loop as tasks with a single body and no cancellation. Validation is
//! single-attempt by nature: bodies call [`ExecutionPolicy::expire`] before
//! checking anything, so a failure propagates on the first attempt without a
//! backoff sleep.

use crate::error::ExecutionError;
use crate::policy::ExecutionPolicy;
use crate::progress::ProgressSink;
use crate::retry::{self, LoopEvent, LoopOutcome};

/// A precondition checked before any task runs.
pub trait Validator: Send + Sync {
    /// Error raised by the check. Its category decides error vs warning.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Display name, matched against `disabled_validators`.
    fn name(&self) -> &str;

    /// One attempt of the check. Free-text progress goes to `progress`.
    fn validate(
        &self,
        policy: &mut dyn ExecutionPolicy,
        progress: &ValidatorProgress<'_>,
    ) -> Result<(), Self::Error>;
}

/// Lets a validator body report intermediate, free-text status.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorProgress<'a> {
    name: &'a str,
    sink: &'a ProgressSink,
}

impl<'a> ValidatorProgress<'a> {
    /// Reporter for the validator called `name`.
    pub fn new(name: &'a str, sink: &'a ProgressSink) -> Self {
        Self { name, sink }
    }

    /// Emit one validator progress record.
    pub fn report(&self, details: impl Into<String>, status: impl Into<String>) {
        self.sink.validator(self.name, details, status);
    }
}

/// Drives validators through the retry loop.
#[derive(Debug, Clone, Default)]
pub struct ValidationExecutor {
    progress: ProgressSink,
}

impl ValidationExecutor {
    /// An executor reporting to `progress`.
    pub fn new(progress: ProgressSink) -> Self {
        Self { progress }
    }

    /// Returns the number of attempts the check took.
    pub fn run<V>(
        &self,
        validator: &V,
        policy: &mut dyn ExecutionPolicy,
    ) -> Result<u32, ExecutionError<V::Error>>
    where
        V: Validator + ?Sized,
    {
        let name = validator.name();
        let span = tracing::info_span!("validator", name);
        let _entered = span.enter();

        let progress = &self.progress;
        let handle = ValidatorProgress::new(name, progress);
        let report = |event: LoopEvent<'_>| {
            let status = match event {
                LoopEvent::Started => "Started",
                LoopEvent::Retrying { .. } => "Retrying",
                LoopEvent::Cancelled => "Cancelled",
                LoopEvent::Failed { .. } => "Failed",
                LoopEvent::Completed => "Completed",
            };
            progress.validator(name, event.details(), status);
        };

        let outcome = retry::run("validator", name, policy, None, report, |policy| {
            validator.validate(policy, &handle)
        })?;
        match outcome {
            LoopOutcome::Completed { attempts } | LoopOutcome::Cancelled { attempts } => {
                Ok(attempts)
            }
        }
    }

    /// Run `delegate` instead of the loop.
    pub fn run_with<V, F>(
        &self,
        validator: &V,
        policy: &mut dyn ExecutionPolicy,
        delegate: F,
    ) -> Result<u32, ExecutionError<V::Error>>
    where
        V: Validator + ?Sized,
        F: FnOnce(&mut dyn ExecutionPolicy) -> Result<(), V::Error>,
    {
        tracing::debug!(validator = validator.name(), "validation overridden by delegate");
        delegate(policy).map_err(ExecutionError::Failed)?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FixedRetryCountPolicy;
    use crate::progress::ProgressChannel;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Debug, thiserror::Error)]
    #[error("not enough free space on {0}")]
    struct NoSpace(&'static str);

    struct DiskCheck {
        calls: AtomicU32,
    }

    impl Validator for DiskCheck {
        type Error = NoSpace;

        fn name(&self) -> &str {
            "Checking disk space"
        }

        fn validate(
            &self,
            policy: &mut dyn ExecutionPolicy,
            progress: &ValidatorProgress<'_>,
        ) -> Result<(), NoSpace> {
            policy.expire();
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress.report("R1", "Checking");
            Err(NoSpace("R1"))
        }
    }

    #[test]
    fn expiring_validator_fails_once_without_backoff() {
        let (sink, feed) = ProgressChannel::unbounded();
        let executor = ValidationExecutor::new(sink);
        let check = DiskCheck {
            calls: AtomicU32::new(0),
        };
        let mut policy = FixedRetryCountPolicy::new(3, Duration::from_secs(30));

        let started = Instant::now();
        let err = executor.run(&check, &mut policy).unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(check.calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), "not enough free space on R1");
        let statuses: Vec<String> = feed
            .drain()
            .into_iter()
            .filter_map(|r| match r.event {
                crate::progress::ProgressEvent::Validator { status, .. } => Some(status),
                crate::progress::ProgressEvent::Task { .. } => None,
            })
            .collect();
        assert_eq!(statuses, vec!["Started", "Checking", "Failed"]);
    }
}
