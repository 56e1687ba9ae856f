//! The retry loop shared by tasks and validators.

use crate::cancel::CancellationToken;
use crate::error::ExecutionError;
use crate::policy::{ExecutionPolicy, Outcome};
use std::error::Error;
use std::time::Duration;

/// What the loop tells its caller, which maps it to a progress event.
pub(crate) enum LoopEvent<'a> {
    Started,
    Retrying {
        attempt: u32,
        backoff: Duration,
        error: &'a (dyn Error + 'static),
    },
    Cancelled,
    Failed {
        error: &'a (dyn Error + 'static),
    },
    Completed,
}

impl LoopEvent<'_> {
    pub(crate) fn details(&self) -> String {
        match self {
            LoopEvent::Started | LoopEvent::Completed => String::new(),
            LoopEvent::Retrying {
                attempt,
                backoff,
                error,
            } => format!(
                "attempt {attempt} failed, retrying in {}ms: {}",
                backoff.as_millis(),
                chain(*error)
            ),
            LoopEvent::Cancelled => "cancellation requested".to_string(),
            LoopEvent::Failed { error } => chain(*error),
        }
    }
}

/// `error` followed by each of its sources, separated by ": ".
pub(crate) fn chain(error: &(dyn Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut next = error.source();
    while let Some(cause) = next {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        next = cause.source();
    }
    message
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopOutcome {
    Completed { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Drive `body` until it succeeds, fails terminally, the policy runs out, or
/// cancellation is observed at the top of an attempt.
pub(crate) fn run<E, B, R>(
    kind: &'static str,
    name: &str,
    policy: &mut dyn ExecutionPolicy,
    cancel: Option<&CancellationToken>,
    mut report: R,
    mut body: B,
) -> Result<LoopOutcome, ExecutionError<E>>
where
    E: Error + 'static,
    B: FnMut(&mut dyn ExecutionPolicy) -> Result<(), E>,
    R: FnMut(LoopEvent<'_>),
{
    report(LoopEvent::Started);

    let mut invocations = 0u32;
    let mut last_error: Option<E> = None;

    while policy.resume_execution() {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::info!(kind, name, attempts = invocations, "cancelled before attempt");
            metrics::counter!("hadr_cancellations_total", "kind" => kind).increment(1);
            report(LoopEvent::Cancelled);
            return Ok(LoopOutcome::Cancelled {
                attempts: invocations,
            });
        }

        invocations += 1;
        metrics::counter!("hadr_attempts_total", "kind" => kind).increment(1);

        match body(policy) {
            Ok(()) => {
                if policy.outcome() == Outcome::Failed {
                    let err = ExecutionError::DeclaredFailed {
                        name: name.to_string(),
                        attempts: invocations,
                    };
                    metrics::counter!("hadr_failures_total", "kind" => kind).increment(1);
                    report(LoopEvent::Failed { error: &err });
                    return Err(err);
                }
                policy.succeed();
                report(LoopEvent::Completed);
                return Ok(LoopOutcome::Completed {
                    attempts: invocations,
                });
            }
            Err(e) => {
                if policy.is_expired() {
                    tracing::warn!(kind, name, attempts = invocations, error = %chain(&e), "terminal failure");
                    metrics::counter!("hadr_failures_total", "kind" => kind).increment(1);
                    report(LoopEvent::Failed { error: &e });
                    return Err(ExecutionError::Failed(e));
                }

                let backoff = policy.backoff_interval();
                tracing::warn!(
                    kind,
                    name,
                    attempt = invocations,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %chain(&e),
                    "attempt failed, will retry"
                );
                metrics::counter!("hadr_retries_total", "kind" => kind).increment(1);
                report(LoopEvent::Retrying {
                    attempt: invocations,
                    backoff,
                    error: &e,
                });
                last_error = Some(e);
                if !backoff.is_zero() {
                    std::thread::sleep(backoff);
                }
            }
        }
    }

    // The budget ran out between attempts.
    if let Some(e) = last_error {
        metrics::counter!("hadr_failures_total", "kind" => kind).increment(1);
        report(LoopEvent::Failed { error: &e });
        return Err(ExecutionError::Failed(e));
    }

    let err = ExecutionError::Exhausted {
        name: name.to_string(),
        attempts: invocations,
    };
    report(LoopEvent::Failed { error: &err });
    Err(err)
}
