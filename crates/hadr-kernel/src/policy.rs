//! Execution policies
//!
//! A policy is the retry budget for a single task or validator invocation.
//! It is created fresh by the caller, mutated only by the retry loop and the
//! body it drives, and discarded afterwards.
//!
//! Two signals are kept apart:
//! - the budget (attempt count or wall-clock time), owned by the policy
//! - the [`Outcome`], set by the body when it reaches a terminal state
//!
//! A policy is *expired* when either signal says stop. Expiry is monotonic:
//! once [`ExecutionPolicy::is_expired`] is true, [`ExecutionPolicy::resume_execution`]
//! returns false forever.

use std::fmt;
use std::time::{Duration, Instant};

/// Terminal state declared by a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// The body has not decided yet.
    #[default]
    Pending,
    /// The body finished its work.
    Succeeded,
    /// The body gave up. The retry loop reports a declared failure.
    Failed,
}

impl Outcome {
    /// Anything but [`Outcome::Pending`].
    pub fn is_terminal(self) -> bool {
        !matches!(self, Outcome::Pending)
    }
}

/// Retry/backoff strategy consulted by the task and validator loops.
pub trait ExecutionPolicy: Send + fmt::Debug {
    /// Whether another attempt may be made. Counts the attempt and captures
    /// the start time on the first call.
    fn resume_execution(&mut self) -> bool;

    /// True once the budget is used up. The attempt that consumes the last
    /// unit of budget already reports exhaustion.
    fn budget_exhausted(&self) -> bool;

    /// Force-expire the budget. Used by bodies that reach a non-retryable
    /// state, e.g. validators which are single-attempt by nature.
    fn expire(&mut self);

    /// Outcome declared so far.
    fn outcome(&self) -> Outcome;

    /// Declare an outcome. The first terminal outcome sticks.
    fn set_outcome(&mut self, outcome: Outcome);

    /// Wait before the next attempt.
    fn backoff_interval(&self) -> Duration;

    /// Attempts started so far.
    fn attempts(&self) -> u32;

    /// Budget used up or outcome decided.
    fn is_expired(&self) -> bool {
        self.budget_exhausted() || self.outcome().is_terminal()
    }

    /// Shorthand for `set_outcome(Outcome::Succeeded)`.
    fn succeed(&mut self) {
        self.set_outcome(Outcome::Succeeded);
    }

    /// Shorthand for `set_outcome(Outcome::Failed)`.
    fn fail(&mut self) {
        self.set_outcome(Outcome::Failed);
    }
}

#[derive(Debug, Clone, Default)]
struct PolicyState {
    attempts: u32,
    expired: bool,
    outcome: Outcome,
}

impl PolicyState {
    fn set_outcome(&mut self, outcome: Outcome) {
        // Terminal outcomes stick.
        if !self.outcome.is_terminal() {
            self.outcome = outcome;
        }
    }
}

/// Allows `max_attempts` attempts with a fixed backoff between them.
fn resume_counted(state: &mut PolicyState, max_attempts: u32) -> bool {
    if state.expired || state.outcome.is_terminal() {
        state.expired = true;
        return false;
    }
    state.attempts += 1;
    if state.attempts >= max_attempts {
        state.expired = true;
    }
    true
}

/// A single attempt, no backoff.
#[derive(Debug, Clone, Default)]
pub struct RunOncePolicy {
    state: PolicyState,
}

impl RunOncePolicy {
    /// A fresh single-attempt policy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionPolicy for RunOncePolicy {
    fn resume_execution(&mut self) -> bool {
        resume_counted(&mut self.state, 1)
    }

    fn budget_exhausted(&self) -> bool {
        self.state.expired
    }

    fn expire(&mut self) {
        self.state.expired = true;
    }

    fn outcome(&self) -> Outcome {
        self.state.outcome
    }

    fn set_outcome(&mut self, outcome: Outcome) {
        self.state.set_outcome(outcome);
    }

    fn backoff_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn attempts(&self) -> u32 {
        self.state.attempts
    }
}

/// One initial attempt plus `retries` retries, fixed backoff.
#[derive(Debug, Clone)]
pub struct FixedRetryCountPolicy {
    retries: u32,
    backoff: Duration,
    state: PolicyState,
}

impl FixedRetryCountPolicy {
    /// `retries` retries after the first attempt, `backoff` apart.
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self {
            retries,
            backoff,
            state: PolicyState::default(),
        }
    }

    /// Retries after the first attempt.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl ExecutionPolicy for FixedRetryCountPolicy {
    fn resume_execution(&mut self) -> bool {
        let max = self.max_attempts();
        resume_counted(&mut self.state, max)
    }

    fn budget_exhausted(&self) -> bool {
        self.state.expired
    }

    fn expire(&mut self) {
        self.state.expired = true;
    }

    fn outcome(&self) -> Outcome {
        self.state.outcome
    }

    fn set_outcome(&mut self, outcome: Outcome) {
        self.state.set_outcome(outcome);
    }

    fn backoff_interval(&self) -> Duration {
        self.backoff
    }

    fn attempts(&self) -> u32 {
        self.state.attempts
    }
}

/// Attempts until `timeout` has elapsed since the first attempt. At least one
/// attempt is always made.
#[derive(Debug, Clone)]
pub struct FixedTimeoutRetryPolicy {
    timeout: Duration,
    backoff: Duration,
    started: Option<Instant>,
    state: PolicyState,
}

impl FixedTimeoutRetryPolicy {
    /// Retry for up to `timeout`, pausing `backoff` between attempts.
    pub fn new(timeout: Duration, backoff: Duration) -> Self {
        Self {
            timeout,
            backoff,
            started: None,
            state: PolicyState::default(),
        }
    }

    /// Total wall-clock budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the budget runs out, `None` before the first attempt.
    pub fn remaining(&self) -> Option<Duration> {
        self.started
            .map(|start| self.timeout.saturating_sub(start.elapsed()))
    }

    fn out_of_time(&self) -> bool {
        // No point sleeping if the next attempt would start past the deadline.
        self.started
            .is_some_and(|start| start.elapsed() + self.backoff >= self.timeout)
    }
}

impl ExecutionPolicy for FixedTimeoutRetryPolicy {
    fn resume_execution(&mut self) -> bool {
        if self.state.expired || self.state.outcome.is_terminal() {
            self.state.expired = true;
            return false;
        }
        if self.state.attempts > 0 && self.out_of_time() {
            self.state.expired = true;
            return false;
        }
        self.started.get_or_insert_with(Instant::now);
        self.state.attempts += 1;
        true
    }

    fn budget_exhausted(&self) -> bool {
        self.state.expired || self.out_of_time()
    }

    fn expire(&mut self) {
        self.state.expired = true;
    }

    fn outcome(&self) -> Outcome {
        self.state.outcome
    }

    fn set_outcome(&mut self, outcome: Outcome) {
        self.state.set_outcome(outcome);
    }

    fn backoff_interval(&self) -> Duration {
        self.backoff
    }

    fn attempts(&self) -> u32 {
        self.state.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_once_allows_exactly_one_attempt() {
        let mut policy = RunOncePolicy::new();
        assert!(!policy.is_expired());
        assert!(policy.resume_execution());
        assert!(policy.budget_exhausted());
        assert!(!policy.resume_execution());
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn fixed_retry_count_allows_retries_plus_one() {
        let mut policy = FixedRetryCountPolicy::new(3, Duration::ZERO);
        let mut granted = 0;
        while policy.resume_execution() {
            granted += 1;
            assert!(granted <= 10, "policy never expired");
        }
        assert_eq!(granted, 4);
        assert_eq!(policy.attempts(), 4);
    }

    #[test]
    fn last_attempt_reports_exhaustion_before_it_runs() {
        let mut policy = FixedRetryCountPolicy::new(1, Duration::from_millis(5));
        assert!(policy.resume_execution());
        assert!(!policy.budget_exhausted());
        assert!(policy.resume_execution());
        assert!(policy.budget_exhausted());
    }

    #[test]
    fn succeeding_stops_further_attempts() {
        let mut policy = FixedRetryCountPolicy::new(5, Duration::ZERO);
        assert!(policy.resume_execution());
        policy.succeed();
        assert!(policy.is_expired());
        assert!(!policy.budget_exhausted());
        assert!(!policy.resume_execution());
        assert_eq!(policy.outcome(), Outcome::Succeeded);
    }

    #[test]
    fn terminal_outcome_is_not_overwritten() {
        let mut policy = RunOncePolicy::new();
        policy.fail();
        policy.succeed();
        assert_eq!(policy.outcome(), Outcome::Failed);
    }

    #[test]
    fn timeout_policy_makes_at_least_one_attempt() {
        let mut policy = FixedTimeoutRetryPolicy::new(Duration::ZERO, Duration::ZERO);
        assert!(policy.resume_execution());
        assert!(policy.budget_exhausted());
        assert!(!policy.resume_execution());
    }

    #[test]
    fn timeout_policy_expires_after_deadline() {
        let mut policy =
            FixedTimeoutRetryPolicy::new(Duration::from_millis(30), Duration::from_millis(1));
        assert!(policy.resume_execution());
        assert!(policy.remaining().is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(policy.budget_exhausted());
        assert!(!policy.resume_execution());
        assert!(!policy.resume_execution());
    }

    #[test]
    fn forced_expiry_is_immediate() {
        let mut policy =
            FixedTimeoutRetryPolicy::new(Duration::from_secs(60), Duration::from_millis(1));
        assert!(policy.resume_execution());
        policy.expire();
        assert!(!policy.resume_execution());
    }
}
