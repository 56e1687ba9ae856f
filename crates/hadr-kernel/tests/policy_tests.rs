use hadr_kernel::config::PolicySpec;
use hadr_kernel::policy::{ExecutionPolicy, FixedRetryCountPolicy, Outcome, RunOncePolicy};
use proptest::prelude::*;
use std::time::Duration;

fn policy_spec() -> impl Strategy<Value = PolicySpec> {
    prop_oneof![
        Just(PolicySpec::RunOnce),
        (0u32..8).prop_map(|retries| PolicySpec::FixedRetryCount {
            retries,
            backoff_ms: 0
        }),
        (1u64..50).prop_map(|timeout_ms| PolicySpec::FixedTimeoutRetry {
            timeout_ms,
            backoff_ms: 0
        }),
    ]
}

#[test]
fn test_run_once_never_grants_a_second_attempt() {
    let mut policy = RunOncePolicy::new();
    assert!(policy.resume_execution());
    for _ in 0..5 {
        assert!(!policy.resume_execution());
    }
}

#[test]
fn test_declared_outcome_stops_retrying_policy() {
    let mut policy = FixedRetryCountPolicy::new(10, Duration::ZERO);
    assert!(policy.resume_execution());
    policy.set_outcome(Outcome::Failed);
    assert!(policy.is_expired());
    assert!(!policy.budget_exhausted());
    assert!(!policy.resume_execution());
}

proptest! {
    #[test]
    fn prop_expiry_is_monotonic(
        spec in policy_spec(),
        calls in 1usize..24,
        expire_at in 0usize..24,
    ) {
        let mut policy = spec.build();
        let mut expired_seen = false;
        for call in 0..calls {
            if call == expire_at {
                policy.expire();
            }
            let resumed = policy.resume_execution();
            if expired_seen {
                prop_assert!(!resumed, "resumed after expiry on call {}", call);
            }
            if policy.is_expired() {
                expired_seen = true;
            }
        }
    }

    #[test]
    fn prop_outcome_blocks_next_resume(spec in policy_spec(), succeed in any::<bool>()) {
        let mut policy = spec.build();
        prop_assert!(policy.resume_execution());
        if succeed {
            policy.succeed();
        } else {
            policy.fail();
        }
        prop_assert!(policy.is_expired());
        prop_assert!(!policy.resume_execution());
    }

    #[test]
    fn prop_retry_count_grants_retries_plus_one(retries in 0u32..32) {
        let mut policy = FixedRetryCountPolicy::new(retries, Duration::ZERO);
        let mut granted = 0u32;
        while policy.resume_execution() {
            granted += 1;
            prop_assert!(granted <= retries + 1);
        }
        prop_assert_eq!(granted, retries + 1);
        prop_assert!(policy.budget_exhausted());
    }
}
