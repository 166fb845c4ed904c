//! Retry decisions and backoff delays for task execution.

use std::time::Duration;

use tesflow_types::workflow::{Backoff, RetryPolicy};

/// Stateless retry handler. All logic lives in associated functions that
/// take the policy as a parameter.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    /// Without a policy a task gets exactly one attempt.
    pub fn should_retry(policy: Option<&RetryPolicy>, attempt: u32) -> bool {
        policy.is_some_and(|p| attempt < p.max_attempts)
    }

    /// Total attempts a policy allows.
    pub fn max_attempts(policy: Option<&RetryPolicy>) -> u32 {
        policy.map_or(1, |p| p.max_attempts.max(1))
    }

    /// Wait before the next attempt, given that `attempt` (1-based) failed.
    ///
    /// `none` waits `delay`; `exponential` waits `delay * 2^(attempt-1)`.
    /// No jitter is added.
    pub fn delay_for(policy: &RetryPolicy, attempt: u32) -> Duration {
        let base = policy.delay.max(0.0);
        let secs = match policy.backoff {
            Backoff::None => base,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(30) as i32;
                base * 2f64.powi(exponent)
            }
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, delay: f64, backoff: Backoff) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay,
            backoff,
        }
    }

    #[test]
    fn should_retry_until_attempts_exhausted() {
        let p = policy(3, 1.0, Backoff::None);
        assert!(RetryHandler::should_retry(Some(&p), 1));
        assert!(RetryHandler::should_retry(Some(&p), 2));
        assert!(!RetryHandler::should_retry(Some(&p), 3));
        assert!(!RetryHandler::should_retry(None, 1));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let p = policy(3, 2.0, Backoff::Exponential);
        assert_eq!(RetryHandler::delay_for(&p, 1), Duration::from_secs(2));
        assert_eq!(RetryHandler::delay_for(&p, 2), Duration::from_secs(4));
        assert_eq!(RetryHandler::delay_for(&p, 3), Duration::from_secs(8));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let p = policy(5, 0.5, Backoff::None);
        assert_eq!(RetryHandler::delay_for(&p, 1), Duration::from_millis(500));
        assert_eq!(RetryHandler::delay_for(&p, 4), Duration::from_millis(500));
    }

    #[test]
    fn max_attempts_defaults_to_one() {
        assert_eq!(RetryHandler::max_attempts(None), 1);
        assert_eq!(RetryHandler::max_attempts(Some(&policy(4, 0.0, Backoff::None))), 4);
    }
}
