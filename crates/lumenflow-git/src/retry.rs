//! Exponential backoff for transient git/network failures (spec.md §7:
//! "Git: push rejected, merge conflict, remote unavailable. Retried with
//! backoff; on persistent failure, trigger rollback and surface.").
//!
//! Hand-rolled rather than pulled from a backoff crate — the policy is
//! three numbers and a jitter factor, not worth a dependency.

use std::thread::sleep;
use std::time::Duration;

use rand::Rng;

use crate::error::GitError;

/// A capped exponential backoff schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Delay never exceeds this, regardless of attempt count.
    pub max_delay: Duration,
    /// Fraction of the computed delay to randomize, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            jitter: 0.3,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry attempt number `attempt` (1-based: the delay
    /// waited *before* making attempt `attempt`, so `attempt == 1` never
    /// sleeps).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(20);
        let scaled = self.base_delay.as_millis().saturating_mul(1u128 << exp);
        let capped = scaled.min(self.max_delay.as_millis());
        let mut rng = rand::rng();
        let jitter_span = (capped as f64 * self.jitter) as u128;
        let jittered = if jitter_span == 0 {
            capped
        } else {
            capped.saturating_sub(jitter_span / 2) + rng.random_range(0..=jitter_span)
        };
        Duration::from_millis(u64::try_from(jittered).unwrap_or(u64::MAX))
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping per
/// [`BackoffPolicy::delay_for`] between attempts, but only when the error
/// is [`GitError::is_transient`]. Non-transient errors return immediately.
pub fn retry_git<T>(
    policy: BackoffPolicy,
    mut op: impl FnMut() -> Result<T, GitError>,
) -> Result<T, GitError> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                sleep(policy.delay_for(attempt + 1));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delay_for_first_attempt_is_zero() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn delay_for_grows_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(400));
        // would be 800ms uncapped; capped to 500ms
        assert_eq!(policy.delay_for(5), Duration::from_millis(500));
    }

    #[test]
    fn retry_git_gives_up_on_non_transient_error() {
        let calls = Cell::new(0);
        let result: Result<(), GitError> = retry_git(BackoffPolicy::default(), || {
            calls.set(calls.get() + 1);
            Err(GitError::Command {
                command: "git commit".to_owned(),
                stderr: "nothing to commit".to_owned(),
                exit_code: Some(1),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retry_git_retries_transient_error_until_success() {
        let calls = Cell::new(0);
        let result = retry_git(
            BackoffPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: 0.0,
            },
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(GitError::Command {
                        command: "git push".to_owned(),
                        stderr: "unable to access: Could not resolve host".to_owned(),
                        exit_code: Some(128),
                    })
                } else {
                    Ok(())
                }
            },
        );
        assert!(result.is_ok());
        assert_eq!(calls.get(), 3);
    }
}
