//! # Backoff policy for retrying whole pipeline executions.
//!
//! [`BackoffPolicy`] describes how retry delays grow after repeated failures:
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the cap of a single delay;
//! - [`BackoffPolicy::max_elapsed`] the total budget, after which retrying stops.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`, then jittered.
//! The base delay is derived from the attempt number only, so jitter never feeds
//! back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use certvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     max_elapsed: None,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.delay(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay(1), Duration::from_millis(200));
//! assert_eq!(backoff.delay(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::config::duration_str;
use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(with = "duration_str")]
    pub first: Duration,
    /// Cap for a single delay.
    #[serde(with = "duration_str")]
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Total time after which no further retry is scheduled (`None` = retry forever).
    #[serde(with = "duration_str::option")]
    pub max_elapsed: Option<Duration>,
    /// Randomization applied to each delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `first = 1s`;
    /// - `factor = 1.5`;
    /// - `max = 60s`;
    /// - `max_elapsed = 15m`;
    /// - `jitter = Proportional(0.5)`.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 1.5,
            max_elapsed: Some(Duration::from_secs(15 * 60)),
            jitter: JitterPolicy::Proportional(0.5),
        }
    }
}

impl BackoffPolicy {
    /// Computes the jittered delay for the given attempt number (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let clamped_exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(clamped_exp);

        let base =
            if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
                self.max
            } else {
                Duration::from_secs_f64(unclamped_secs)
            };

        self.jitter.apply(base).min(self.max)
    }

    /// Starts a new retry schedule; the elapsed budget counts from now.
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            started: Instant::now(),
            attempt: 0,
        }
    }
}

/// One running retry schedule derived from a [`BackoffPolicy`].
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    started: Instant,
    attempt: u32,
}

impl Backoff {
    /// Returns the delay before the next attempt, or `None` once the
    /// elapsed budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.policy.delay(self.attempt);
        if let Some(budget) = self.policy.max_elapsed {
            if self.started.elapsed() + delay > budget {
                return None;
            }
        }
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Restarts the schedule from the first delay.
    pub fn reset(&mut self) {
        self.started = Instant::now();
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            max_elapsed: None,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let policy = plain(100, 30_000, 2.0);
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = plain(10_000, 5_000, 2.0);
        assert_eq!(policy.delay(0), Duration::from_secs(5));
    }

    #[test]
    fn test_non_finite_overflow_clamps_to_max() {
        let policy = plain(100, 10_000, 2.0);
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_proportional_jitter_never_exceeds_max() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Proportional(0.5),
            ..plain(1_000, 2_000, 2.0)
        };
        for attempt in 0..20 {
            assert!(policy.delay(attempt) <= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_grows_until_budget_spent() {
        let policy = BackoffPolicy {
            max_elapsed: Some(Duration::from_secs(10)),
            ..plain(1_000, 60_000, 2.0)
        };
        let mut schedule = policy.start();

        let mut delays = Vec::new();
        while let Some(delay) = schedule.next_delay() {
            delays.push(delay);
            tokio::time::sleep(delay).await;
        }

        // 1 + 2 + 4 = 7s spent; the next 8s would overshoot the 10s budget.
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(schedule.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_without_budget_never_ends() {
        let mut schedule = plain(1_000, 1_000, 1.0).start();
        for _ in 0..100 {
            let delay = schedule.next_delay().unwrap();
            tokio::time::sleep(delay).await;
        }
        schedule.reset();
        assert_eq!(schedule.attempts(), 0);
    }

    #[test]
    fn test_deserialize_with_duration_strings() {
        let policy: BackoffPolicy =
            serde_yaml::from_str("first: 500ms\nmax: 1m\nfactor: 2.0\nmax_elapsed: 5m\n").unwrap();
        assert_eq!(policy.first, Duration::from_millis(500));
        assert_eq!(policy.max, Duration::from_secs(60));
        assert_eq!(policy.max_elapsed, Some(Duration::from_secs(300)));
        assert_eq!(policy.jitter, JitterPolicy::Proportional(0.5));
    }
}
