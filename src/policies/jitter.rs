//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] randomizes backoff delays so that many consumers failing at
//! once (e.g. a restarted docker daemon) do not retry in lockstep.
//!
//! - [`JitterPolicy::None`] exact delays
//! - [`JitterPolicy::Full`] random delay in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + random[0, delay/2]`
//! - [`JitterPolicy::Proportional`] random delay in `delay × [1-f, 1+f]`

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Policy controlling randomization of retry delays.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    None,

    /// Random delay in `[0, delay]`.
    Full,

    /// `delay/2 + random[0, delay/2]`.
    Equal,

    /// Random delay in `delay × [1 - f, 1 + f]`; `f` is clamped to `[0, 1]`.
    Proportional(f64),
}

impl Default for JitterPolicy {
    fn default() -> Self {
        JitterPolicy::Proportional(0.5)
    }
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return Duration::ZERO;
        }

        let mut rng = rand::rng();
        match *self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let jitter = if half == 0 {
                    0
                } else {
                    rng.random_range(0..=half)
                };
                Duration::from_millis(half + jitter)
            }
            JitterPolicy::Proportional(factor) => {
                let factor = if factor.is_finite() {
                    factor.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let spread = (ms as f64 * factor) as u64;
                if spread == 0 {
                    return delay;
                }
                let low = ms - spread.min(ms);
                let high = ms.saturating_add(spread);
                Duration::from_millis(rng.random_range(low..=high))
            }
        }
    }
}
