//! # On-error policies for pipeline actions.
//!
//! [`OnErrorPolicy`] decides what happens to the rest of a consumer's action
//! sequence when one action fails. Successful actions always continue.
//!
//! ```text
//! Retry              → abort, retry whole pipeline later from this action
//! Stop               → abort, no retry
//! Continue           → go on with the next action
//! RestartThenStop    → restart consumer; ok → stop, failed → retry later
//! RestartThenContinue→ restart consumer; ok → next action, failed → retry later
//! ```

use std::fmt;
use std::str::FromStr;

/// Policy applied when an action fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnErrorPolicy {
    /// Abort and retry the whole pipeline with backoff, resuming at the failed action (default).
    #[default]
    Retry,
    /// Abort without retry.
    Stop,
    /// Ignore the failure and run the next action.
    Continue,
    /// Restart the consumer, then stop.
    RestartThenStop,
    /// Restart the consumer, then run the next action.
    RestartThenContinue,
}

impl OnErrorPolicy {
    /// Label value as written on consumers.
    pub fn as_str(&self) -> &'static str {
        match self {
            OnErrorPolicy::Retry => "retry",
            OnErrorPolicy::Stop => "stop",
            OnErrorPolicy::Continue => "continue",
            OnErrorPolicy::RestartThenStop => "restart-stop",
            OnErrorPolicy::RestartThenContinue => "restart-continue",
        }
    }

    /// True for the policies that restart the consumer on failure.
    pub fn restarts(&self) -> bool {
        matches!(
            self,
            OnErrorPolicy::RestartThenStop | OnErrorPolicy::RestartThenContinue
        )
    }
}

impl fmt::Display for OnErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(OnErrorPolicy::Retry),
            "stop" => Ok(OnErrorPolicy::Stop),
            "continue" => Ok(OnErrorPolicy::Continue),
            "restart-stop" => Ok(OnErrorPolicy::RestartThenStop),
            "restart-continue" => Ok(OnErrorPolicy::RestartThenContinue),
            other => Err(format!("unknown on-error policy `{other}`")),
        }
    }
}
