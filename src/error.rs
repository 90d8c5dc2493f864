//! Error types used by the certvisor runtime and its adapters.
//!
//! - [`RuntimeError`] errors raised by the lifecycle controller itself.
//! - [`TrackerError`] the tracker stopped accepting input.
//! - [`BackendError`] failures talking to the consumer backend (docker).
//! - [`ActionError`] failures of a single pipeline action.
//! - [`LabelError`] a consumer's labels do not describe a valid registration.
//! - [`ConfigError`] the configuration file could not be read or parsed.
//! - [`WatchError`] a certificate source could not be started.
//! - [`SubscribeError`] a consumer discovery adapter could not run.
//!
//! Runtime-facing types provide `as_label` for stable log fields.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the certvisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some tasks did not acknowledge cancellation.
    #[error("shutdown timeout {grace:?} exceeded; {pending} task(s) still running")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Number of tasks that were still running when the grace period ended.
        pending: usize,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use certvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), pending: 1 };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

/// The tracker's input channels are closed (its loop has exited).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerError {
    #[error("tracker is no longer accepting events")]
    Closed,
}

/// # Errors produced by the consumer backend.
///
/// All of them are considered transient by the action pipeline: whether they
/// are retried is decided by the failing action's on-error policy.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend daemon could not be reached.
    #[error("failed connecting to backend: {0}")]
    Connect(String),

    /// The daemon rejected or failed a request.
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    /// A daemon request did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Backend output could not be decoded.
    #[error("unexpected backend output: {0}")]
    Decode(String),

    /// The requested consumer does not exist.
    #[error("container {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// # Errors produced by a single pipeline action.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A file name rendered from the copy template was empty.
    #[error("file name template produced an empty name")]
    EmptyFileName,
}

impl ActionError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ActionError::Backend(BackendError::Connect(_)) => "backend_connect",
            ActionError::Backend(BackendError::Timeout { .. }) => "backend_timeout",
            ActionError::Backend(BackendError::NotFound(_)) => "backend_not_found",
            ActionError::Backend(_) => "backend_failed",
            ActionError::EmptyFileName => "empty_file_name",
        }
    }
}

/// # Reasons a consumer's labels are rejected.
///
/// Registration fails closed: any of these means the consumer is not
/// registered at all.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("missing domains label")]
    MissingDomains,

    #[error("domains label lists no domains")]
    NoDomains,

    #[error("no actions configured")]
    NoActions,

    #[error("action {index} has no type")]
    MissingType { index: usize },

    #[error("action {index} has unknown type `{kind}`")]
    UnknownType { index: usize, kind: String },

    #[error("action {index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("action {index} has invalid `{field}`: {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid duration `{0}`")]
    Duration(String),
}

/// # Errors produced while starting a certificate source.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("invalid watcher configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Notify(#[from] notify::Error),
}

/// # Errors produced while starting a consumer discovery adapter.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SubscribeError {
    #[error("invalid subscriber configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
