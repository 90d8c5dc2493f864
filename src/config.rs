//! # Configuration.
//!
//! Provides [`Configuration`], the YAML document that enables certificate
//! sources and consumer adapters, plus [`RuntimeConfig`] and [`LogConfig`].
//!
//! ## Discovery
//! [`Configuration::discover`] tries, in order:
//! 1. the explicitly given path (if any);
//! 2. `/etc/certvisor/certvisor.{yaml,yml}`;
//! 3. `$XDG_CONFIG_HOME/certvisor.{yaml,yml}`;
//! 4. `$HOME/.config/certvisor.{yaml,yml}`;
//! 5. `./certvisor.{yaml,yml}`.
//!
//! The first existing regular file wins. Candidates referencing an unset
//! environment variable are skipped. When nothing is found the defaults are
//! used (no watchers, no subscribers).
//!
//! ## Example
//! ```yaml
//! watchers:
//!   acme:
//!     acme_path: /data/traefik/acme.json
//! subscribers:
//!   docker:
//!     endpoint: unix:///var/run/docker.sock
//!     client_timeout: 30s
//! log:
//!   level: info
//!   location: stderr
//! runtime:
//!   shutdown_grace: 10s
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policies::BackoffPolicy;
use crate::subscribers::DockerConfig;
use crate::watchers::AcmeConfig;

const BASE_PATHS: [&str; 4] = [
    "/etc/certvisor/certvisor",
    "$XDG_CONFIG_HOME/certvisor",
    "$HOME/.config/certvisor",
    "./certvisor",
];
const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Top-level configuration document.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    pub watchers: WatchersConfig,
    pub subscribers: SubscribersConfig,
    pub log: LogConfig,
    pub runtime: RuntimeConfig,
}

/// Enabled certificate sources.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchersConfig {
    /// Traefik `acme.json` watcher.
    #[serde(alias = "traefik")]
    pub acme: Option<AcmeConfig>,
}

/// Enabled consumer adapters.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubscribersConfig {
    pub docker: Option<DockerConfig>,
}

/// Output format of log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings.
///
/// - `level`: an `EnvFilter` directive (`info`, `certvisor=debug`, ...); `RUST_LOG` wins when set
/// - `location`: `stdout`, `stderr` or a file path (truncated on start)
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub location: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            location: "stderr".to_string(),
        }
    }
}

/// Runtime settings shared by the controller and the pipelines.
///
/// ## Field semantics
/// - `shutdown_grace`: maximum wait for all tasks to stop after cancellation
/// - `queue_capacity`: capacity of each tracker input channel (min 1)
/// - `pipeline_backoff`: retry schedule for whole pipeline executions
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(with = "duration_str")]
    pub shutdown_grace: Duration,
    pub queue_capacity: usize,
    pub pipeline_backoff: BackoffPolicy,
}

impl RuntimeConfig {
    /// Returns the queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn queue_capacity_clamped(&self) -> usize {
        self.queue_capacity.max(1)
    }
}

impl Default for RuntimeConfig {
    /// Default configuration:
    ///
    /// - `shutdown_grace = 10s`
    /// - `queue_capacity = 100`
    /// - `pipeline_backoff = BackoffPolicy::default()`
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(10),
            queue_capacity: 100,
            pipeline_backoff: BackoffPolicy::default(),
        }
    }
}

impl Configuration {
    /// Finds and reads the configuration file; defaults when none exists.
    ///
    /// Returns the configuration and the path it was read from.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match find_config(explicit) {
            Some(path) => Ok((Self::from_file(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Reads and parses one YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses a YAML document; an empty document yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }
}

fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    candidate_paths(explicit)
        .into_iter()
        .filter_map(|p| expand_env(&p))
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .map(|p| std::path::absolute(&p).unwrap_or(p))
}

fn candidate_paths(explicit: Option<&Path>) -> Vec<String> {
    let mut paths = Vec::new();
    if let Some(path) = explicit {
        let path = path.to_string_lossy();
        if !path.trim().is_empty() {
            paths.push(path.into_owned());
        }
    }
    for base in BASE_PATHS {
        for ext in EXTENSIONS {
            paths.push(format!("{base}.{ext}"));
        }
    }
    paths
}

/// Expands `$VAR` / `${VAR}` references; `None` if a variable is unset or empty.
fn expand_env(input: &str) -> Option<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, tail) = if let Some(braced) = after.strip_prefix('{') {
            let end = braced.find('}')?;
            (&braced[..end], &braced[end + 1..])
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], &after[end..])
        };
        let value = std::env::var(name).ok().filter(|v| !v.is_empty())?;
        out.push_str(&value);
        rest = tail;
    }
    out.push_str(rest);
    Some(out)
}

/// Parses durations such as `500ms`, `10s`, `5m`, `1h` or `1m30s`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let s = input.trim();
    let invalid = || ConfigError::Duration(input.to_string());
    if s.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_secs = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        let part = Duration::try_from_secs_f64(value * unit_secs).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
    }
    Ok(total)
}

/// Serde adapter for human-readable durations.
pub(crate) mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(raw) => super::super::parse_duration(&raw)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}
