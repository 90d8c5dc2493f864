//! # Docker consumer adapter.
//!
//! Discovers containers through their labels, registers them with the
//! tracker and runs their action pipelines when certificates change.
//!
//! ```text
//!              ┌──────────── discovery task ────────────┐
//! daemon ────► │ list / events ─► labels ─► register    │ ──Subscription──► Tracker
//!              │        ▲                      │        │
//!              │   UpdateGate ◄── block/unblock┐│       │
//!              └───────────────────────────────┼┼───────┘
//!                                              │▼
//! Tracker ──Invocation──► [per-container queue] ─► PipelineWorker ─► daemon
//! ```
//!
//! Label schema: see [`LabelParser`].

mod action;
mod backend;
mod discovery;
mod engine;
mod gate;
mod labels;
mod pipeline;

#[cfg(test)]
mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::duration_str;
use crate::error::SubscribeError;
use crate::policies::BackoffPolicy;
use crate::subscribers::subscriber::Subscribe;
use crate::tracking::Subscription;

pub use action::{
    Action, ActionKind, CopyAction, CopyFormat, ExecAction, FileNameTemplate, RestartAction,
};
pub use backend::{
    Connect, ContainerBackend, ContainerInfo, EventStream, ExecSpec, FileBlob, LifecycleEvent,
    LifecycleKind,
};
pub use engine::DockerApi;
pub use labels::{ContainerConfig, LabelParser};

use discovery::{Discovery, DiscoverySettings};

/// Settings of the docker adapter.
///
/// ## Field semantics
/// - `endpoint`: daemon address (`unix://`, `npipe://`, `tcp://`, `http://`); `None` = `DOCKER_HOST` or the local socket
/// - `client_timeout`: bound on every daemon call
/// - `label_prefix`: label namespace (`<prefix>.domains`, `<prefix>.actions[n]`)
/// - `queue_capacity`: invocation queue per container (min 1)
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DockerConfig {
    pub endpoint: Option<String>,
    #[serde(with = "duration_str")]
    pub client_timeout: Duration,
    pub label_prefix: String,
    pub queue_capacity: usize,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            client_timeout: Duration::from_secs(30),
            label_prefix: "certvisor".to_string(),
            queue_capacity: 10,
        }
    }
}

/// Docker discovery adapter.
pub struct DockerSubscriber {
    config: DockerConfig,
    backoff: BackoffPolicy,
    connector: Arc<dyn Connect>,
}

impl DockerSubscriber {
    /// Creates an adapter backed by the Engine API; `backoff` drives pipeline retries.
    pub fn new(config: DockerConfig, backoff: BackoffPolicy) -> Self {
        let api = DockerApi::new(config.endpoint.clone(), config.client_timeout);
        Self::with_connector(config, backoff, Arc::new(api))
    }

    /// Creates an adapter over a custom backend.
    pub fn with_connector(
        config: DockerConfig,
        backoff: BackoffPolicy,
        connector: Arc<dyn Connect>,
    ) -> Self {
        Self {
            config,
            backoff,
            connector,
        }
    }

    fn parser(&self) -> Result<LabelParser, SubscribeError> {
        let prefix = self.config.label_prefix.trim();
        if prefix.is_empty() {
            return Err(SubscribeError::Config("label_prefix must not be empty".into()));
        }
        LabelParser::new(prefix).map_err(|e| SubscribeError::Config(e.to_string()))
    }
}

#[async_trait]
impl Subscribe for DockerSubscriber {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn init(&self) -> Result<(), SubscribeError> {
        self.parser()?;
        if let Some(endpoint) = self.config.endpoint.as_deref().map(str::trim) {
            if !endpoint.is_empty() {
                engine::validate_endpoint(endpoint).map_err(SubscribeError::Config)?;
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subscriptions: mpsc::Sender<Subscription>,
        token: CancellationToken,
    ) -> Result<(), SubscribeError> {
        let settings = DiscoverySettings {
            name: Arc::from(self.name()),
            parser: self.parser()?,
            queue_capacity: self.config.queue_capacity.max(1),
            connect_backoff: BackoffPolicy::default(),
            pipeline_backoff: self.backoff,
        };
        info!(
            endpoint = self.config.endpoint.as_deref().unwrap_or("default"),
            prefix = %self.config.label_prefix,
            "starting docker discovery"
        );
        Discovery::new(settings, Arc::clone(&self.connector), subscriptions, token)
            .run()
            .await
    }
}
