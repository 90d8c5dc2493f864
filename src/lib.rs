//! # certvisor
//!
//! **Certvisor** watches certificate sources and pushes renewed certificates
//! into the consumers that use them.
//!
//! Sources (watchers) emit certificates, consumers (subscribers) register the
//! domains they care about, and a single tracker task matches the two,
//! including single-level wildcards. Each docker consumer gets its own action
//! pipeline (copy files, exec a command, restart) with per-action error
//! policies and a resumable retry loop.
//!
//! ## Architecture
//! ```text
//!  ┌──────────────┐                                   ┌──────────────────┐
//!  │ AcmeWatcher  │──┐                            ┌──│ DockerSubscriber │
//!  └──────────────┘  │ Arc<Certificate>           │   └────────┬─────────┘
//!  ┌──────────────┐  │                Subscription│            │ one per container
//!  │ ...          │──┤                            │            ▼
//!  └──────────────┘  ▼                            ▼   ┌──────────────────┐
//!              ┌───────────────────────────────────┐  │  PipelineWorker  │
//!              │ Tracker (single task)             │  │  copy/exec/      │
//!              │  - items by domain                │  │  restart         │
//!              │  - wildcard entries               │  └────────▲─────────┘
//!              │  - fingerprint dedup              │           │
//!              └─────────────────┬─────────────────┘           │
//!                                └──────── Invocation ─────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! Configuration ──► WatcherChain + SubscriberChain ──► Controller::start()
//!
//! Controller
//!   ├─► Tracker::run(child token)
//!   ├─► every watcher   (panic-isolated, child token)
//!   ├─► every subscriber (panic-isolated, child token)
//!   └─► stop() ─► wait(): join within shutdown_grace, else GraceExceeded
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                         |
//! |-------------------|----------------------------------------------------------|--------------------------------------------|
//! | **Tracking**      | Domain and wildcard matching, change deduplication.      | [`Tracker`], [`TrackerHandle`]             |
//! | **Sources**       | Certificate producers.                                   | [`Watch`], [`WatcherChain`], [`AcmeWatcher`] |
//! | **Consumers**     | Discovery adapters and action pipelines.                 | [`Subscribe`], [`DockerSubscriber`]        |
//! | **Policies**      | Retry schedules and per-action error handling.           | [`BackoffPolicy`], [`OnErrorPolicy`]       |
//! | **Lifecycle**     | Start, stop and bounded shutdown.                        | [`Controller`]                             |
//! | **Errors**        | Typed errors per concern.                                | [`RuntimeError`], [`ActionError`], ...     |
//!
//! ## Example
//! ```rust,no_run
//! use certvisor::{Configuration, Controller, SubscriberChain, WatcherChain};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (config, _path) = Configuration::discover(None)?;
//!     let watchers = WatcherChain::from_config(&config.watchers);
//!     let subscribers = SubscriberChain::from_config(&config.subscribers, &config.runtime);
//!
//!     Controller::new(config.runtime, watchers, subscribers)
//!         .run_until_signal()
//!         .await?;
//!     Ok(())
//! }
//! ```
mod cert;
mod config;
mod core;
mod error;
pub mod logging;
mod policies;
pub mod subscribers;
mod tracking;
mod watchers;

// ---- Public re-exports ----

pub use cert::{Certificate, Fingerprint};
pub use config::{
    Configuration, LogConfig, LogFormat, RuntimeConfig, SubscribersConfig, WatchersConfig,
    parse_duration,
};
pub use core::Controller;
pub use error::{
    ActionError, BackendError, ConfigError, LabelError, RuntimeError, SubscribeError,
    TrackerError, WatchError,
};
pub use policies::{Backoff, BackoffPolicy, JitterPolicy, OnErrorPolicy};
pub use subscribers::{DockerConfig, DockerSubscriber, Subscribe, SubscriberChain};
pub use tracking::{Invocation, Subscription, Tracker, TrackerHandle, is_wildcard, wildcard_for};
pub use watchers::{AcmeConfig, AcmeWatcher, Watch, WatcherChain};
