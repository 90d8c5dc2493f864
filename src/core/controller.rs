//! # Controller: wires the chains to the tracker and drives shutdown.
//!
//! ```text
//! start():
//!   ├─► Tracker::run            (spawned first, so early events are buffered)
//!   ├─► WatcherChain::watch     ──► tracker certificate queue
//!   └─► SubscriberChain::subscribe ──► tracker subscription queue
//!
//! stop():  token.cancel()
//! wait():  token.cancelled() ─► join all tasks
//!                                 ├─ within grace ─► Ok(())
//!                                 └─ timeout      ─► RuntimeError::GraceExceeded
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use certvisor::{Controller, RuntimeConfig, SubscriberChain, WatcherChain};
//!
//! # async fn run() -> Result<(), certvisor::RuntimeError> {
//! let controller = Controller::new(
//!     RuntimeConfig::default(),
//!     WatcherChain::new(),
//!     SubscriberChain::new(),
//! );
//! controller.run_until_signal().await
//! # }
//! ```

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::RuntimeConfig;
use crate::core::shutdown;
use crate::error::RuntimeError;
use crate::subscribers::SubscriberChain;
use crate::tracking::{Tracker, TrackerHandle};
use crate::watchers::WatcherChain;

/// Owns the tracker, both chains and the shared cancellation token.
pub struct Controller {
    cfg: RuntimeConfig,
    watchers: WatcherChain,
    subscribers: SubscriberChain,
    token: CancellationToken,
    tasks: JoinSet<()>,
    handle: Option<TrackerHandle>,
}

impl Controller {
    pub fn new(cfg: RuntimeConfig, watchers: WatcherChain, subscribers: SubscriberChain) -> Self {
        Self {
            cfg,
            watchers,
            subscribers,
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
            handle: None,
        }
    }

    /// Token cancelled by [`Controller::stop`]; cancelling it has the same effect.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Input handle of the running tracker (`None` before [`Controller::start`]).
    pub fn tracker(&self) -> Option<&TrackerHandle> {
        self.handle.as_ref()
    }

    /// Starts the tracker, then every watcher and subscriber.
    ///
    /// Calling it again has no effect.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("controller already started");
            return;
        }

        let (tracker, handle) = Tracker::new(self.cfg.queue_capacity_clamped());
        self.tasks.spawn(
            tracker
                .run(self.token.child_token())
                .instrument(info_span!("tracker", component = "tracker")),
        );

        self.watchers
            .watch(&mut self.tasks, &handle.certificate_sender(), &self.token);
        self.subscribers
            .subscribe(&mut self.tasks, &handle.subscription_sender(), &self.token);

        info!(
            watchers = self.watchers.len(),
            subscribers = self.subscribers.len(),
            "controller started"
        );
        self.handle = Some(handle);
    }

    /// Requests shutdown of every task.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Waits for shutdown to be requested, then for all tasks to finish within the grace period.
    pub async fn wait(&mut self) -> Result<(), RuntimeError> {
        self.token.cancelled().await;
        // Dropping the handle lets the tracker finish once its queues drain.
        self.handle = None;

        let grace = self.cfg.shutdown_grace;
        let tasks = &mut self.tasks;
        let done = async { while tasks.join_next().await.is_some() {} };

        match tokio::time::timeout(grace, done).await {
            Ok(()) => {
                info!("all tasks stopped within grace");
                Ok(())
            }
            Err(_) => {
                let pending = self.tasks.len();
                self.tasks.abort_all();
                let err = RuntimeError::GraceExceeded { grace, pending };
                error!(label = err.as_label(), pending, ?grace, "shutdown grace exceeded");
                Err(err)
            }
        }
    }

    /// Starts (if needed), waits for a termination signal or an external stop, then shuts down.
    pub async fn run_until_signal(mut self) -> Result<(), RuntimeError> {
        if self.handle.is_none() {
            self.start();
        }

        tokio::select! {
            res = shutdown::wait_for_shutdown_signal() => {
                match res {
                    Ok(signal) => info!(signal, "shutdown requested"),
                    Err(e) => error!(error = %e, "failed listening for signals, shutting down"),
                }
                self.stop();
            }
            _ = self.token.cancelled() => {}
        }
        self.wait().await
    }
}
