//! # SubscriberChain: concurrent fan-in over all configured discovery adapters.
//!
//! ```text
//! SubscriberChain::subscribe()
//!   ├──► DockerSubscriber ──┐
//!   └──► ...             ───┴──► Tracker subscription queue (shared, bounded)
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info_span};

use crate::config::{RuntimeConfig, SubscribersConfig};
use crate::core::spawn_isolated;
use crate::error::SubscribeError;
use crate::subscribers::docker::DockerSubscriber;
use crate::subscribers::subscriber::Subscribe;
use crate::tracking::Subscription;

/// Set of initialized discovery adapters.
#[derive(Default)]
pub struct SubscriberChain {
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SubscriberChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the chain from configuration; adapters failing `init` are logged and left out.
    pub fn from_config(cfg: &SubscribersConfig, runtime: &RuntimeConfig) -> Self {
        let mut chain = Self::new();
        if let Some(docker) = &cfg.docker {
            chain.quiet_add(Arc::new(DockerSubscriber::new(
                docker.clone(),
                runtime.pipeline_backoff,
            )));
        }
        chain
    }

    /// Initializes and adds an adapter.
    pub fn add(&mut self, subscriber: Arc<dyn Subscribe>) -> Result<(), SubscribeError> {
        subscriber.init()?;
        self.subscribers.push(subscriber);
        Ok(())
    }

    fn quiet_add(&mut self, subscriber: Arc<dyn Subscribe>) {
        let name = subscriber.name();
        if let Err(e) = self.add(subscriber) {
            error!(subscriber = name, error = %e, "failed initializing subscriber");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Starts every adapter concurrently; each gets a child of `token`.
    pub fn subscribe(
        &self,
        set: &mut JoinSet<()>,
        subscriptions: &mpsc::Sender<Subscription>,
        token: &CancellationToken,
    ) {
        for subscriber in &self.subscribers {
            let subscriber = Arc::clone(subscriber);
            let tx = subscriptions.clone();
            let child = token.child_token();
            let name = subscriber.name();
            spawn_isolated(
                set,
                "subscriber",
                name,
                info_span!("subscriber", component = "subscriber", subscriber = name),
                async move { subscriber.subscribe(tx, child).await },
            );
        }
    }
}
