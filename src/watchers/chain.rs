//! # WatcherChain: concurrent fan-in over all configured certificate sources.
//!
//! ```text
//! WatcherChain::watch()
//!   ├──► AcmeWatcher ─────┐
//!   ├──► ...           ───┼──► Tracker certificate queue (shared, bounded)
//!   └──► WatcherN ────────┘
//! ```
//!
//! Each watcher runs in its own task; a failing or panicking watcher is
//! logged and does not affect the others.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info_span};

use crate::cert::Certificate;
use crate::config::WatchersConfig;
use crate::core::spawn_isolated;
use crate::error::WatchError;
use crate::watchers::acme::AcmeWatcher;
use crate::watchers::watcher::Watch;

/// Set of initialized certificate sources.
#[derive(Default)]
pub struct WatcherChain {
    watchers: Vec<Arc<dyn Watch>>,
}

impl WatcherChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the chain from configuration; watchers failing `init` are logged and left out.
    pub fn from_config(cfg: &WatchersConfig) -> Self {
        let mut chain = Self::new();
        if let Some(acme) = &cfg.acme {
            chain.quiet_add(Arc::new(AcmeWatcher::new(acme.clone())));
        }
        chain
    }

    /// Initializes and adds a watcher.
    pub fn add(&mut self, watcher: Arc<dyn Watch>) -> Result<(), WatchError> {
        watcher.init()?;
        self.watchers.push(watcher);
        Ok(())
    }

    fn quiet_add(&mut self, watcher: Arc<dyn Watch>) {
        let name = watcher.name();
        if let Err(e) = self.add(watcher) {
            error!(watcher = name, error = %e, "failed initializing watcher");
        }
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Starts every watcher concurrently; each gets a child of `token`.
    pub fn watch(
        &self,
        set: &mut JoinSet<()>,
        certificates: &mpsc::Sender<Arc<Certificate>>,
        token: &CancellationToken,
    ) {
        for watcher in &self.watchers {
            let watcher = Arc::clone(watcher);
            let tx = certificates.clone();
            let child = token.child_token();
            let name = watcher.name();
            spawn_isolated(
                set,
                "watcher",
                name,
                info_span!("watcher", component = "watcher", watcher = name),
                async move { watcher.watch(tx, child).await },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Once {
        name: &'static str,
        body: &'static str,
        fail_init: bool,
    }

    #[async_trait]
    impl Watch for Once {
        fn name(&self) -> &'static str {
            self.name
        }

        fn init(&self) -> Result<(), WatchError> {
            if self.fail_init {
                return Err(WatchError::Config("nope".into()));
            }
            Ok(())
        }

        async fn watch(
            &self,
            certificates: mpsc::Sender<Arc<Certificate>>,
            token: CancellationToken,
        ) -> Result<(), WatchError> {
            let cert = Certificate::new(
                vec![format!("{}.example.com", self.name)],
                self.body.as_bytes().to_vec(),
                vec![],
            );
            let _ = certificates.send(Arc::new(cert)).await;
            token.cancelled().await;
            Ok(())
        }
    }

    #[test]
    fn test_failed_init_is_rejected() {
        let mut chain = WatcherChain::new();
        let res = chain.add(Arc::new(Once {
            name: "bad",
            body: "",
            fail_init: true,
        }));
        assert!(res.is_err());
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn test_all_watchers_feed_shared_queue() {
        let mut chain = WatcherChain::new();
        for (name, body) in [("a", "one"), ("b", "two")] {
            chain
                .add(Arc::new(Once {
                    name,
                    body,
                    fail_init: false,
                }))
                .unwrap();
        }

        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let mut set = JoinSet::new();
        chain.watch(&mut set, &tx, &token);

        let mut names = Vec::new();
        for _ in 0..2 {
            let cert = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            names.push(cert.names()[0].clone());
        }
        names.sort();
        assert_eq!(names, vec!["a.example.com", "b.example.com"]);

        token.cancel();
        while set.join_next().await.is_some() {}
    }
}
