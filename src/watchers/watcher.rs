//! # Certificate source trait.
//!
//! A [`Watch`] implementation observes some certificate store and pushes every
//! certificate it reads into the tracker's queue. Sending waits when the
//! queue is full; implementations must not drop certificates to avoid waiting.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//! use certvisor::{Certificate, Watch, WatchError};
//!
//! struct Static(Certificate);
//!
//! #[async_trait]
//! impl Watch for Static {
//!     fn name(&self) -> &'static str { "static" }
//!
//!     async fn watch(
//!         &self,
//!         certificates: mpsc::Sender<Arc<Certificate>>,
//!         token: CancellationToken,
//!     ) -> Result<(), WatchError> {
//!         let _ = certificates.send(Arc::new(self.0.clone())).await;
//!         token.cancelled().await;
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cert::Certificate;
use crate::error::WatchError;

/// Certificate source adapter.
#[async_trait]
pub trait Watch: Send + Sync + 'static {
    /// Short name used in logs (e.g. `acme`).
    fn name(&self) -> &'static str;

    /// Validates the watcher before it joins a chain.
    fn init(&self) -> Result<(), WatchError> {
        Ok(())
    }

    /// Runs until `token` is cancelled, pushing certificates into `certificates`.
    ///
    /// Per-item problems (unreadable file, malformed entry) are logged and
    /// skipped; an `Err` return means the source cannot run at all.
    async fn watch(
        &self,
        certificates: mpsc::Sender<Arc<Certificate>>,
        token: CancellationToken,
    ) -> Result<(), WatchError>;
}
