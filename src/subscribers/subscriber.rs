//! # Consumer discovery trait.
//!
//! Provides [`Subscribe`], the extension point for adapters that discover
//! certificate consumers and register them with the tracker.
//!
//! Each adapter gets:
//! - **Dedicated task** (runs until cancelled)
//! - **Shared bounded subscription queue** (sending waits when full)
//! - **Panic isolation** (a panicking adapter is logged; others keep running)
//!
//! ## Rules
//! - Every [`Subscription`] sent carries a channel the adapter drains itself.
//! - A slow channel stalls the tracker; adapters size and drain channels accordingly.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//! use certvisor::{Subscribe, SubscribeError, Subscription};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl Subscribe for Printer {
//!     fn name(&self) -> &'static str { "printer" }
//!
//!     async fn subscribe(
//!         &self,
//!         subscriptions: mpsc::Sender<Subscription>,
//!         token: CancellationToken,
//!     ) -> Result<(), SubscribeError> {
//!         let (tx, mut rx) = mpsc::channel(8);
//!         let sub = Subscription::new("printer", vec!["a.example.com".into()], "", tx);
//!         let _ = subscriptions.send(sub).await;
//!         loop {
//!             tokio::select! {
//!                 _ = token.cancelled() => return Ok(()),
//!                 Some(inv) = rx.recv() => println!("{} renewed", inv.domain),
//!             }
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SubscribeError;
use crate::tracking::Subscription;

/// Consumer discovery adapter.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Log per-consumer problems and keep going; return `Err` only when the
///   adapter cannot run at all.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Short name used in logs and as [`Subscription::subscriber`].
    fn name(&self) -> &'static str;

    /// Validates the adapter before it joins a chain.
    fn init(&self) -> Result<(), SubscribeError> {
        Ok(())
    }

    /// Runs until `token` is cancelled, sending subscriptions into `subscriptions`.
    async fn subscribe(
        &self,
        subscriptions: mpsc::Sender<Subscription>,
        token: CancellationToken,
    ) -> Result<(), SubscribeError>;
}
