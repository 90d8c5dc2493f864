//! # Tracker: the single event loop owning all certificate state.
//!
//! ```text
//! watchers    ── Arc<Certificate> ──► [bounded queue] ─┐
//!                                                      ├─► Tracker::run ──► Registry
//! subscribers ── Subscription     ──► [bounded queue] ─┘        (one task, no locks)
//! ```
//!
//! ## Rules
//! - Both queues are bounded; senders wait when full (backpressure, never drop).
//! - Each queue is processed FIFO; no ordering is imposed across the two.
//! - Events sent before [`Tracker::start`] are buffered and applied once it runs.
//! - Cancellation is observed between events and while a delivery is stalled.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use crate::cert::Certificate;
use crate::error::TrackerError;
use crate::tracking::message::Subscription;
use crate::tracking::registry::Registry;

/// Handle for feeding events into a [`Tracker`].
#[derive(Clone, Debug)]
pub struct TrackerHandle {
    certificates: mpsc::Sender<Arc<Certificate>>,
    subscriptions: mpsc::Sender<Subscription>,
}

impl TrackerHandle {
    /// Enqueues a certificate-changed event (waits if the queue is full).
    pub async fn certificate_changed(
        &self,
        certificate: impl Into<Arc<Certificate>>,
    ) -> Result<(), TrackerError> {
        self.certificates
            .send(certificate.into())
            .await
            .map_err(|_| TrackerError::Closed)
    }

    /// Enqueues a subscription-add event (waits if the queue is full).
    pub async fn add_subscription(&self, sub: Subscription) -> Result<(), TrackerError> {
        self.subscriptions
            .send(sub)
            .await
            .map_err(|_| TrackerError::Closed)
    }

    /// Sender for certificate sources.
    pub fn certificate_sender(&self) -> mpsc::Sender<Arc<Certificate>> {
        self.certificates.clone()
    }

    /// Sender for consumer adapters.
    pub fn subscription_sender(&self) -> mpsc::Sender<Subscription> {
        self.subscriptions.clone()
    }
}

/// Serialized owner of the domain registry.
pub struct Tracker {
    registry: Registry,
    certificates: mpsc::Receiver<Arc<Certificate>>,
    subscriptions: mpsc::Receiver<Subscription>,
}

impl Tracker {
    /// Creates a tracker with two input queues of `capacity` each (min 1).
    pub fn new(capacity: usize) -> (Self, TrackerHandle) {
        let capacity = capacity.max(1);
        let (cert_tx, cert_rx) = mpsc::channel(capacity);
        let (sub_tx, sub_rx) = mpsc::channel(capacity);

        let tracker = Self {
            registry: Registry::new(),
            certificates: cert_rx,
            subscriptions: sub_rx,
        };
        let handle = TrackerHandle {
            certificates: cert_tx,
            subscriptions: sub_tx,
        };
        (tracker, handle)
    }

    /// Spawns the event loop. Consumes the tracker, so it can start only once.
    pub fn start(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(
            self.run(token)
                .instrument(info_span!("tracker", component = "tracker")),
        )
    }

    /// Drains both queues until cancellation or until every sender is gone.
    pub async fn run(mut self, token: CancellationToken) {
        info!("tracker started");
        let mut certificates_open = true;
        let mut subscriptions_open = true;
        while certificates_open || subscriptions_open {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                certificate = self.certificates.recv(), if certificates_open => match certificate {
                    Some(certificate) => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = self.registry.certificate_changed(certificate) => {}
                        }
                    }
                    None => certificates_open = false,
                },
                sub = self.subscriptions.recv(), if subscriptions_open => match sub {
                    Some(sub) => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = self.registry.add_subscription(sub) => {}
                        }
                    }
                    None => subscriptions_open = false,
                },
            }
        }
        info!("tracker stopped");
    }
}
