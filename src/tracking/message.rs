//! # Messages exchanged between adapters, the tracker and pipelines.
//!
//! ```text
//! Watcher  ── Arc<Certificate> ──► Tracker
//! Consumer ── Subscription     ──► Tracker
//! Tracker  ── Invocation       ──► Subscription::channel (owned by the consumer)
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cert::Certificate;

/// One certificate-ready event for one consumer.
#[derive(Clone, Debug)]
pub struct Invocation {
    /// The concrete domain whose certificate is now in effect.
    pub domain: String,
    /// The certificate in effect for `domain`.
    pub certificate: Arc<Certificate>,
    /// Correlation token copied from the [`Subscription`] (e.g. a container id).
    pub data: String,
}

/// A consumer's request to be notified about certificates for a set of domains.
///
/// The tracker keeps a clone of `channel` for delivery; the receiving half
/// stays with the subscriber.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// Name of the subscribing adapter (e.g. `docker`).
    pub subscriber: Arc<str>,
    /// Domains of interest, in priority order.
    pub domains: Vec<String>,
    /// Opaque correlation token copied into every [`Invocation`].
    pub data: String,
    /// Delivery channel owned by the subscriber.
    pub channel: mpsc::Sender<Invocation>,
}

impl Subscription {
    pub fn new(
        subscriber: impl Into<Arc<str>>,
        domains: Vec<String>,
        data: impl Into<String>,
        channel: mpsc::Sender<Invocation>,
    ) -> Self {
        Self {
            subscriber: subscriber.into(),
            domains,
            data: data.into(),
            channel,
        }
    }

    /// Builds the invocation this subscription receives for `domain`.
    pub(crate) fn invocation(&self, domain: &str, certificate: &Arc<Certificate>) -> Invocation {
        Invocation {
            domain: domain.to_string(),
            certificate: Arc::clone(certificate),
            data: self.data.clone(),
        }
    }
}
