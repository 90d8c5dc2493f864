//! # Per-domain certificate holder.
//!
//! An [`Item`] keeps the certificate currently in effect for one concrete
//! domain and the subscriptions attached to it. Deliveries happen in
//! attachment order.
//!
//! ## Rules
//! - A certificate with the stored fingerprint is a no-op (no state change, no delivery).
//! - A new subscription immediately receives the current certificate, if any.
//! - A closed subscriber channel never stalls the item; its subscription is
//!   dropped on the next certificate update.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cert::{Certificate, Fingerprint};
use crate::tracking::message::Subscription;

pub(crate) struct Item {
    domain: String,
    certificate: Option<Arc<Certificate>>,
    fingerprint: Option<Fingerprint>,
    subscriptions: Vec<Subscription>,
}

impl Item {
    /// Creates an item, optionally seeded with a certificate.
    pub fn new(domain: impl Into<String>, certificate: Option<Arc<Certificate>>) -> Self {
        let fingerprint = certificate.as_ref().map(|c| *c.fingerprint());
        Self {
            domain: domain.into(),
            certificate,
            fingerprint,
            subscriptions: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Stores `certificate` and notifies every subscription, unless unchanged.
    ///
    /// Returns `true` if the certificate was new.
    pub async fn update_certificate(&mut self, certificate: &Arc<Certificate>) -> bool {
        if self.fingerprint.as_ref() == Some(certificate.fingerprint()) {
            info!(
                domain = %self.domain,
                fingerprint = %certificate.short_fingerprint(),
                "skipping certificate update as it didn't change"
            );
            return false;
        }

        self.certificate = Some(Arc::clone(certificate));
        self.fingerprint = Some(*certificate.fingerprint());

        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| !sub.channel.is_closed());
        if self.subscriptions.len() != before {
            debug!(
                domain = %self.domain,
                removed = before - self.subscriptions.len(),
                "dropped closed subscriptions"
            );
        }

        for sub in &self.subscriptions {
            deliver(&self.domain, sub, certificate).await;
        }
        true
    }

    /// Attaches a subscription and delivers the current certificate to it.
    pub async fn add_subscription(&mut self, sub: Subscription) {
        if let Some(certificate) = &self.certificate {
            deliver(&self.domain, &sub, certificate).await;
        }
        self.subscriptions.push(sub);
    }
}

async fn deliver(domain: &str, sub: &Subscription, certificate: &Arc<Certificate>) {
    info!(
        domain,
        subscriber = %sub.subscriber,
        data = %sub.data,
        "invoking subscriber"
    );
    if sub.channel.send(sub.invocation(domain, certificate)).await.is_err() {
        debug!(
            domain,
            subscriber = %sub.subscriber,
            data = %sub.data,
            "subscriber channel closed, invocation dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn cert(body: &str) -> Arc<Certificate> {
        Arc::new(Certificate::new(
            vec!["a.test".into()],
            body.as_bytes().to_vec(),
            b"key".to_vec(),
        ))
    }

    #[tokio::test]
    async fn test_same_fingerprint_is_not_redelivered() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut item = Item::new("a.test", None);
        item.add_subscription(Subscription::new("t", vec!["a.test".into()], "c1", tx))
            .await;

        assert!(item.update_certificate(&cert("one")).await);
        assert!(!item.update_certificate(&cert("one")).await);

        assert_eq!(rx.recv().await.unwrap().domain, "a.test");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_seeded_item_delivers_on_attach_and_dedups() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut item = Item::new("a.test", Some(cert("one")));
        item.add_subscription(Subscription::new("t", vec!["a.test".into()], "c1", tx))
            .await;

        assert_eq!(rx.recv().await.unwrap().data, "c1");
        assert!(!item.update_certificate(&cert("one")).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_block_others() {
        let (closed_tx, closed_rx) = mpsc::channel(1);
        drop(closed_rx);
        let (tx, mut rx) = mpsc::channel(8);

        let mut item = Item::new("a.test", None);
        item.add_subscription(Subscription::new("t", vec![], "gone", closed_tx))
            .await;
        item.add_subscription(Subscription::new("t", vec![], "alive", tx))
            .await;

        item.update_certificate(&cert("one")).await;
        assert_eq!(rx.recv().await.unwrap().data, "alive");
        assert_eq!(item.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_reregistrations_do_not_accumulate() {
        let mut item = Item::new("a.test", None);
        let mut live = None;
        for round in 0..5 {
            // Each round replaces the consumer's channel, like a container restart.
            let (tx, rx) = mpsc::channel(8);
            item.add_subscription(Subscription::new("t", vec![], format!("c{round}"), tx))
                .await;
            live = Some(rx);
        }

        item.update_certificate(&cert("one")).await;
        assert_eq!(item.subscription_count(), 1);
        assert_eq!(live.unwrap().recv().await.unwrap().data, "c4");
    }
}
