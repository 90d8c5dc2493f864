//! # Domain registry: the tracker's state machine.
//!
//! Maps concrete domains to [`Item`]s and wildcard patterns to
//! [`WildcardEntry`]s. Owned by the tracker loop only; every method runs on
//! that single task, so no locking is involved.
//!
//! ## Certificate changed
//! ```text
//! for name in certificate.names():
//!   "*.<suffix>" ─► entry exists?  yes ─► entry.certificate = cert; every bound item ◄─ cert
//!                                   no  ─► new entry { cert, [] }
//!   concrete    ─► item exists?   yes ─► item ◄─ cert (dedup by fingerprint)
//!                                   no  ─► new item { cert, no subscribers }
//! ```
//!
//! ## Subscription added
//! ```text
//! for domain in subscription.domains:
//!   item exists ─► attach (deliver current cert) and STOP processing this subscription
//!   otherwise   ─► bind domain under "*.<suffix>" (entry created lazily),
//!                  new item seeded with the wildcard's cert, attach, continue
//! ```
//!
//! Items and wildcard entries are never removed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cert::Certificate;
use crate::tracking::item::Item;
use crate::tracking::message::Subscription;
use crate::tracking::wildcard::{WildcardEntry, is_wildcard, wildcard_for};

#[derive(Default)]
pub(crate) struct Registry {
    items: HashMap<String, Item>,
    wildcards: HashMap<String, WildcardEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a changed certificate to every name it covers, in listed order.
    pub async fn certificate_changed(&mut self, certificate: Arc<Certificate>) {
        info!(
            names = ?certificate.names(),
            fingerprint = %certificate.short_fingerprint(),
            "handling changed certificate"
        );
        let Self { items, wildcards } = self;

        for name in certificate.names() {
            if is_wildcard(name) {
                match wildcards.get_mut(name) {
                    Some(entry) => {
                        entry.certificate = Some(Arc::clone(&certificate));
                        for domain in &entry.domains {
                            if let Some(item) = items.get_mut(domain) {
                                item.update_certificate(&certificate).await;
                            }
                        }
                    }
                    None => {
                        wildcards.insert(
                            name.clone(),
                            WildcardEntry::with_certificate(Arc::clone(&certificate)),
                        );
                    }
                }
            } else if let Some(item) = items.get_mut(name) {
                item.update_certificate(&certificate).await;
            } else {
                items.insert(
                    name.clone(),
                    Item::new(name.clone(), Some(Arc::clone(&certificate))),
                );
            }
        }
    }

    /// Attaches a subscription to its domains.
    ///
    /// Processing stops at the first domain that already has an item; later
    /// domains of the same subscription are not looked at.
    pub async fn add_subscription(&mut self, sub: Subscription) {
        info!(
            subscriber = %sub.subscriber,
            data = %sub.data,
            domains = ?sub.domains,
            "adding subscription"
        );
        if sub.domains.is_empty() {
            warn!(subscriber = %sub.subscriber, data = %sub.data, "subscription without domains ignored");
            return;
        }

        let Self { items, wildcards } = self;

        for domain in &sub.domains {
            if domain.is_empty() {
                warn!(subscriber = %sub.subscriber, "empty domain name skipped");
                continue;
            }
            if let Some(item) = items.get_mut(domain) {
                item.add_subscription(sub.clone()).await;
                return;
            }

            let seed = match wildcard_for(domain) {
                Some(pattern) => {
                    let found = wildcards.contains_key(&pattern);
                    debug!(wildcard_found = found, wildcard_name = %pattern, "checked wildcard");
                    let entry = wildcards.entry(pattern).or_default();
                    entry.domains.push(domain.clone());
                    entry.certificate.clone()
                }
                None => None,
            };

            let mut item = Item::new(domain.clone(), seed);
            item.add_subscription(sub.clone()).await;
            items.insert(domain.clone(), item);
        }
    }

    #[cfg(test)]
    fn item(&self, domain: &str) -> Option<&Item> {
        self.items.get(domain)
    }

    #[cfg(test)]
    fn wildcard(&self, pattern: &str) -> Option<&WildcardEntry> {
        self.wildcards.get(pattern)
    }
}
