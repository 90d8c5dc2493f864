//! # Wildcard entries.
//!
//! A [`WildcardEntry`] is keyed by a single-level pattern `*.<suffix>` and
//! holds the wildcard certificate plus the concrete domains bound under it.

use std::sync::Arc;

use crate::cert::Certificate;

/// Prefix marking a wildcard name.
pub const WILDCARD_PREFIX: &str = "*.";

#[derive(Default)]
pub(crate) struct WildcardEntry {
    pub certificate: Option<Arc<Certificate>>,
    pub domains: Vec<String>,
}

impl WildcardEntry {
    pub fn with_certificate(certificate: Arc<Certificate>) -> Self {
        Self {
            certificate: Some(certificate),
            domains: Vec::new(),
        }
    }
}

pub fn is_wildcard(name: &str) -> bool {
    name.starts_with(WILDCARD_PREFIX)
}

/// Derives the wildcard pattern covering `domain` by replacing its first
/// label with `*`.
///
/// Only the first label is replaced: `a.b.example.com` maps to
/// `*.b.example.com`, never to `*.example.com`. Names without a dot have no
/// wildcard.
pub fn wildcard_for(domain: &str) -> Option<String> {
    domain.find('.').map(|dot| format!("*{}", &domain[dot..]))
}
