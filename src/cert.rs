//! # Certificate material.
//!
//! A [`Certificate`] is immutable once built. Its [`fingerprint`](Certificate::fingerprint)
//! covers the certificate bytes only: a renewed key with an unchanged
//! certificate is not considered a change.

use std::fmt;

use sha2::{Digest, Sha256};

/// Content hash of a certificate's `cert` bytes.
pub type Fingerprint = [u8; 32];

/// Certificate bytes, private key bytes and the domain names they cover.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    names: Vec<String>,
    cert: Vec<u8>,
    key: Vec<u8>,
    fingerprint: Fingerprint,
}

impl Certificate {
    /// Builds a certificate; names keep their given order.
    pub fn new(names: Vec<String>, cert: Vec<u8>, key: Vec<u8>) -> Self {
        let fingerprint = Sha256::digest(&cert).into();
        Self {
            names,
            cert,
            key,
            fingerprint,
        }
    }

    /// Domain names covered, in source order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn cert(&self) -> &[u8] {
        &self.cert
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Hex form of the first 8 fingerprint bytes, for log fields.
    pub fn short_fingerprint(&self) -> String {
        hex::encode(&self.fingerprint[..8])
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("names", &self.names)
            .field("fingerprint", &self.short_fingerprint())
            .finish_non_exhaustive()
    }
}
