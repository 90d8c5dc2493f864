//! # ACME store watcher.
//!
//! Reads a Traefik-style `acme.json` store and re-reads it whenever the file
//! changes on disk.
//!
//! ```text
//! { "<resolver>": { "Certificates": [
//!     { "domain": { "main": "a.example.com", "sans": ["b.example.com"] },
//!       "certificate": "<base64 PEM chain>",
//!       "key": "<base64 PEM key>" } ] } }
//! ```
//!
//! ## Rules
//! - The store is read once at start, then on every change event touching it.
//! - Certificate names are `main` followed by `sans`, in that order.
//! - An entry that fails to decode is logged and skipped; the rest still load.
//! - A missing or unparsable file is logged; the watcher keeps waiting for changes.
//! - The watch is placed on the nearest existing ancestor directory, so the
//!   store may be created after the watcher starts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cert::Certificate;
use crate::error::WatchError;
use crate::watchers::watcher::Watch;

/// Buffered filesystem notifications; overflow is harmless since any event triggers a full re-read.
const EVENT_BUFFER: usize = 64;

/// Configuration of the ACME store watcher.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AcmeConfig {
    /// Path of the `acme.json` store.
    #[serde(alias = "acmePath")]
    pub acme_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Resolver {
    #[serde(rename = "Certificates", default)]
    certificates: Option<Vec<StoredCertificate>>,
}

#[derive(Debug, Deserialize)]
struct StoredCertificate {
    domain: StoredDomain,
    #[serde(default)]
    certificate: String,
    #[serde(default)]
    key: String,
}

#[derive(Debug, Deserialize)]
struct StoredDomain {
    #[serde(default)]
    main: String,
    #[serde(default)]
    sans: Option<Vec<String>>,
}

/// Parses an ACME store, skipping entries that fail to decode.
pub(crate) fn parse_store(raw: &[u8]) -> Result<Vec<Certificate>, serde_json::Error> {
    let store: HashMap<String, Option<Resolver>> = serde_json::from_slice(raw)?;

    let mut resolvers: Vec<_> = store.into_iter().collect();
    resolvers.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = Vec::new();
    for (resolver, entries) in resolvers {
        let entries = entries.and_then(|r| r.certificates).unwrap_or_default();
        for entry in entries {
            match decode_entry(entry) {
                Ok(cert) => out.push(cert),
                Err(reason) => warn!(resolver = %resolver, %reason, "skipping store entry"),
            }
        }
    }
    Ok(out)
}

fn decode_entry(entry: StoredCertificate) -> Result<Certificate, String> {
    let mut names = Vec::with_capacity(1 + entry.domain.sans.as_ref().map_or(0, Vec::len));
    if !entry.domain.main.is_empty() {
        names.push(entry.domain.main);
    }
    names.extend(
        entry
            .domain
            .sans
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !s.is_empty()),
    );
    if names.is_empty() {
        return Err("entry has no domain names".into());
    }

    let cert = STANDARD
        .decode(entry.certificate.trim())
        .map_err(|e| format!("{}: invalid certificate encoding: {e}", names[0]))?;
    let key = STANDARD
        .decode(entry.key.trim())
        .map_err(|e| format!("{}: invalid key encoding: {e}", names[0]))?;
    if cert.is_empty() {
        return Err(format!("{}: empty certificate", names[0]));
    }
    Ok(Certificate::new(names, cert, key))
}

/// Returns the directory to watch for `path` and whether the watch must recurse.
///
/// That is the parent when it exists, otherwise the closest existing ancestor.
fn watch_root(path: &Path) -> (PathBuf, RecursiveMode) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut root = parent.as_path();
    loop {
        if root.is_dir() {
            let mode = if root == parent {
                RecursiveMode::NonRecursive
            } else {
                RecursiveMode::Recursive
            };
            return (root.to_path_buf(), mode);
        }
        match root.parent() {
            Some(p) if !p.as_os_str().is_empty() => root = p,
            _ => return (PathBuf::from("."), RecursiveMode::Recursive),
        }
    }
}

fn touches(event: &Event, file_name: &std::ffi::OsStr) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name) || p.is_dir())
}

/// Watches a Traefik ACME store file.
pub struct AcmeWatcher {
    path: PathBuf,
}

impl AcmeWatcher {
    pub fn new(cfg: AcmeConfig) -> Self {
        Self {
            path: cfg.acme_path,
        }
    }

    /// Reads the store and forwards its certificates.
    ///
    /// Returns `false` once the certificate queue is closed.
    async fn load(
        &self,
        certificates: &mpsc::Sender<Arc<Certificate>>,
        token: &CancellationToken,
    ) -> bool {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "store not present yet");
                return true;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed reading store");
                return true;
            }
        };
        let parsed = match parse_store(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed parsing store");
                return true;
            }
        };

        info!(count = parsed.len(), "store loaded");
        for cert in parsed {
            debug!(domain = %cert.names()[0], fingerprint = %cert.short_fingerprint(), "certificate read");
            tokio::select! {
                _ = token.cancelled() => return false,
                res = certificates.send(Arc::new(cert)) => {
                    if res.is_err() {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn place_watch(
        &self,
        watcher: &mut RecommendedWatcher,
        current: &mut Option<PathBuf>,
    ) -> Result<bool, WatchError> {
        let (root, mode) = watch_root(&self.path);
        if current.as_ref() == Some(&root) {
            return Ok(false);
        }
        if let Some(old) = current.take() {
            let _ = watcher.unwatch(&old);
        }
        watcher.watch(&root, mode)?;
        debug!(root = %root.display(), "watching directory");
        *current = Some(root);
        Ok(true)
    }
}

#[async_trait]
impl Watch for AcmeWatcher {
    fn name(&self) -> &'static str {
        "acme"
    }

    fn init(&self) -> Result<(), WatchError> {
        if self.path.as_os_str().is_empty() {
            return Err(WatchError::Config("acme_path must not be empty".into()));
        }
        if self.path.file_name().is_none() {
            return Err(WatchError::Config(format!(
                "acme_path {} does not name a file",
                self.path.display()
            )));
        }
        Ok(())
    }

    async fn watch(
        &self,
        certificates: mpsc::Sender<Arc<Certificate>>,
        token: CancellationToken,
    ) -> Result<(), WatchError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| WatchError::Config("acme_path does not name a file".into()))?;

        let (events_tx, mut events) = mpsc::channel::<Event>(EVENT_BUFFER);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(ev) => {
                let _ = events_tx.try_send(ev);
            }
            Err(e) => warn!(error = %e, "filesystem watch error"),
        })?;
        let mut root = None;
        self.place_watch(&mut watcher, &mut root)?;

        info!(path = %self.path.display(), "watching store");
        if !self.load(&certificates, &token).await {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                ev = events.recv() => {
                    let Some(ev) = ev else { break };
                    let mut relevant = touches(&ev, &file_name);
                    while let Ok(more) = events.try_recv() {
                        relevant |= touches(&more, &file_name);
                    }
                    if !relevant {
                        continue;
                    }
                    // Directories may have appeared; move the watch closer to the store.
                    if let Err(e) = self.place_watch(&mut watcher, &mut root) {
                        warn!(error = %e, "failed moving directory watch");
                    }
                    if !self.load(&certificates, &token).await {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
