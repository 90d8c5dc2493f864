//! Certificate sources.
//!
//! - [`Watch`] the source trait
//! - [`WatcherChain`] runs all configured sources concurrently
//! - [`AcmeWatcher`] Traefik `acme.json` store watcher

mod acme;
mod chain;
mod watcher;

pub use acme::{AcmeConfig, AcmeWatcher};
pub use chain::WatcherChain;
pub use watcher::Watch;
