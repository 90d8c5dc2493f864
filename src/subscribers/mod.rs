//! Consumer discovery adapters.
//!
//! - [`Subscribe`] the adapter trait
//! - [`SubscriberChain`] runs all configured adapters concurrently
//! - [`docker`] container discovery and per-container action pipelines

mod chain;
pub mod docker;
mod subscriber;

pub use chain::SubscriberChain;
pub use docker::{DockerConfig, DockerSubscriber};
pub use subscriber::Subscribe;
