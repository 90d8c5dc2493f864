//! Certificate tracking and subscriber fan-out.
//!
//! ## Contents
//! - [`Tracker`], [`TrackerHandle`] the serialized event loop and its input handle
//! - [`Subscription`], [`Invocation`] the subscription protocol shared with consumers
//! - [`wildcard_for`] single-level wildcard derivation
//!
//! Internal modules:
//! - `registry`: domain → item and pattern → wildcard maps, and the two algorithms;
//! - `item`: per-domain certificate holder with fingerprint dedup;
//! - `wildcard`: per-pattern certificate holder and bound domains.

mod item;
mod message;
mod registry;
mod tracker;
mod wildcard;

pub use message::{Invocation, Subscription};
pub use tracker::{Tracker, TrackerHandle};
pub use wildcard::{WILDCARD_PREFIX, is_wildcard, wildcard_for};
