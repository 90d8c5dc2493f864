//! Retry and failure-handling policies.
//!
//! This module groups the knobs that control **what happens when an action fails**
//! and **how long** to wait before the pipeline is tried again.
//!
//! ## Contents
//! - [`OnErrorPolicy`] per-action failure handling (retry / stop / continue / restart-then-*)
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max / elapsed budget + jitter)
//! - [`JitterPolicy`]  randomization of delays
//!
//! ## Quick wiring
//! ```text
//! Action { on_error: OnErrorPolicy, .. }
//!      └─► subscribers::docker::pipeline uses:
//!           - on_error to continue / abort / restart after a failed action
//!           - backoff.start().next_delay() to schedule the next whole-pipeline attempt
//! ```
//!
//! ## Defaults
//! - `OnErrorPolicy::Retry`.
//! - `BackoffPolicy::default()` → first=1s, factor=1.5, max=60s, max_elapsed=15m, ±50% jitter.

mod backoff;
mod jitter;
mod on_error;

pub use backoff::{Backoff, BackoffPolicy};
pub use jitter::JitterPolicy;
pub use on_error::OnErrorPolicy;
