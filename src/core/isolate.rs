//! Panic-isolated spawning of adapter tasks.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, error, info};

/// Spawns an adapter future into `set`, logging its outcome.
///
/// A panic or error inside the adapter is logged and ends only that adapter;
/// the rest of the set keeps running.
pub(crate) fn spawn_isolated<F, E>(
    set: &mut JoinSet<()>,
    kind: &'static str,
    name: &'static str,
    span: Span,
    fut: F,
) where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    set.spawn(
        async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => info!(kind, name, "adapter stopped"),
                Ok(Err(e)) => error!(kind, name, error = %e, "adapter failed"),
                Err(_) => error!(kind, name, "adapter panicked"),
            }
        }
        .instrument(span),
    );
}
