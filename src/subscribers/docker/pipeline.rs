//! # Per-container action pipeline.
//!
//! One worker task per registered container drains that container's
//! invocation channel and runs its actions, one invocation at a time.
//!
//! ```text
//! Invocation ──► block (acknowledged) ──► attempt ──ok──► unblock
//!                                          │  ▲
//!                                       err│  │ resume at cursor
//!                                          ▼  │
//!                                      backoff delay ──budget spent──► unblock (failed)
//! ```
//!
//! ## Rules
//! - An attempt is connect + run actions from the cursor; actions that already
//!   succeeded are never re-run within one invocation.
//! - The container stays blocked from the first attempt to the terminal outcome.
//! - A failed invocation is not rescheduled; the next invocation starts fresh.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::ActionError;
use crate::policies::{BackoffPolicy, OnErrorPolicy};
use crate::subscribers::docker::action::{Action, ON_ERROR_RESTART_TIMEOUT};
use crate::subscribers::docker::backend::Connect;
use crate::subscribers::docker::gate::{GateRequest, unix_nanos};
use crate::tracking::Invocation;

/// Terminal outcome of one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// All actions ran (some may have failed under `continue`).
    Completed,
    /// An action's policy ended the sequence early.
    Stopped,
    /// The backoff budget ran out.
    Failed,
    /// The discovery task is gone; nothing was executed.
    Abandoned,
}

enum Step {
    Done,
    Stopped,
}

/// Runs one container's actions.
pub(crate) struct PipelineWorker {
    id: String,
    actions: Arc<[Action]>,
    connector: Arc<dyn Connect>,
    gate: mpsc::Sender<GateRequest>,
    backoff: BackoffPolicy,
}

impl PipelineWorker {
    pub(crate) fn new(
        id: String,
        actions: Arc<[Action]>,
        connector: Arc<dyn Connect>,
        gate: mpsc::Sender<GateRequest>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            id,
            actions,
            connector,
            gate,
            backoff,
        }
    }

    /// Processes invocations serially until cancelled or the channel closes.
    pub(crate) async fn run(self, mut invocations: mpsc::Receiver<Invocation>, token: CancellationToken) {
        debug!("pipeline worker started");
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                inv = invocations.recv() => {
                    let Some(inv) = inv else { break };
                    let span = info_span!("invocation", domain = %inv.domain);
                    tokio::select! {
                        _ = token.cancelled() => {
                            // Interrupted mid-run: release the block on the way out.
                            let _ = self.gate.try_send(GateRequest::Unblock {
                                id: self.id.clone(),
                                at: unix_nanos(),
                            });
                            break;
                        }
                        _ = self.execute(&inv).instrument(span) => {}
                    }
                }
            }
        }
        debug!("pipeline worker stopped");
    }

    /// Runs all actions for one invocation under the update block.
    pub(crate) async fn execute(&self, inv: &Invocation) -> Outcome {
        let (ack, acked) = oneshot::channel();
        let block = GateRequest::Block {
            id: self.id.clone(),
            ack,
        };
        if self.gate.send(block).await.is_err() || acked.await.is_err() {
            warn!("discovery stopped, skipping invocation");
            return Outcome::Abandoned;
        }

        info!(certificate = %inv.certificate.short_fingerprint(), "invoking actions");
        let outcome = self.run_with_backoff(inv).await;

        let _ = self
            .gate
            .send(GateRequest::Unblock {
                id: self.id.clone(),
                at: unix_nanos(),
            })
            .await;
        outcome
    }

    async fn run_with_backoff(&self, inv: &Invocation) -> Outcome {
        let mut cursor = 0usize;
        let mut backoff = self.backoff.start();
        loop {
            match self.attempt(&mut cursor, inv).await {
                Ok(Step::Done) => {
                    info!("actions completed");
                    return Outcome::Completed;
                }
                Ok(Step::Stopped) => return Outcome::Stopped,
                Err(err) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            error = %err,
                            label = err.as_label(),
                            cursor,
                            attempt = backoff.attempts(),
                            retry_in = ?delay,
                            "executing actions failed, retrying later"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(error = %err, label = err.as_label(), cursor, "executing actions failed permanently, not retrying");
                        return Outcome::Failed;
                    }
                },
            }
        }
    }

    /// One attempt from `cursor`; leaves `cursor` on the action to resume at.
    async fn attempt(&self, cursor: &mut usize, inv: &Invocation) -> Result<Step, ActionError> {
        let backend = self.connector.connect().await?;

        while let Some(action) = self.actions.get(*cursor) {
            let index = *cursor;
            match action.execute(backend.as_ref(), &self.id, inv).await {
                Ok(()) => debug!(index, %action, "action succeeded"),
                Err(err) => match action.on_error {
                    OnErrorPolicy::Retry => {
                        warn!(index, %action, error = %err, "action failed, retrying later");
                        return Err(err);
                    }
                    OnErrorPolicy::Stop => {
                        error!(index, %action, error = %err, "action failed, stopping all actions");
                        return Ok(Step::Stopped);
                    }
                    OnErrorPolicy::Continue => {
                        warn!(index, %action, error = %err, "action failed, continuing with next action");
                    }
                    policy @ (OnErrorPolicy::RestartThenStop | OnErrorPolicy::RestartThenContinue) => {
                        if let Err(restart_err) =
                            backend.restart(&self.id, ON_ERROR_RESTART_TIMEOUT).await
                        {
                            error!(
                                index,
                                %action,
                                error = %err,
                                restart_error = %restart_err,
                                "restart after failed action failed as well, retrying later"
                            );
                            return Err(err);
                        }
                        if policy == OnErrorPolicy::RestartThenStop {
                            error!(index, %action, error = %err, "action failed, restarted container and stopping all actions");
                            return Ok(Step::Stopped);
                        }
                        warn!(index, %action, error = %err, "action failed, restarted container and continuing");
                    }
                },
            }
            *cursor += 1;
        }
        Ok(Step::Done)
    }
}
