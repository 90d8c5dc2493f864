//! # Update gate: suppression of self-inflicted lifecycle events.
//!
//! While a pipeline runs against a container, its own restarts and execs
//! produce lifecycle events that must not re-register or drop the container.
//!
//! ```text
//! pipeline ── Block{ack} ──► discovery: state = Blocked, ack
//!          ... actions ...
//!          ── Unblock{at} ─► discovery: state = Until(at)
//! ```
//!
//! An event is ignored while the state is `Blocked`, or when it is stamped
//! before the `Until` instant (events can arrive late). The state is owned by
//! the discovery task; pipelines only send requests.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;

/// Request from a pipeline worker to the discovery task.
#[derive(Debug)]
pub(crate) enum GateRequest {
    /// Block events for `id`; `ack` is answered once the block is in place.
    Block {
        id: String,
        ack: oneshot::Sender<()>,
    },
    /// Lift the block, still ignoring events stamped before `at` (unix nanos).
    Unblock { id: String, at: i64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockState {
    Blocked,
    Until(i64),
}

/// Per-container block states.
#[derive(Debug, Default)]
pub(crate) struct UpdateGate {
    states: HashMap<String, BlockState>,
}

impl UpdateGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn apply(&mut self, req: GateRequest) {
        match req {
            GateRequest::Block { id, ack } => {
                self.states.insert(id, BlockState::Blocked);
                let _ = ack.send(());
            }
            // A container forgotten meanwhile stays forgotten.
            GateRequest::Unblock { id, at } => {
                if let Some(state) = self.states.get_mut(&id) {
                    *state = BlockState::Until(at);
                }
            }
        }
    }

    /// Whether an event for `id` stamped `time_nano` must be ignored.
    pub(crate) fn is_blocked(&self, id: &str, time_nano: i64) -> bool {
        match self.states.get(id) {
            Some(BlockState::Blocked) => true,
            Some(BlockState::Until(at)) => *at > time_nano,
            None => false,
        }
    }

    pub(crate) fn forget(&mut self, id: &str) {
        self.states.remove(id);
    }
}

/// Current wall-clock time in unix nanoseconds, the unit of event timestamps.
pub(crate) fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_container_is_not_blocked() {
        let gate = UpdateGate::new();
        assert!(!gate.is_blocked("c1", 0));
    }

    #[tokio::test]
    async fn test_block_is_acknowledged_and_masks_everything() {
        let mut gate = UpdateGate::new();
        let (ack, ack_rx) = oneshot::channel();
        gate.apply(GateRequest::Block {
            id: "c1".into(),
            ack,
        });
        ack_rx.await.unwrap();

        assert!(gate.is_blocked("c1", 0));
        assert!(gate.is_blocked("c1", i64::MAX));
        assert!(!gate.is_blocked("c2", 0));
    }

    #[test]
    fn test_unblock_masks_only_earlier_events() {
        let mut gate = UpdateGate::new();
        let (ack, _rx) = oneshot::channel();
        gate.apply(GateRequest::Block {
            id: "c1".into(),
            ack,
        });
        gate.apply(GateRequest::Unblock {
            id: "c1".into(),
            at: 1_000,
        });

        assert!(gate.is_blocked("c1", 999));
        assert!(!gate.is_blocked("c1", 1_000));
        assert!(!gate.is_blocked("c1", 1_001));
    }

    #[test]
    fn test_forget_clears_state() {
        let mut gate = UpdateGate::new();
        let (ack, _rx) = oneshot::channel();
        gate.apply(GateRequest::Block {
            id: "c1".into(),
            ack,
        });
        gate.forget("c1");
        assert!(!gate.is_blocked("c1", 0));
        assert!(gate.states.is_empty());
    }

    #[test]
    fn test_late_unblock_after_forget_is_ignored() {
        let mut gate = UpdateGate::new();
        let (ack, _rx) = oneshot::channel();
        gate.apply(GateRequest::Block {
            id: "c1".into(),
            ack,
        });
        gate.forget("c1");

        // A cancelled worker releases its block after the container was dropped.
        gate.apply(GateRequest::Unblock {
            id: "c1".into(),
            at: i64::MAX,
        });
        assert!(gate.states.is_empty());
        assert!(!gate.is_blocked("c1", 0));
    }

    #[test]
    fn test_unix_nanos_is_monotonic_enough() {
        let a = unix_nanos();
        let b = unix_nanos();
        assert!(a > 0);
        assert!(b >= a);
    }
}
