use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Lifecycle of one executor instance.
///
/// `Idle` and `Executing` together make up the ready phase: the handle is open and
/// requests are being consumed one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorState {
    /// Opening the database handle
    Starting,
    /// Ready, waiting for the next request
    Idle,
    /// Ready, running exactly one request
    Executing,
    /// Handle closed; absorbing
    Terminated,
}

impl ExecutorState {
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Idle | Self::Executing)
    }

    fn can_transition_to(self, next: ExecutorState) -> bool {
        use ExecutorState::{Executing, Idle, Starting, Terminated};
        matches!(
            (self, next),
            (Starting, Idle | Terminated)
                | (Idle, Executing | Terminated)
                | (Executing, Idle | Terminated)
        )
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// Shared, observable executor state. Written by the worker thread, read by clients.
#[derive(Clone)]
pub(crate) struct StateCell {
    tx: Arc<watch::Sender<ExecutorState>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ExecutorState::Starting);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn get(&self) -> ExecutorState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ExecutorState> {
        self.tx.subscribe()
    }

    /// Apply `next` if the state machine allows it; returns whether it changed.
    pub(crate) fn transition(&self, next: ExecutorState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn terminate(&self) {
        self.transition(ExecutorState::Terminated);
    }

    /// Start over for a fresh executor instance.
    pub(crate) fn reset(&self) {
        self.tx.send_replace(ExecutorState::Starting);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_is_absorbing() {
        let cell = StateCell::new();
        assert!(cell.transition(ExecutorState::Idle));
        assert!(cell.transition(ExecutorState::Executing));
        assert!(cell.transition(ExecutorState::Idle));
        assert!(cell.transition(ExecutorState::Terminated));
        assert!(!cell.transition(ExecutorState::Idle));
        assert!(!cell.transition(ExecutorState::Executing));
        assert_eq!(cell.get(), ExecutorState::Terminated);

        cell.reset();
        assert_eq!(cell.get(), ExecutorState::Starting);
    }

    #[test]
    fn starting_cannot_execute() {
        let cell = StateCell::new();
        assert!(!cell.transition(ExecutorState::Executing));
        assert!(cell.transition(ExecutorState::Terminated));
        assert!(!cell.get().is_ready());
    }
}
