//! Correlation of outstanding requests with their eventual responses.
//!
//! [`Correlator`] hands out ids, keeps one result slot per outstanding id, and settles
//! each slot at most once: by a matching response, a timeout, or a connection-lost
//! sweep. It knows nothing about the payload type or the transport.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::BridgeError;

type Slot<T> = oneshot::Sender<Result<T, BridgeError>>;

/// Correlator-side record of one dispatched request.
pub struct PendingRequest<T> {
    slot: Slot<T>,
    submitted_at: Instant,
}

struct Table<T> {
    next_id: u64,
    pending: HashMap<u64, PendingRequest<T>>,
}

/// Id allocator plus pending-request table.
pub struct Correlator<T> {
    table: Mutex<Table<T>>,
}

/// A registered request: its id and the receiving end of its result slot.
pub struct Ticket<T> {
    pub id: u64,
    receiver: oneshot::Receiver<Result<T, BridgeError>>,
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Correlator<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(next_id: u64) -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: next_id.max(1),
                pending: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table<T>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id and register an empty result slot for it.
    ///
    /// Ids count up from 1 and wrap; `0` and ids still outstanding are skipped.
    pub fn register(&self) -> Ticket<T> {
        let (slot, receiver) = oneshot::channel();
        let mut table = self.lock();
        let id = loop {
            let candidate = table.next_id;
            table.next_id = table.next_id.wrapping_add(1).max(1);
            if !table.pending.contains_key(&candidate) {
                break candidate;
            }
        };
        table.pending.insert(
            id,
            PendingRequest {
                slot,
                submitted_at: Instant::now(),
            },
        );
        Ticket { id, receiver }
    }

    /// Settle the slot for `id`. Returns `false` if no such request is outstanding.
    pub fn settle(&self, id: u64, result: Result<T, BridgeError>) -> bool {
        let Some(pending) = self.lock().pending.remove(&id) else {
            return false;
        };
        debug!(
            id,
            elapsed_ms = pending.submitted_at.elapsed().as_millis(),
            "settling request"
        );
        if pending.slot.send(result).is_err() {
            debug!(id, "caller stopped waiting before the response arrived");
        }
        true
    }

    /// Settle `id` with an error.
    pub fn fail(&self, id: u64, err: BridgeError) -> bool {
        self.settle(id, Err(err))
    }

    /// Forget `id` without settling it. Returns `false` if it was already settled.
    pub fn abandon(&self, id: u64) -> bool {
        self.lock().pending.remove(&id).is_some()
    }

    /// Settle every outstanding request with an error built by `make_err`.
    ///
    /// Returns how many requests were rejected.
    pub fn fail_all(&self, make_err: impl Fn() -> BridgeError) -> usize {
        let drained: Vec<PendingRequest<T>> = {
            let mut table = self.lock();
            table.pending.drain().map(|(_, pending)| pending).collect()
        };
        let count = drained.len();
        for pending in drained {
            let _ = pending.slot.send(Err(make_err()));
        }
        count
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the ticket's result, giving up after `timeout` if one is set.
    ///
    /// A timed-out request is removed from the table, so a late response for it is
    /// discarded. Dropping the returned future abandons the request the same way.
    ///
    /// # Errors
    /// Returns the settled error, `BridgeError::Timeout`, or `ConnectionLost` if the
    /// slot was dropped without being settled.
    pub async fn wait(&self, ticket: Ticket<T>, timeout: Option<Duration>) -> Result<T, BridgeError> {
        let Ticket { id, mut receiver } = ticket;
        let _abandon = AbandonOnDrop { correlator: self, id };

        let Some(after) = timeout else {
            return flatten(receiver.await);
        };
        match tokio::time::timeout(after, &mut receiver).await {
            Ok(result) => flatten(result),
            Err(_elapsed) => {
                if self.abandon(id) {
                    debug!(id, ?after, "request timed out");
                    Err(BridgeError::Timeout { id, after })
                } else {
                    // Settled between the deadline and the removal; the value is in the slot.
                    flatten(receiver.await)
                }
            }
        }
    }
}

fn flatten<T>(
    received: Result<Result<T, BridgeError>, oneshot::error::RecvError>,
) -> Result<T, BridgeError> {
    received.unwrap_or_else(|_| {
        Err(BridgeError::ConnectionLost(
            "request slot dropped before it was settled".into(),
        ))
    })
}

struct AbandonOnDrop<'a, T> {
    correlator: &'a Correlator<T>,
    id: u64,
}

impl<T> Drop for AbandonOnDrop<'_, T> {
    fn drop(&mut self) {
        self.correlator.abandon(self.id);
    }
}
