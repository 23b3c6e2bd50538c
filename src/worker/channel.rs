use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
#[cfg(any(test, feature = "test-utils"))]
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::wire::Frame;

/// Messages accepted by the executor thread, in arrival order.
pub(crate) enum Inbound {
    Frame(Frame),
    /// Test hook: stall for `after`, then terminate as if the handle failed.
    #[cfg(any(test, feature = "test-utils"))]
    Crash { after: Duration },
}

pub(crate) type InboundSender = Sender<Inbound>;
pub(crate) type InboundReceiver = Receiver<Inbound>;
pub(crate) type OutboundSender = UnboundedSender<Frame>;
pub(crate) type OutboundReceiver = UnboundedReceiver<Frame>;

/// The client's end of the inbound channel for the current worker incarnation.
///
/// `None` while no live worker is attached. Dropping the sender is what closes the
/// worker's queue.
pub(crate) struct WorkerLink {
    sender: Mutex<Option<InboundSender>>,
}

impl WorkerLink {
    pub(crate) fn new(sender: InboundSender) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Lock the link. Holding the guard orders a dispatch against attach/detach.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<InboundSender>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attach(&self, sender: InboundSender) {
        *self.lock() = Some(sender);
    }

    /// Drop the sender; returns whether one was attached.
    pub(crate) fn detach(&self) -> bool {
        self.lock().take().is_some()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.lock().is_some()
    }
}
