//! The isolated execution context that owns the database handle.
//!
//! One OS thread per worker incarnation runs the executor loop; the async side talks
//! to it only through encoded frames.

mod channel;
mod dispatcher;
mod manager;
mod state;

pub(crate) use channel::{Inbound, WorkerLink};
pub(crate) use dispatcher::ExecutorConfig;
pub(crate) use manager::{spawn_worker, supervise};
pub use manager::{WorkerEvent, WorkerExit};
pub use state::ExecutorState;
pub(crate) use state::StateCell;
