//! Convenient imports for common bridge usage.
//!
//! Bring the core client, options, and value types into scope with:
//! ```rust
//! use sqlite_bridge::prelude::*;
//! ```

pub use crate::client::BridgeClient;
pub use crate::config::{BridgeOptions, BridgeOptionsBuilder, RestartPolicy};
pub use crate::error::BridgeError;
pub use crate::types::{Payload, Row, RunResult, SqlValue};
pub use crate::wire::{StatementKind, Step};
pub use crate::worker::{ExecutorState, WorkerEvent, WorkerExit};
