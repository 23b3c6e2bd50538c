//! Single-writer SQLite bridge.
//!
//! Many async callers share one database connection that lives on a dedicated worker
//! thread. Requests are encoded as frames, queued to the worker in arrival order, and
//! matched back to their callers by correlation id.
//!
//! ```rust,no_run
//! use sqlite_bridge::prelude::*;
//!
//! # async fn demo() -> Result<(), BridgeError> {
//! let bridge = BridgeClient::builder("launcher.db").build().await?;
//! bridge.exec("CREATE TABLE IF NOT EXISTS games (id INTEGER PRIMARY KEY, title TEXT)").await?;
//! let inserted = bridge
//!     .run("INSERT INTO games(title) VALUES (?)", vec!["Foo".into()])
//!     .await?;
//! let row = bridge.get("SELECT COUNT(*) AS c FROM games", vec![]).await?;
//! # let _ = (inserted, row);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod prelude;
pub mod sqlite;
pub mod types;
pub mod wire;
pub mod worker;

pub use client::BridgeClient;
pub use config::{BridgeOptions, BridgeOptionsBuilder, RestartPolicy};
pub use correlator::{Correlator, PendingRequest, Ticket};
pub use error::BridgeError;
pub use types::{Payload, Row, RunResult, SqlValue};
pub use wire::{Command, Request, Response, StatementKind, Step};
pub use worker::{ExecutorState, WorkerEvent, WorkerExit};
