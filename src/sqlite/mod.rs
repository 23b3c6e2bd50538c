// SQLite module - everything that touches `rusqlite` directly.
//
// Only the executor thread calls into this module; the connection never leaves it.
// - config: open the handle and switch it to WAL journaling
// - params: bind `SqlValue`s as statement parameters
// - query: turn result rows into `Row`s

pub mod config;
pub mod params;
pub mod query;

pub use config::open_connection;
pub use params::values_as_tosql;
pub use query::{build_rows, first_row};
