use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::BridgeError;

/// Open the worker-owned handle and enable write-ahead logging.
///
/// In-memory databases report `memory` as their journal mode; that is accepted as-is.
///
/// # Errors
/// Returns `BridgeError::ConnectionError` if the file cannot be opened or the journal mode
/// cannot be switched to WAL.
pub fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, BridgeError> {
    let conn = Connection::open(path).map_err(|err| {
        BridgeError::ConnectionError(format!(
            "failed to open SQLite database at {}: {err}",
            path.display()
        ))
    })?;

    conn.busy_timeout(busy_timeout).map_err(|err| {
        BridgeError::ConnectionError(format!("failed to set busy timeout: {err}"))
    })?;

    let mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(|err| {
            BridgeError::ConnectionError(format!(
                "failed to enable WAL journaling on {}: {err}",
                path.display()
            ))
        })?;
    debug!(path = %path.display(), journal_mode = %mode, "journal mode applied");

    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        return Err(BridgeError::ConnectionError(format!(
            "SQLite refused WAL journaling for {} (journal_mode = {mode})",
            path.display()
        )));
    }

    info!(path = %path.display(), "database connected");
    Ok(conn)
}
