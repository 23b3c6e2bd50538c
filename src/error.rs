use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    CodecError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The executor could not acquire or keep its database handle.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A single statement failed inside the executor.
    #[error("Query error: {0}")]
    QueryError(String),

    /// The request was malformed or named an unknown statement kind.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Request {id} timed out after {after:?}")]
    Timeout { id: u64, after: Duration },

    /// The worker went away while the request was outstanding.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl BridgeError {
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::ProtocolError(_))
    }

    #[must_use]
    pub fn is_query(&self) -> bool {
        matches!(self, Self::QueryError(_))
    }
}
