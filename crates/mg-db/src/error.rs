//! Error types for mg-db

use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DbError {
    /// D001: The SQL client binary could not be started
    #[error("[D001] Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// D002: A query exited non-zero
    #[error("[D002] Query failed on {target}: {stderr}")]
    QueryFailed { target: String, stderr: String },

    /// D003: No host answered a digest read
    #[error("[D003] Could not read a digest from any host")]
    DigestBlackout,

    /// D004: A query returned rows the caller cannot interpret
    #[error("[D004] Unexpected row shape from {target}: {message}")]
    BadRows { target: String, message: String },

    /// D005: IO error
    #[error("[D005] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Check whether this failure looks like the server being unreachable or
    /// still starting up, as opposed to a real SQL error. `create_db` retries
    /// only on connectivity failures.
    pub fn is_connectivity(&self) -> bool {
        match self {
            DbError::QueryFailed { stderr, .. } => is_connectivity_message(stderr),
            _ => false,
        }
    }
}

fn is_connectivity_message(msg: &str) -> bool {
    msg.contains("could not connect")
        || msg.contains("Connection refused")
        || msg.contains("could not translate host name")
        || msg.contains("the database system is starting up")
        || msg.contains("the database system is in recovery mode")
        || msg.contains("server closed the connection unexpectedly")
        || msg.contains("timeout expired")
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;
