//! Error types for the history subsystem.

use crate::types::{ContentId, EntityId};
use std::fmt;
use thiserror::Error;

/// Main error type for history operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("No storage backend accepted the write ({attempts} attempts, last: {last_error})")]
    StoreUnavailable { attempts: usize, last_error: String },

    #[error("Content {content_id} unavailable ({attempts} attempts, last error: {last_error})")]
    ContentUnavailable {
        content_id: ContentId,
        attempts: usize,
        last_error: String,
    },

    #[error("Event log rejected append of {content_id} for {entity_id}: {reason}")]
    AppendRejected {
        entity_id: EntityId,
        content_id: ContentId,
        reason: String,
    },

    #[error("Invalid page {page} (total pages: {total_pages})")]
    InvalidPage { page: u32, total_pages: u32 },

    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("Request superseded or cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Log is locked by another process")]
    Locked,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        HistoryError::Serialization(e.to_string())
    }
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Failure of a single gateway or backend attempt.
///
/// Never surfaced to callers: the content client folds these into
/// `StoreUnavailable`/`ContentUnavailable` once every endpoint is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Connection or protocol failure.
    Transport(String),
    /// Endpoint answered with a non-success status.
    Status(u16),
    /// The per-attempt budget elapsed.
    Timeout,
    /// The body did not parse as a snapshot.
    Malformed(String),
    /// The backend refused the request.
    Rejected(String),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transport(msg) => write!(f, "transport error: {}", msg),
            AttemptError::Status(code) => write!(f, "status {}", code),
            AttemptError::Timeout => write!(f, "timed out"),
            AttemptError::Malformed(msg) => write!(f, "malformed content: {}", msg),
            AttemptError::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AttemptError::Timeout
        } else if let Some(status) = e.status() {
            AttemptError::Status(status.as_u16())
        } else {
            AttemptError::Transport(e.to_string())
        }
    }
}
