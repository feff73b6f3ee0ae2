//! Error types for the sync engine.

use storesync_protocol::{ProtocolError, RecordType};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server's compare-and-set rejected our manifest write.
    #[error("remote write conflicted; server is at manifest version {server_version}")]
    RemoteConflict {
        /// The server's current manifest version.
        server_version: u64,
    },

    /// Remote records could not be decrypted.
    ///
    /// The orchestrator catches this and escalates to a key update plus
    /// force push rather than re-raising it to the caller.
    #[error("failed to decrypt remote records")]
    DecryptFailure,

    /// A storage ID in the manifest has no backing local row.
    ///
    /// Fatal: indicates local corruption, not adversarial input.
    #[error("no local model backing a storage ID of type {record_type:?}")]
    MissingLocalModel {
        /// Type tag of the orphaned ID.
        record_type: RecordType,
    },

    /// A group v2 row is missing its master key. Fatal.
    #[error("group v2 row is missing its master key")]
    MissingGv2MasterKey,

    /// A write operation failed its pre-push validation. Fatal: this is a
    /// logic bug.
    #[error("write validation failed: {0}")]
    Validation(String),

    /// Wire-format error from the protocol layer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The local store rejected an operation.
    #[error("local store error: {0}")]
    Store(String),

    /// Another sync is already running for this account.
    #[error("sync already in progress")]
    AlreadyRunning,

    /// Sync was cancelled at a suspension point.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the caller should re-invoke sync after a backoff.
    #[must_use]
    pub fn is_retry_later(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::RemoteConflict { .. } => true,
            SyncError::Cancelled => true,
            _ => false,
        }
    }
}
