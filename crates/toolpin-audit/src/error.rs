//! Error types for the audit log.
//!
//! Audit failures always propagate. A verification whose audit record could
//! not be written is a compliance failure, not a detail to swallow.

use thiserror::Error;

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors that can occur while writing or reading the audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open, read or write the database.
    #[error("audit database error: {0}")]
    Database(#[from] sled::Error),

    /// Failed to serialize or deserialize an entry.
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored entry could not be interpreted.
    #[error("corrupt audit entry {id}: {reason}")]
    CorruptEntry {
        /// Entry id.
        id: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// An entry already exists under a freshly generated id.
    ///
    /// Entries are immutable, so this write is refused rather than
    /// overwriting history.
    #[error("audit entry {0} already exists")]
    DuplicateEntry(u64),
}
