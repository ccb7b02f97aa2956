//! Error types for the Key Store.

use thiserror::Error;

/// Result type for key store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the durable pin store.
///
/// # Security Notes
///
/// These errors always propagate. Losing the pin store is a security
/// failure, so callers must not treat a `StoreError` like "no key pinned".
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open, read or write the database.
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Failed to serialize or deserialize a record.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record could not be interpreted.
    #[error("Corrupt record for {tool_id}: {reason}")]
    CorruptRecord {
        /// Key under which the record was found.
        tool_id: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Reasons a well-known discovery attempt produced no key.
///
/// Never returned from [`KeyStore::discover`](crate::KeyStore::discover);
/// it only exists so the failure can be logged precisely before being
/// downgraded to `None`.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery URL could not be built.
    #[error("invalid discovery url {url}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
    },

    /// The request did not complete within the discovery timeout.
    #[error("discovery timed out")]
    Timeout,

    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-200 status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The body was not a valid well-known document.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// The domain lists its own advertised key as revoked.
    #[error("public key revoked by domain")]
    RevokedKey,
}
