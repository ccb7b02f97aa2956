//! Error types for Toolpin Core.

use thiserror::Error;

/// Core error type for toolpin operations.
///
/// Signature mismatches and discovery failures are not errors; they are
/// reported as an invalid [`VerificationResult`](crate::VerificationResult).
/// Everything here means the system could not do its job and must not be
/// read as "allow".
#[derive(Debug, Error)]
pub enum ToolPinError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The pin store failed.
    #[error("Key store error: {0}")]
    Storage(#[from] toolpin_keystore::StoreError),

    /// The audit log failed.
    #[error("Audit log error: {0}")]
    Audit(#[from] toolpin_audit::AuditError),

    /// A policy mode outside `enforce`, `warn`, `log`.
    #[error("Invalid policy mode: {0}")]
    InvalidPolicyMode(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading, saving or validating a [`PinConfig`](crate::PinConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for the config schema.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value the system cannot operate with.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
