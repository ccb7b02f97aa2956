//! # Audit Log
//!
//! Append-only record of every verification attempt, verification error,
//! pin event and policy decision, with aggregate statistics for compliance
//! reporting.
//!
//! ## Threat Model
//!
//! A pinning system is only as trustworthy as its history:
//! - **Silent re-pins** (every trust-anchor change is a `KeyPin` entry, and
//!   overwrites are logged as `repin` with the previous fingerprint)
//! - **Log tampering** (entries are written with compare-and-swap against an
//!   absent key and are never updated)
//! - **Key leakage** (only SHA-256 fingerprints of keys are stored)
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`AuditLog`] | Durable sled-backed append-only store |
//! | [`AuditEvent`] | The four recorded event shapes |
//! | [`AuditQuery`] | Newest-first filtered reads |
//! | [`AuditStats`] | Aggregates over attempts, errors and decisions |
//!
//! ## Quick Start
//!
//! ```rust
//! use toolpin_audit::{AttemptOutcome, AuditLog};
//!
//! let log = AuditLog::temporary()?;
//!
//! let outcome = AttemptOutcome {
//!     valid: false,
//!     key_pinned: true,
//!     error: Some("Signature verification failed".to_string()),
//! };
//! log.log_attempt("api.corp.com/query", Some("api.corp.com"), &outcome, 3.2)?;
//! log.log_policy_decision("api.corp.com/query", "enforce", "Signature verification failed", "BLOCK")?;
//!
//! let stats = log.stats()?;
//! assert_eq!(stats.failed, 1);
//! assert_eq!(stats.policy_breakdown["BLOCK"], 1);
//! # Ok::<(), toolpin_audit::AuditError>(())
//! ```
//!
//! ## Security Notes
//!
//! - Write failures propagate; callers decide whether a lost entry aborts
//!   the surrounding operation
//! - Retention purges are explicit operator actions via
//!   [`AuditLog::purge_before`]

mod error;
mod log;
mod models;

pub use error::{AuditError, Result};
pub use log::AuditLog;
pub use models::{
    fingerprint, AttemptOutcome, AuditEvent, AuditLogEntry, AuditQuery, AuditStats, EventKind,
    PinAction,
};
