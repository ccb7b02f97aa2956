//! # Toolpin Core
//!
//! Trust-on-first-use schema pinning for remotely described tools.
//! Orchestrates the Key Store, signature verification, the Policy Engine
//! and the Audit Log.
//!
//! ## Threat Coverage
//!
//! | Threat | Component | Defense |
//! |--------|-----------|---------|
//! | Rug pull | Verification Engine | Pinned key is the only accepted signer |
//! | Unsigned schema | Verification Engine | Always invalid, whatever the domain |
//! | Key swap by domain | Key Store | Discovery only runs when nothing is pinned |
//! | Silent re-pin | Audit Log | Overwrites logged as `repin` with prior fingerprint |
//! | Policy drift | Policy Engine | Decision is a pure function of result and config |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TOOLPIN CORE                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │                    ┌─────────────────┐                          │
//! │                    │   SchemaGuard   │  ← Unified Facade        │
//! │                    └────────┬────────┘                          │
//! │                             │                                   │
//! │         ┌───────────────────┼───────────────────┐               │
//! │         ▼                   ▼                   ▼               │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐          │
//! │  │Verification │───▶│   Policy    │    │  PinConfig  │          │
//! │  │   Engine    │    │   Engine    │    │ (read-only) │          │
//! │  └──────┬──────┘    └─────────────┘    └─────────────┘          │
//! │         │                                                       │
//! │    ┌────┴─────────────┐                                         │
//! │    ▼                  ▼                                         │
//! │  ┌─────────────┐    ┌─────────────┐                             │
//! │  │  Key Store  │    │  Audit Log  │                             │
//! │  └─────────────┘    └─────────────┘                             │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toolpin_core::{PinConfig, SchemaGuard};
//!
//! let guard = SchemaGuard::open(PinConfig::load("schemapin.json")?)?;
//!
//! let result = guard.verify("database_query", &schema, Some(&sig), Some("api.corp.com")).await?;
//! let decision = guard.evaluate(&result, "database_query")?;
//! match decision.action {
//!     PolicyAction::Block => reject(decision.reason),
//!     PolicyAction::Prompt => ask_user(result),
//!     _ => execute(tool),
//! }
//! ```
//!
//! ## Security Notes
//!
//! - A schema with no signature is never trusted
//! - Once pinned, a tool is never checked against any other key until revoked
//! - Discovery failures degrade to "no key found", never to an allow
//! - Storage and audit failures are errors, not verdicts

pub mod canonicalize;
mod config;
mod error;
mod guard;
mod policy;
pub mod signature;
mod verification;

pub use config::{PinConfig, PolicyMode};
pub use error::{ConfigError, ToolPinError};
pub use guard::{CheckOutcome, SchemaGuard};
pub use policy::{PolicyAction, PolicyDecision, PolicyEngine};
#[cfg(feature = "ecdsa")]
pub use signature::EcdsaP256Verifier;
pub use signature::{default_verifier, LegacyDigestVerifier, SignatureVerifier};
pub use verification::{VerificationEngine, VerificationRequest, VerificationResult};

// Re-export component types for convenience
pub use toolpin_audit::{AuditLog, AuditLogEntry, AuditQuery, AuditStats, PinAction};
pub use toolpin_keystore::{KeyInfo, KeyMetadata, KeyStore, PinOutcome, PinnedKeyRecord};

/// Core result type for toolpin operations.
pub type Result<T> = std::result::Result<T, ToolPinError>;
