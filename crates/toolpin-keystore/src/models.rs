//! # Core Data Models for the Key Store
//!
//! This module defines the records the Key Store persists and the outcomes
//! it reports back to callers. A pinned record is the trust anchor for one
//! `{domain}/{tool_name}` identity.
//!
//! ## Threat Model
//!
//! The types in this module help defend against:
//!
//! - **Silent Key Replacement**: `PinOutcome` forces callers to distinguish a
//!   first pin from an overwrite, so a replaced trust anchor is never merged
//!   into the audit trail as a routine event.
//! - **Identity Confusion**: `ToolId` always carries both the domain and the
//!   tool name, so two domains serving a tool with the same name never share
//!   a key.
//! - **Raw Key Leakage**: audit consumers get a SHA-256 fingerprint rather
//!   than the full PEM block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Open provenance map attached to a pin (developer, version, setup source...).
///
/// Stored as an opaque JSON object; the Key Store never interprets it.
pub type KeyMetadata = BTreeMap<String, serde_json::Value>;

/// Identity of a pinned tool: `"{domain}/{tool_name}"`.
///
/// # Example
///
/// ```rust
/// use toolpin_keystore::ToolId;
///
/// let id = ToolId::new("api.corp.com", "database_query");
/// assert_eq!(id.as_str(), "api.corp.com/database_query");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(String);

impl ToolId {
    /// Builds the identity for `tool_name` served by `domain`.
    pub fn new(domain: &str, tool_name: &str) -> Self {
        Self(format!("{}/{}", domain, tool_name))
    }

    /// Wraps an already-formatted identifier.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ToolId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A public key pinned as the sole trust anchor for one tool identity.
///
/// # Fields
///
/// - `tool_id`: Primary key, `"{domain}/{tool_name}"`
/// - `domain`: Domain the key was discovered from or pinned for
/// - `public_key_pem`: The pinned key, PEM encoded
/// - `pinned_at`: When the current key was pinned
/// - `last_verified`: When a signature last verified against this key
/// - `verification_count`: Starts at 1 on pin, incremented per successful check
/// - `metadata`: Opaque provenance map
/// - `revoked`: Logical deletion flag
///
/// # Security Notes
///
/// A record with `revoked == true` is never used as a trust anchor. It stays
/// in the store so the history of which key was trusted remains inspectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedKeyRecord {
    /// Primary key, `"{domain}/{tool_name}"`.
    pub tool_id: ToolId,

    /// Domain the key belongs to.
    pub domain: String,

    /// The pinned public key (PEM).
    pub public_key_pem: String,

    /// When this key was pinned.
    pub pinned_at: DateTime<Utc>,

    /// Last successful verification against this key.
    #[serde(default)]
    pub last_verified: Option<DateTime<Utc>>,

    /// Number of successful verifications, including the pin itself.
    pub verification_count: u64,

    /// Opaque provenance metadata.
    #[serde(default)]
    pub metadata: KeyMetadata,

    /// Whether the pin has been revoked.
    #[serde(default)]
    pub revoked: bool,

    /// When the pin was revoked, if it was.
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl PinnedKeyRecord {
    /// Creates a fresh, active record with `verification_count == 1`.
    pub fn new(
        tool_id: ToolId,
        domain: impl Into<String>,
        public_key_pem: impl Into<String>,
        metadata: KeyMetadata,
    ) -> Self {
        Self {
            tool_id,
            domain: domain.into(),
            public_key_pem: public_key_pem.into(),
            pinned_at: Utc::now(),
            last_verified: None,
            verification_count: 1,
            metadata,
            revoked: false,
            revoked_at: None,
        }
    }

    /// Returns true if this record may be used as a trust anchor.
    pub fn is_active(&self) -> bool {
        !self.revoked
    }

    /// SHA-256 fingerprint of the pinned key.
    pub fn fingerprint(&self) -> String {
        key_fingerprint(&self.public_key_pem)
    }
}

/// A pinned record together with derived statistics, as returned by
/// [`KeyStore::get_info`](crate::KeyStore::get_info).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// The stored record.
    #[serde(flatten)]
    pub record: PinnedKeyRecord,

    /// Hex SHA-256 fingerprint of `record.public_key_pem`.
    pub fingerprint: String,
}

impl From<PinnedKeyRecord> for KeyInfo {
    fn from(record: PinnedKeyRecord) -> Self {
        let fingerprint = record.fingerprint();
        Self { record, fingerprint }
    }
}

/// What a pin write did to the store.
///
/// Every variant is a successful write; storage failures are reported as
/// errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    /// No record existed for the tool id.
    Created,

    /// An active pin with a different key was overwritten.
    ///
    /// This is a trust-anchor change and must be audited as such.
    Replaced {
        /// The key that was trusted before the overwrite.
        previous_key: String,
    },

    /// An active pin with the same key was refreshed.
    Refreshed,

    /// A previously revoked pin was replaced with a new active one.
    Reinstated,
}

impl PinOutcome {
    /// Returns true if an active trust anchor was overwritten.
    pub fn replaced_active_key(&self) -> bool {
        matches!(self, Self::Replaced { .. })
    }
}

/// Result of the first-use pin path.
#[derive(Debug, Clone, PartialEq)]
pub enum FirstUseOutcome {
    /// The caller's key is now the trust anchor.
    Pinned(PinOutcome),

    /// Another writer established an active pin first; the caller must
    /// verify against this record instead.
    AlreadyPinned(PinnedKeyRecord),
}

/// The document served at `/.well-known/schemapin.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellKnownDocument {
    /// Domain signing key, PEM encoded.
    pub public_key: String,

    /// Signature algorithm advertised by the domain (e.g. `ES256`).
    #[serde(default)]
    pub algorithm: Option<String>,

    /// When the key was created (ISO 8601).
    #[serde(default)]
    pub created_at: Option<String>,

    /// Keys the domain has withdrawn.
    #[serde(default)]
    pub revoked_keys: Vec<String>,
}

impl WellKnownDocument {
    /// Returns true if the advertised key is listed in `revoked_keys`.
    pub fn advertises_revoked_key(&self) -> bool {
        let fingerprint = key_fingerprint(&self.public_key);
        self.revoked_keys
            .iter()
            .any(|revoked| key_fingerprint(revoked) == fingerprint)
    }
}

/// Computes the hex SHA-256 fingerprint of a PEM key.
///
/// Surrounding whitespace is ignored so the same key read from a file or an
/// HTTP body fingerprints identically. Must agree with the audit log's
/// `fingerprint`.
pub fn key_fingerprint(public_key_pem: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key_pem.trim().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_id_format() {
        let id = ToolId::new("trusted.com", "db_query");
        assert_eq!(id.as_str(), "trusted.com/db_query");
        assert_eq!(id.to_string(), "trusted.com/db_query");
    }

    #[test]
    fn test_new_record_starts_at_one() {
        let record = PinnedKeyRecord::new(
            ToolId::new("example.com", "tool"),
            "example.com",
            "key",
            KeyMetadata::new(),
        );
        assert_eq!(record.verification_count, 1);
        assert!(record.is_active());
        assert!(record.last_verified.is_none());
    }

    #[test]
    fn test_record_serialization() {
        let mut metadata = KeyMetadata::new();
        metadata.insert("developer".to_string(), serde_json::json!("Test Developer"));
        metadata.insert("setup_time".to_string(), serde_json::json!(1700000000.5));

        let record = PinnedKeyRecord::new(
            ToolId::new("example.com", "tool"),
            "example.com",
            "key",
            metadata,
        );

        let json = serde_json::to_string(&record).unwrap();
        let parsed: PinnedKeyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }

    #[test]
    fn test_fingerprint_ignores_surrounding_whitespace() {
        assert_eq!(key_fingerprint("abc"), key_fingerprint("  abc\n"));
        assert_ne!(key_fingerprint("abc"), key_fingerprint("abd"));
        assert_eq!(key_fingerprint("abc").len(), 64);
        assert_eq!(
            key_fingerprint("-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----\n"),
            "aa96bb5174dcd4dfced92e51c8c48094e2ee122cb1e4667295607abb82a93c6b"
        );
    }

    #[test]
    fn test_well_known_minimal_document() {
        let doc: WellKnownDocument =
            serde_json::from_str(r#"{"public_key": "PEM"}"#).unwrap();
        assert_eq!(doc.public_key, "PEM");
        assert!(doc.algorithm.is_none());
        assert!(!doc.advertises_revoked_key());
    }

    #[test]
    fn test_well_known_revoked_key() {
        let doc = WellKnownDocument {
            public_key: "PEM-A".to_string(),
            algorithm: Some("ES256".to_string()),
            created_at: None,
            revoked_keys: vec!["PEM-B".to_string(), "PEM-A\n".to_string()],
        };
        assert!(doc.advertises_revoked_key());
    }
}
