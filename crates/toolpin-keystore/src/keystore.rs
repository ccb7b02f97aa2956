//! # Key Store - Main Facade
//!
//! This module provides the trust-on-first-use key manager. It pairs the
//! durable pin store with the well-known discovery client and exposes the
//! operations the verification engine and operators need.
//!
//! ## Threat Model
//!
//! | Threat | Defense |
//! |--------|---------|
//! | Rug pull via key rotation | A pinned key is the sole trust anchor until revoked |
//! | Racing first trust | `pin_first_use` is compare-and-swap; exactly one key wins |
//! | Silent trust-anchor swap | `pin` reports `PinOutcome::Replaced` for audit |
//! | Discovery outage | `discover` degrades to `None`, never an error |
//!
//! ## Usage Flow
//!
//! 1. **Lookup**: `get_pinned_key(tool_id)` for an active trust anchor
//! 2. **Discovery**: `discover(domain, timeout)` when nothing is pinned
//! 3. **First use**: `pin_first_use(...)` once the discovered key verified
//! 4. **Bookkeeping**: `record_verification(tool_id)` after every success
//! 5. **Revocation**: `revoke(tool_id)` sends the tool back through discovery

use crate::discovery::{DiscoveryClient, DiscoveryConfig};
use crate::error::Result;
use crate::models::{
    key_fingerprint, FirstUseOutcome, KeyInfo, KeyMetadata, PinOutcome, PinnedKeyRecord, ToolId,
};
use crate::storage::PinStorage;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The trust-on-first-use key manager.
///
/// # Thread Safety
///
/// `KeyStore` is cheap to clone and safe to share across tasks. All
/// mutations are single atomic operations on the underlying Sled tree and
/// no lock is held while discovery is in flight.
///
/// # Example
///
/// ```rust
/// use toolpin_keystore::{DiscoveryConfig, KeyStore};
///
/// let store = KeyStore::temporary(DiscoveryConfig::default()).unwrap();
///
/// store.pin("example.com/read_file", "example.com", "PEM", None).unwrap();
/// assert!(store.is_pinned("example.com/read_file").unwrap());
///
/// store.revoke("example.com/read_file").unwrap();
/// assert!(!store.is_pinned("example.com/read_file").unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct KeyStore {
    /// Durable pin records.
    storage: PinStorage,

    /// Well-known document client.
    discovery: DiscoveryClient,
}

impl KeyStore {
    /// Opens or creates a key store backed by the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, discovery: DiscoveryConfig) -> Result<Self> {
        Ok(KeyStore {
            storage: PinStorage::open(path)?,
            discovery: DiscoveryClient::new(discovery),
        })
    }

    /// Creates an in-memory key store for tests.
    pub fn temporary(discovery: DiscoveryConfig) -> Result<Self> {
        Ok(KeyStore {
            storage: PinStorage::temporary()?,
            discovery: DiscoveryClient::new(discovery),
        })
    }

    /// Pins `public_key_pem` for `tool_id`, overwriting any existing record.
    ///
    /// Pinning the key that is already active only updates its domain and
    /// metadata; `pinned_at` and `verification_count` are kept.
    ///
    /// # Returns
    ///
    /// A [`PinOutcome`] describing what was overwritten. Callers must audit
    /// `PinOutcome::Replaced` as a trust-anchor change, not a routine pin.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record cannot be written.
    pub fn pin(
        &self,
        tool_id: &str,
        domain: &str,
        public_key_pem: &str,
        metadata: Option<KeyMetadata>,
    ) -> Result<PinOutcome> {
        let metadata = metadata.unwrap_or_default();
        let fingerprint = key_fingerprint(public_key_pem);

        // Re-pinning the active key keeps its history.
        let refreshed = self.storage.modify(tool_id, |existing| {
            if !existing.is_active() || existing.fingerprint() != fingerprint {
                return false;
            }
            existing.domain = domain.to_string();
            existing.metadata = metadata.clone();
            true
        })?;
        if let Some((record, true)) = refreshed {
            info!(
                tool_id,
                domain,
                verification_count = record.verification_count,
                "refreshed pinned key"
            );
            return Ok(PinOutcome::Refreshed);
        }

        let record =
            PinnedKeyRecord::new(ToolId::from_raw(tool_id), domain, public_key_pem, metadata);

        let outcome = classify(self.storage.upsert(&record)?, public_key_pem);

        match &outcome {
            PinOutcome::Replaced { previous_key } => warn!(
                tool_id,
                domain,
                previous = %key_fingerprint(previous_key),
                current = %record.fingerprint(),
                "replaced active pinned key"
            ),
            other => info!(tool_id, domain, outcome = ?other, "pinned key"),
        }

        Ok(outcome)
    }

    /// Pins `public_key_pem` only if `tool_id` has no active pin.
    ///
    /// This is the first-use write path. When two callers race, the store
    /// accepts exactly one key; the loser receives the winning record and
    /// must verify against it.
    pub fn pin_first_use(
        &self,
        tool_id: &str,
        domain: &str,
        public_key_pem: &str,
        metadata: Option<KeyMetadata>,
    ) -> Result<FirstUseOutcome> {
        let record = PinnedKeyRecord::new(
            ToolId::from_raw(tool_id),
            domain,
            public_key_pem,
            metadata.unwrap_or_default(),
        );

        match self.storage.insert_if_vacant(&record)? {
            Ok(previous) => {
                let outcome = if previous.is_some() {
                    PinOutcome::Reinstated
                } else {
                    PinOutcome::Created
                };
                info!(tool_id, domain, outcome = ?outcome, "pinned key on first use");
                Ok(FirstUseOutcome::Pinned(outcome))
            }
            Err(winner) => {
                debug!(tool_id, "first-use pin lost to an existing pin");
                Ok(FirstUseOutcome::AlreadyPinned(winner))
            }
        }
    }

    /// Returns the active pinned key for `tool_id`.
    pub fn get_pinned_key(&self, tool_id: &str) -> Result<Option<String>> {
        Ok(self.get_active(tool_id)?.map(|r| r.public_key_pem))
    }

    /// Returns the active record for `tool_id`, ignoring revoked pins.
    pub fn get_active(&self, tool_id: &str) -> Result<Option<PinnedKeyRecord>> {
        Ok(self.storage.get(tool_id)?.filter(PinnedKeyRecord::is_active))
    }

    /// Returns true if `tool_id` has an active pin.
    pub fn is_pinned(&self, tool_id: &str) -> Result<bool> {
        Ok(self.get_active(tool_id)?.is_some())
    }

    /// Revokes the pin for `tool_id`.
    ///
    /// # Returns
    ///
    /// `true` if an active pin was revoked, `false` if there was nothing
    /// active to revoke.
    pub fn revoke(&self, tool_id: &str) -> Result<bool> {
        let revoked = self
            .storage
            .modify(tool_id, |record| {
                if record.revoked {
                    return false;
                }
                record.revoked = true;
                record.revoked_at = Some(Utc::now());
                true
            })?
            .map_or(false, |(_, changed)| changed);

        if revoked {
            warn!(tool_id, "revoked pinned key");
        }
        Ok(revoked)
    }

    /// Lists every record, including revoked ones, in tool id order.
    pub fn list(&self) -> Result<Vec<PinnedKeyRecord>> {
        self.storage.list()
    }

    /// Lists only active pins.
    pub fn list_active(&self) -> Result<Vec<PinnedKeyRecord>> {
        Ok(self
            .storage
            .list()?
            .into_iter()
            .filter(PinnedKeyRecord::is_active)
            .collect())
    }

    /// Returns the record for `tool_id` with derived statistics.
    pub fn get_info(&self, tool_id: &str) -> Result<Option<KeyInfo>> {
        Ok(self.storage.get(tool_id)?.map(KeyInfo::from))
    }

    /// Records a successful verification against the active pin.
    ///
    /// # Returns
    ///
    /// The new verification count, or `None` if `tool_id` has no active pin.
    pub fn record_verification(&self, tool_id: &str) -> Result<Option<u64>> {
        let updated = self.storage.modify(tool_id, |record| {
            if record.revoked {
                return false;
            }
            record.verification_count += 1;
            record.last_verified = Some(Utc::now());
            true
        })?;

        Ok(match updated {
            Some((record, true)) => Some(record.verification_count),
            _ => None,
        })
    }

    /// Discovers the key `domain` currently advertises.
    ///
    /// Returns `None` on any non-200 status, timeout, connection error or
    /// malformed document.
    pub async fn discover(&self, domain: &str, timeout: Duration) -> Option<String> {
        self.discovery.discover(domain, timeout).await
    }

    /// The underlying discovery client.
    pub fn discovery(&self) -> &DiscoveryClient {
        &self.discovery
    }

    /// Returns the number of stored records, including revoked ones.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Returns true if nothing has ever been pinned.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.storage.flush()?;
        Ok(())
    }
}

fn classify(previous: Option<PinnedKeyRecord>, new_key: &str) -> PinOutcome {
    match previous {
        None => PinOutcome::Created,
        Some(prev) if prev.revoked => PinOutcome::Reinstated,
        Some(prev) if key_fingerprint(&prev.public_key_pem) == key_fingerprint(new_key) => {
            PinOutcome::Refreshed
        }
        Some(prev) => PinOutcome::Replaced {
            previous_key: prev.public_key_pem,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOOL: &str = "example.com/test_tool";
    const PEM: &str = "-----BEGIN PUBLIC KEY-----\ntest_key\n-----END PUBLIC KEY-----";

    fn store() -> KeyStore {
        KeyStore::temporary(DiscoveryConfig::default()).unwrap()
    }

    #[test]
    fn test_pin_and_get_key() {
        let store = store();
        let mut metadata = KeyMetadata::new();
        metadata.insert("developer".to_string(), serde_json::json!("Test Developer"));

        let outcome = store.pin(TOOL, "example.com", PEM, Some(metadata)).unwrap();
        assert_eq!(outcome, PinOutcome::Created);

        assert_eq!(store.get_pinned_key(TOOL).unwrap().as_deref(), Some(PEM));
        assert!(store.is_pinned(TOOL).unwrap());
    }

    #[test]
    fn test_get_nonexistent_key() {
        let store = store();
        assert!(store.get_pinned_key("nonexistent_tool").unwrap().is_none());
        assert!(!store.is_pinned("nonexistent_tool").unwrap());
        assert!(store.get_info("nonexistent_tool").unwrap().is_none());
    }

    #[test]
    fn test_pin_outcomes() {
        let store = store();

        assert_eq!(store.pin(TOOL, "example.com", "key-1", None).unwrap(), PinOutcome::Created);
        assert_eq!(store.pin(TOOL, "example.com", "key-1", None).unwrap(), PinOutcome::Refreshed);
        assert_eq!(
            store.pin(TOOL, "example.com", "key-2", None).unwrap(),
            PinOutcome::Replaced {
                previous_key: "key-1".to_string()
            }
        );

        store.revoke(TOOL).unwrap();
        assert_eq!(store.pin(TOOL, "example.com", "key-3", None).unwrap(), PinOutcome::Reinstated);
        assert_eq!(store.get_pinned_key(TOOL).unwrap().as_deref(), Some("key-3"));
    }

    #[test]
    fn test_repin_same_key_keeps_history() {
        let store = store();
        store.pin(TOOL, "example.com", PEM, None).unwrap();
        store.record_verification(TOOL).unwrap();
        store.record_verification(TOOL).unwrap();
        let before = store.get_active(TOOL).unwrap().unwrap();

        let mut metadata = KeyMetadata::new();
        metadata.insert("source".to_string(), serde_json::json!("operator"));
        let outcome = store.pin(TOOL, "example.com", PEM, Some(metadata)).unwrap();
        assert_eq!(outcome, PinOutcome::Refreshed);

        let after = store.get_active(TOOL).unwrap().unwrap();
        assert_eq!(after.verification_count, 3);
        assert_eq!(after.pinned_at, before.pinned_at);
        assert_eq!(after.last_verified, before.last_verified);
        assert_eq!(after.metadata.get("source"), Some(&serde_json::json!("operator")));
    }

    #[test]
    fn test_update_verification_stats() {
        let store = store();
        store.pin(TOOL, "example.com", PEM, None).unwrap();

        assert_eq!(store.record_verification(TOOL).unwrap(), Some(2));

        let info = store.get_info(TOOL).unwrap().unwrap();
        assert_eq!(info.record.verification_count, 2);
        assert!(info.record.last_verified.is_some());
    }

    #[test]
    fn test_record_verification_ignores_revoked() {
        let store = store();
        store.pin(TOOL, "example.com", PEM, None).unwrap();
        store.revoke(TOOL).unwrap();

        assert_eq!(store.record_verification(TOOL).unwrap(), None);
        assert_eq!(store.record_verification("missing").unwrap(), None);
    }

    #[test]
    fn test_revoke_key() {
        let store = store();
        store.pin(TOOL, "example.com", PEM, None).unwrap();
        assert!(store.is_pinned(TOOL).unwrap());

        assert!(store.revoke(TOOL).unwrap());
        assert!(!store.is_pinned(TOOL).unwrap());
        assert!(store.get_pinned_key(TOOL).unwrap().is_none());

        // Already revoked, nothing left to revoke.
        assert!(!store.revoke(TOOL).unwrap());

        // The record itself is kept.
        let info = store.get_info(TOOL).unwrap().unwrap();
        assert!(info.record.revoked);
        assert!(info.record.revoked_at.is_some());
    }

    #[test]
    fn test_list_pinned_keys() {
        let store = store();
        store.pin("tool1", "domain1.com", "key1", None).unwrap();
        store.pin("tool2", "domain2.com", "key2", None).unwrap();
        store.revoke("tool2").unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        let ids: Vec<&str> = all.iter().map(|r| r.tool_id.as_str()).collect();
        assert!(ids.contains(&"tool1"));
        assert!(ids.contains(&"tool2"));

        let active = store.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].tool_id.as_str(), "tool1");
    }

    #[test]
    fn test_get_key_info() {
        let store = store();
        let mut metadata = KeyMetadata::new();
        metadata.insert("developer".to_string(), serde_json::json!("Test Developer"));
        metadata.insert("version".to_string(), serde_json::json!("1.0"));

        store.pin(TOOL, "example.com", PEM, Some(metadata)).unwrap();

        let info = store.get_info(TOOL).unwrap().unwrap();
        assert_eq!(info.record.tool_id.as_str(), TOOL);
        assert_eq!(info.record.domain, "example.com");
        assert_eq!(info.record.public_key_pem, PEM);
        assert_eq!(info.record.metadata["developer"], "Test Developer");
        assert_eq!(info.record.metadata["version"], "1.0");
        assert_eq!(info.fingerprint, key_fingerprint(PEM));
    }

    #[test]
    fn test_pin_first_use_keeps_existing_anchor() {
        let store = store();

        let first = store.pin_first_use(TOOL, "example.com", "key-1", None).unwrap();
        assert_eq!(first, FirstUseOutcome::Pinned(PinOutcome::Created));

        match store.pin_first_use(TOOL, "example.com", "key-2", None).unwrap() {
            FirstUseOutcome::AlreadyPinned(winner) => assert_eq!(winner.public_key_pem, "key-1"),
            other => panic!("expected AlreadyPinned, got {:?}", other),
        }

        store.revoke(TOOL).unwrap();
        let again = store.pin_first_use(TOOL, "example.com", "key-2", None).unwrap();
        assert_eq!(again, FirstUseOutcome::Pinned(PinOutcome::Reinstated));
    }
}
