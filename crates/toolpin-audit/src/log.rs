//! # Append-Only Audit Log
//!
//! Sled-backed log of every verification attempt, pin event and policy
//! decision. Entries are keyed by a monotonically increasing id, so tree
//! order is insertion order.
//!
//! ## Invariants
//!
//! - Each write is one compare-and-swap against an absent key. An entry can
//!   never be overwritten, even by a buggy id generator.
//! - Nothing is updated in place. [`AuditLog::purge_before`] is the only
//!   deletion path and is always an explicit operator action.

use crate::error::{AuditError, Result};
use crate::models::{
    fingerprint, AttemptOutcome, AuditEvent, AuditLogEntry, AuditQuery, AuditStats, EventKind,
    PinAction,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Tree name for audit entries.
const ENTRY_TREE: &str = "audit_entries";

/// The audit log.
///
/// Cheap to clone; clones share the same database.
///
/// # Example
///
/// ```rust
/// use toolpin_audit::{AttemptOutcome, AuditLog, PinAction};
///
/// let log = AuditLog::temporary().unwrap();
///
/// log.log_pin_event("api.corp.com/query", "api.corp.com", "PEM", PinAction::Pin).unwrap();
/// log.log_attempt(
///     "api.corp.com/query",
///     Some("api.corp.com"),
///     &AttemptOutcome { valid: true, key_pinned: true, error: None },
///     12.5,
/// ).unwrap();
///
/// let stats = log.stats().unwrap();
/// assert_eq!(stats.total, 1);
/// assert_eq!(stats.successful, 1);
/// ```
#[derive(Clone)]
pub struct AuditLog {
    db: sled::Db,
    entries: sled::Tree,
}

impl AuditLog {
    /// Opens or creates an audit log at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let entries = db.open_tree(ENTRY_TREE)?;
        Ok(Self { db, entries })
    }

    /// Creates an in-memory audit log that is discarded on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let entries = db.open_tree(ENTRY_TREE)?;
        Ok(Self { db, entries })
    }

    /// Records a completed verification.
    pub fn log_attempt(
        &self,
        tool_id: &str,
        domain: Option<&str>,
        outcome: &AttemptOutcome,
        duration_ms: f64,
    ) -> Result<AuditLogEntry> {
        self.append(
            tool_id,
            AuditEvent::VerificationAttempt {
                domain: domain.map(str::to_string),
                valid: outcome.valid,
                key_pinned: outcome.key_pinned,
                error: outcome.error.clone(),
                duration_ms,
            },
        )
    }

    /// Records a verification that could not be carried out.
    pub fn log_error(
        &self,
        tool_id: &str,
        domain: Option<&str>,
        message: &str,
    ) -> Result<AuditLogEntry> {
        self.append(
            tool_id,
            AuditEvent::VerificationError {
                domain: domain.map(str::to_string),
                message: message.to_string(),
            },
        )
    }

    /// Records a pin or revocation.
    ///
    /// Only the key's fingerprint is stored.
    pub fn log_pin_event(
        &self,
        tool_id: &str,
        domain: &str,
        public_key: &str,
        action: PinAction,
    ) -> Result<AuditLogEntry> {
        self.append(
            tool_id,
            AuditEvent::KeyPin {
                domain: domain.to_string(),
                key_fingerprint: fingerprint(public_key),
                action,
                previous_key_fingerprint: None,
            },
        )
    }

    /// Records that an active pin was overwritten.
    ///
    /// Logged as [`PinAction::Repin`] with the fingerprint of the key that
    /// was replaced, so it can never be mistaken for a first-time pin.
    pub fn log_repin(
        &self,
        tool_id: &str,
        domain: &str,
        public_key: &str,
        previous_key: &str,
    ) -> Result<AuditLogEntry> {
        self.append(
            tool_id,
            AuditEvent::KeyPin {
                domain: domain.to_string(),
                key_fingerprint: fingerprint(public_key),
                action: PinAction::Repin,
                previous_key_fingerprint: Some(fingerprint(previous_key)),
            },
        )
    }

    /// Records a policy decision.
    pub fn log_policy_decision(
        &self,
        tool_id: &str,
        policy_mode: &str,
        reason: &str,
        action: &str,
    ) -> Result<AuditLogEntry> {
        self.append(
            tool_id,
            AuditEvent::PolicyDecision {
                policy_mode: policy_mode.to_string(),
                action: action.to_string(),
                reason: reason.to_string(),
            },
        )
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Result<Vec<AuditLogEntry>> {
        self.entries
            .iter()
            .map(|item| {
                let (key, value) = item?;
                decode(&key, &value)
            })
            .collect()
    }

    /// Entries matching `query`, newest first.
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>> {
        let limit = query.limit.unwrap_or(usize::MAX);
        let mut found = Vec::new();

        for item in self.entries.iter().rev() {
            if found.len() >= limit {
                break;
            }
            let (key, value) = item?;
            let entry = decode(&key, &value)?;
            if query.matches(&entry) {
                found.push(entry);
            }
        }

        Ok(found)
    }

    /// Aggregate statistics over the whole log.
    pub fn stats(&self) -> Result<AuditStats> {
        let mut stats = AuditStats::default();
        let mut tools = HashSet::new();
        let mut domains = HashSet::new();

        for entry in self.entries()? {
            match &entry.event {
                AuditEvent::VerificationAttempt { domain, valid, .. } => {
                    stats.total += 1;
                    if *valid {
                        stats.successful += 1;
                    } else {
                        stats.failed += 1;
                    }
                    tools.insert(entry.tool_id.clone());
                    if let Some(domain) = domain {
                        domains.insert(domain.clone());
                    }
                }
                AuditEvent::VerificationError { domain, .. } => {
                    stats.total += 1;
                    stats.failed += 1;
                    tools.insert(entry.tool_id.clone());
                    if let Some(domain) = domain {
                        domains.insert(domain.clone());
                    }
                }
                AuditEvent::KeyPin { action, .. } => {
                    *stats.pin_events.entry(action.to_string()).or_default() += 1;
                }
                AuditEvent::PolicyDecision { action, .. } => {
                    *stats.policy_breakdown.entry(action.clone()).or_default() += 1;
                }
            }
        }

        stats.unique_tools = tools.len() as u64;
        stats.unique_domains = domains.len() as u64;
        Ok(stats)
    }

    /// Number of entries of `kind`.
    pub fn count(&self, kind: EventKind) -> Result<usize> {
        Ok(self
            .entries()?
            .iter()
            .filter(|entry| entry.kind() == kind)
            .count())
    }

    /// Deletes every entry written before `cutoff`.
    ///
    /// This is the retention purge and the only way entries leave the log.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut expired = Vec::new();

        for item in self.entries.iter() {
            let (key, value) = item?;
            let entry = decode(&key, &value)?;
            // Ids are monotonic, so the first entry at or after the cutoff
            // ends the scan.
            if entry.timestamp >= cutoff {
                break;
            }
            expired.push(key);
        }

        let mut batch = sled::Batch::default();
        for key in &expired {
            batch.remove(key.clone());
        }
        self.entries.apply_batch(batch)?;

        info!(removed = expired.len(), %cutoff, "purged audit entries");
        Ok(expired.len())
    }

    /// Number of entries in the log.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }

    fn append(&self, tool_id: &str, event: AuditEvent) -> Result<AuditLogEntry> {
        let id = self.db.generate_id()?;
        let entry = AuditLogEntry {
            id,
            timestamp: Utc::now(),
            tool_id: tool_id.to_string(),
            event,
        };
        let bytes = serde_json::to_vec(&entry)?;

        self.entries
            .compare_and_swap(id.to_be_bytes(), None as Option<&[u8]>, Some(bytes))?
            .map_err(|_| AuditError::DuplicateEntry(id))?;

        debug!(id, tool_id, kind = ?entry.kind(), "audit entry appended");
        Ok(entry)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("entries", &self.len())
            .finish()
    }
}

fn decode(key: &[u8], value: &[u8]) -> Result<AuditLogEntry> {
    let id = key
        .try_into()
        .map(u64::from_be_bytes)
        .unwrap_or_default();
    serde_json::from_slice(value).map_err(|e| AuditError::CorruptEntry {
        id,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn success() -> AttemptOutcome {
        AttemptOutcome {
            valid: true,
            key_pinned: true,
            error: None,
        }
    }

    fn failure(reason: &str) -> AttemptOutcome {
        AttemptOutcome {
            valid: false,
            key_pinned: false,
            error: Some(reason.to_string()),
        }
    }

    #[test]
    fn test_log_verification_attempt() {
        let log = AuditLog::temporary().unwrap();
        log.log_attempt("example.com/test_tool", Some("example.com"), &success(), 150.5)
            .unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool_id, "example.com/test_tool");
        match &entries[0].event {
            AuditEvent::VerificationAttempt {
                domain,
                valid,
                key_pinned,
                duration_ms,
                ..
            } => {
                assert_eq!(domain.as_deref(), Some("example.com"));
                assert!(*valid);
                assert!(*key_pinned);
                assert_eq!(*duration_ms, 150.5);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_log_verification_error() {
        let log = AuditLog::temporary().unwrap();
        log.log_error("test_tool", Some("example.com"), "Signature verification failed")
            .unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind(), EventKind::Error);
        match &entries[0].event {
            AuditEvent::VerificationError { message, .. } => {
                assert!(message.contains("Signature verification failed"))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_log_key_pinning_event() {
        let log = AuditLog::temporary().unwrap();
        log.log_pin_event("test_tool", "example.com", "test_public_key", PinAction::Pin)
            .unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0].event {
            AuditEvent::KeyPin {
                action,
                key_fingerprint,
                ..
            } => {
                assert_eq!(*action, PinAction::Pin);
                assert_eq!(key_fingerprint, &fingerprint("test_public_key"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_log_repin_is_distinct() {
        let log = AuditLog::temporary().unwrap();
        log.log_pin_event("t", "d.com", "key-1", PinAction::Pin).unwrap();
        log.log_repin("t", "d.com", "key-2", "key-1").unwrap();

        let stats = log.stats().unwrap();
        assert_eq!(stats.pin_events.get("pin"), Some(&1));
        assert_eq!(stats.pin_events.get("repin"), Some(&1));

        let entries = log.entries().unwrap();
        match &entries[1].event {
            AuditEvent::KeyPin {
                previous_key_fingerprint,
                ..
            } => assert_eq!(previous_key_fingerprint.as_deref(), Some(fingerprint("key-1").as_str())),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_log_policy_decision() {
        let log = AuditLog::temporary().unwrap();
        log.log_policy_decision("test_tool", "warn", "Schema verification failed", "WARN")
            .unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0].event {
            AuditEvent::PolicyDecision {
                policy_mode,
                action,
                reason,
            } => {
                assert_eq!(policy_mode, "warn");
                assert_eq!(action, "WARN");
                assert_eq!(reason, "Schema verification failed");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_get_verification_stats() {
        let log = AuditLog::temporary().unwrap();
        log.log_attempt("tool1", Some("domain1.com"), &success(), 100.0).unwrap();
        log.log_attempt("tool2", Some("domain2.com"), &failure("Failed"), 200.0)
            .unwrap();
        log.log_policy_decision("tool2", "enforce", "Failed", "BLOCK").unwrap();

        let stats = log.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.unique_tools, 2);
        assert_eq!(stats.unique_domains, 2);
        assert_eq!(stats.policy_breakdown.get("BLOCK"), Some(&1));
    }

    #[test]
    fn test_entries_in_insertion_order() {
        let log = AuditLog::temporary().unwrap();
        for i in 0..20 {
            log.log_error(&format!("tool_{}", i), None, "boom").unwrap();
        }

        let entries = log.entries().unwrap();
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(entries[0].tool_id, "tool_0");
        assert_eq!(entries[19].tool_id, "tool_19");
    }

    #[test]
    fn test_query_newest_first_with_limit() {
        let log = AuditLog::temporary().unwrap();
        log.log_attempt("a", Some("a.com"), &success(), 1.0).unwrap();
        log.log_attempt("b", Some("b.com"), &success(), 1.0).unwrap();
        log.log_attempt("a", Some("a.com"), &failure("x"), 1.0).unwrap();

        let found = log.query(&AuditQuery::new().with_tool("a")).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].id > found[1].id);

        let limited = log.query(&AuditQuery::new().with_limit(1)).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].tool_id, "a");
    }

    #[test]
    fn test_purge_before() {
        let log = AuditLog::temporary().unwrap();
        log.log_error("old", None, "x").unwrap();
        log.log_error("old", None, "y").unwrap();

        let cutoff = Utc::now() + Duration::milliseconds(1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        log.log_error("new", None, "z").unwrap();

        assert_eq!(log.purge_before(cutoff).unwrap(), 2);
        let remaining = log.entries().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tool_id, "new");

        assert_eq!(log.purge_before(Utc::now() - Duration::days(1)).unwrap(), 0);
    }

    #[test]
    fn test_count_by_kind() {
        let log = AuditLog::temporary().unwrap();
        log.log_pin_event("t", "d.com", "k", PinAction::Pin).unwrap();
        log.log_pin_event("t", "d.com", "k", PinAction::Revoke).unwrap();
        log.log_error("t", None, "e").unwrap();

        assert_eq!(log.count(EventKind::KeyPin).unwrap(), 2);
        assert_eq!(log.count(EventKind::Error).unwrap(), 1);
        assert_eq!(log.count(EventKind::Policy).unwrap(), 0);
    }
}
