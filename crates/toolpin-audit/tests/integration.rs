//! # Integration Tests
//!
//! End-to-end tests for the durable audit log: persistence across reopen,
//! ordering and the statistics used for compliance reports.

use tempfile::TempDir;
use toolpin_audit::{
    fingerprint, AttemptOutcome, AuditEvent, AuditLog, AuditQuery, EventKind, PinAction,
};

fn outcome(valid: bool) -> AttemptOutcome {
    AttemptOutcome {
        valid,
        key_pinned: valid,
        error: (!valid).then(|| "Signature verification failed".to_string()),
    }
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audit.db");

    {
        let log = AuditLog::open(&path).unwrap();
        log.log_pin_event("a.com/t", "a.com", "KEY", PinAction::Pin).unwrap();
        log.log_attempt("a.com/t", Some("a.com"), &outcome(true), 2.0).unwrap();
        log.flush().unwrap();
    }

    let log = AuditLog::open(&path).unwrap();
    let entries = log.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].kind(), EventKind::KeyPin);
    assert_eq!(entries[1].kind(), EventKind::Attempt);
}

#[test]
fn test_ids_keep_increasing_after_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audit.db");

    let first_id = {
        let log = AuditLog::open(&path).unwrap();
        let entry = log.log_error("t", None, "boom").unwrap();
        log.flush().unwrap();
        entry.id
    };

    let log = AuditLog::open(&path).unwrap();
    let entry = log.log_error("t", None, "boom again").unwrap();
    assert!(entry.id > first_id);

    let entries = log.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.last().unwrap().id, entry.id);
}

// ============================================================================
// Statistics
// ============================================================================

#[test]
fn test_stats_over_mixed_traffic() {
    let log = AuditLog::temporary().unwrap();

    for i in 0..5 {
        log.log_attempt(&format!("good.com/tool_{}", i), Some("good.com"), &outcome(true), 1.0)
            .unwrap();
    }
    for _ in 0..3 {
        log.log_attempt("bad.com/tool", Some("bad.com"), &outcome(false), 1.0)
            .unwrap();
    }
    log.log_error("local_tool", None, "No signature provided").unwrap();

    log.log_policy_decision("bad.com/tool", "enforce", "failed", "BLOCK").unwrap();
    log.log_policy_decision("bad.com/tool", "enforce", "failed", "BLOCK").unwrap();
    log.log_policy_decision("good.com/tool_0", "enforce", "ok", "ALLOW").unwrap();

    let stats = log.stats().unwrap();
    assert_eq!(stats.total, 9);
    assert_eq!(stats.successful, 5);
    assert_eq!(stats.failed, 4);
    assert_eq!(stats.unique_tools, 7);
    assert_eq!(stats.unique_domains, 2);
    assert_eq!(stats.policy_breakdown.get("BLOCK"), Some(&2));
    assert_eq!(stats.policy_breakdown.get("ALLOW"), Some(&1));
    assert!(stats.pin_events.is_empty());
}

#[test]
fn test_empty_log_stats() {
    let log = AuditLog::temporary().unwrap();
    let stats = log.stats().unwrap();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.unique_tools, 0);
    assert!(stats.policy_breakdown.is_empty());
    assert!(log.is_empty());
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_query_pin_history_for_tool() {
    let log = AuditLog::temporary().unwrap();
    log.log_pin_event("x.com/t", "x.com", "K1", PinAction::Pin).unwrap();
    log.log_attempt("x.com/t", Some("x.com"), &outcome(true), 1.0).unwrap();
    log.log_repin("x.com/t", "x.com", "K2", "K1").unwrap();
    log.log_pin_event("x.com/t", "x.com", "K2", PinAction::Revoke).unwrap();
    log.log_pin_event("y.com/t", "y.com", "K9", PinAction::Pin).unwrap();

    let history = log
        .query(
            &AuditQuery::new()
                .with_tool("x.com/t")
                .with_kind(EventKind::KeyPin),
        )
        .unwrap();

    let actions: Vec<PinAction> = history
        .iter()
        .map(|entry| match &entry.event {
            AuditEvent::KeyPin { action, .. } => *action,
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(actions, vec![PinAction::Revoke, PinAction::Repin, PinAction::Pin]);

    match &history[1].event {
        AuditEvent::KeyPin {
            key_fingerprint,
            previous_key_fingerprint,
            ..
        } => {
            assert_eq!(key_fingerprint, &fingerprint("K2"));
            assert_eq!(previous_key_fingerprint.as_deref(), Some(fingerprint("K1").as_str()));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_query_by_domain() {
    let log = AuditLog::temporary().unwrap();
    log.log_attempt("a.com/t", Some("a.com"), &outcome(true), 1.0).unwrap();
    log.log_error("b.com/t", Some("b.com"), "boom").unwrap();
    log.log_pin_event("a.com/t", "a.com", "K", PinAction::Pin).unwrap();

    let found = log.query(&AuditQuery::new().with_domain("a.com")).unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|e| e.domain() == Some("a.com")));
}

#[test]
fn test_raw_key_never_stored() {
    let log = AuditLog::temporary().unwrap();
    let pem = "-----BEGIN PUBLIC KEY-----\nSECRET_LOOKING_MATERIAL\n-----END PUBLIC KEY-----";
    log.log_pin_event("a.com/t", "a.com", pem, PinAction::Pin).unwrap();

    let serialized = serde_json::to_string(&log.entries().unwrap()).unwrap();
    assert!(!serialized.contains("SECRET_LOOKING_MATERIAL"));
}
