//! Audit entry types.
//!
//! Every entry carries the tool id it concerns, the time it was written and
//! one [`AuditEvent`]. Entries are immutable once appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Monotonic insertion id.
    pub id: u64,

    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,

    /// Tool the entry concerns (`"{domain}/{tool_name}"` or a bare name).
    pub tool_id: String,

    /// What happened.
    pub event: AuditEvent,
}

impl AuditLogEntry {
    /// The category of this entry.
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    /// Domain the entry concerns, when the event carries one.
    pub fn domain(&self) -> Option<&str> {
        match &self.event {
            AuditEvent::VerificationAttempt { domain, .. }
            | AuditEvent::VerificationError { domain, .. } => domain.as_deref(),
            AuditEvent::KeyPin { domain, .. } => Some(domain),
            AuditEvent::PolicyDecision { .. } => None,
        }
    }
}

/// The recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A completed verification, valid or not.
    VerificationAttempt {
        /// Domain the schema claimed to come from.
        domain: Option<String>,
        /// Whether the signature verified.
        valid: bool,
        /// Whether the verifying key is pinned.
        key_pinned: bool,
        /// Failure reason for invalid attempts.
        error: Option<String>,
        /// Wall time spent verifying, in milliseconds.
        duration_ms: f64,
    },

    /// Verification could not be carried out.
    VerificationError {
        /// Domain the schema claimed to come from.
        domain: Option<String>,
        /// What went wrong.
        message: String,
    },

    /// A trust-anchor change.
    KeyPin {
        /// Domain the key belongs to.
        domain: String,
        /// SHA-256 fingerprint of the affected key.
        key_fingerprint: String,
        /// What happened to the pin.
        action: PinAction,
        /// Fingerprint of the key that was overwritten, for re-pins.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_key_fingerprint: Option<String>,
    },

    /// An enforcement decision.
    PolicyDecision {
        /// Mode that produced the decision (`enforce`, `warn`, `log`).
        policy_mode: String,
        /// Resulting action (`ALLOW`, `WARN`, `LOG`, `BLOCK`, `PROMPT`).
        action: String,
        /// Human-readable explanation.
        reason: String,
    },
}

impl AuditEvent {
    /// The category of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::VerificationAttempt { .. } => EventKind::Attempt,
            Self::VerificationError { .. } => EventKind::Error,
            Self::KeyPin { .. } => EventKind::KeyPin,
            Self::PolicyDecision { .. } => EventKind::Policy,
        }
    }
}

/// Coarse entry categories used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// [`AuditEvent::VerificationAttempt`]
    Attempt,
    /// [`AuditEvent::VerificationError`]
    Error,
    /// [`AuditEvent::KeyPin`]
    KeyPin,
    /// [`AuditEvent::PolicyDecision`]
    Policy,
}

/// What happened to a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinAction {
    /// First pin for the tool id (or first after a revocation).
    Pin,
    /// An active pin was overwritten.
    Repin,
    /// The pin was revoked.
    Revoke,
}

impl PinAction {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pin => "pin",
            Self::Repin => "repin",
            Self::Revoke => "revoke",
        }
    }
}

impl fmt::Display for PinAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of a verification result the audit log records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttemptOutcome {
    /// Whether the signature verified.
    pub valid: bool,
    /// Whether the verifying key is pinned.
    pub key_pinned: bool,
    /// Failure reason for invalid attempts.
    pub error: Option<String>,
}

/// Aggregate statistics for compliance reporting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuditStats {
    /// Verification attempts plus verification errors.
    pub total: u64,
    /// Attempts that verified.
    pub successful: u64,
    /// Attempts that did not verify, plus errors.
    pub failed: u64,
    /// Distinct tool ids across attempts and errors.
    pub unique_tools: u64,
    /// Distinct domains across attempts and errors.
    pub unique_domains: u64,
    /// Policy decision counts keyed by action.
    pub policy_breakdown: BTreeMap<String, u64>,
    /// Pin event counts keyed by pin action.
    pub pin_events: BTreeMap<String, u64>,
}

/// Filter for [`AuditLog::query`](crate::AuditLog::query).
///
/// Results are returned newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Only entries for this tool id.
    pub tool_id: Option<String>,
    /// Only entries for this domain.
    pub domain: Option<String>,
    /// Only entries of this kind.
    pub kind: Option<EventKind>,
    /// Only entries written at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Creates an unfiltered query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one tool id.
    pub fn with_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    /// Restricts to one domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Restricts to one kind of entry.
    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restricts to entries written at or after `since`.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Caps the number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(tool_id) = &self.tool_id {
            if &entry.tool_id != tool_id {
                return false;
            }
        }
        if let Some(domain) = &self.domain {
            if entry.domain() != Some(domain.as_str()) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if entry.kind() != kind {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Hex SHA-256 fingerprint of a PEM key, as recorded in pin events.
///
/// SHA-256 over the key with surrounding whitespace trimmed. The key store's
/// `key_fingerprint` computes the same value; both are checked against a
/// fixed vector so audit entries can be joined to stored pins.
pub fn fingerprint(public_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key.trim().as_bytes());
    hex::encode(hasher.finalize())
}
