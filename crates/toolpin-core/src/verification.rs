//! # Verification Engine
//!
//! Decides whether a signed tool schema can be trusted.
//!
//! ## Decision Flow
//!
//! ```text
//!   domain? ──no──▶ invalid "No domain provided"
//!      │
//!   signature? ──no──▶ invalid "No signature provided"
//!      │
//!   active pin? ──yes──▶ verify against pin ──▶ valid / invalid (key_pinned)
//!      │                 (never falls back to any other key)
//!      no
//!      │
//!   discover(domain) ──none──▶ invalid "No public key found"
//!      │             ──revoked──▶ invalid "Public key revoked by domain"
//!      │
//!   verify against discovered key ──fail──▶ invalid
//!      │
//!   auto-pin? ──yes──▶ pin_first_use ──▶ valid, key_pinned
//!      │
//!      no ──▶ valid, unpinned (policy prompts)
//! ```
//!
//! Every call is timed and mirrored into the audit log. Signature
//! mismatches and discovery failures come back as invalid results; only
//! storage and audit failures are errors.

use crate::canonicalize::canonical_schema;
use crate::config::PinConfig;
use crate::error::ToolPinError;
use crate::signature::{default_verifier, SignatureVerifier};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use toolpin_audit::{AttemptOutcome, AuditLog, PinAction};
use toolpin_keystore::{
    DiscoveryError, FirstUseOutcome, KeyMetadata, KeyStore, PinnedKeyRecord, ToolId,
};
use tracing::{debug, info, warn};

/// Outcome of one verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the schema may be trusted.
    pub valid: bool,

    /// `"{domain}/{tool_name}"`, or the bare tool name when no domain was given.
    pub tool_id: String,

    /// Domain the schema claimed to come from.
    pub domain: Option<String>,

    /// Whether the key that decided the result is pinned.
    pub key_pinned: bool,

    /// The presented signature.
    pub signature: Option<String>,

    /// The key the signature was checked against.
    pub public_key: Option<String>,

    /// Why the result is invalid.
    pub error: Option<String>,

    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
}

impl VerificationResult {
    fn new(tool_id: String, domain: Option<&str>, signature: Option<&str>) -> Self {
        Self {
            valid: false,
            tool_id,
            domain: domain.map(str::to_string),
            key_pinned: false,
            signature: signature.map(str::to_string),
            public_key: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    fn rejected(mut self, error: impl Into<String>) -> Self {
        self.valid = false;
        self.error = Some(error.into());
        self
    }

    fn accepted(mut self) -> Self {
        self.valid = true;
        self.error = None;
        self
    }

    fn checked_against(mut self, public_key: &str, pinned: bool) -> Self {
        self.public_key = Some(public_key.to_string());
        self.key_pinned = pinned;
        self
    }

    /// The fields the audit log records for this result.
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        AttemptOutcome {
            valid: self.valid,
            key_pinned: self.key_pinned,
            error: self.error.clone(),
        }
    }
}

/// One schema to verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Tool name as published by the domain.
    pub tool_name: String,

    /// The schema as received.
    pub schema: serde_json::Value,

    /// Base64 signature over the canonical schema.
    #[serde(default)]
    pub signature: Option<String>,

    /// Domain the tool claims to come from.
    #[serde(default)]
    pub domain: Option<String>,
}

impl VerificationRequest {
    /// An unsigned request with no domain.
    pub fn new(tool_name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            schema,
            signature: None,
            domain: None,
        }
    }

    /// Attaches a signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Attaches the claimed domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// The tool id this request resolves to.
    pub fn tool_id(&self) -> String {
        tool_id_for(&self.tool_name, self.domain.as_deref())
    }
}

pub(crate) fn tool_id_for(tool_name: &str, domain: Option<&str>) -> String {
    match domain {
        Some(domain) => ToolId::new(domain, tool_name).to_string(),
        None => tool_name.to_string(),
    }
}

/// The verification engine.
///
/// Cheap to clone; clones share the key store, audit log and verifier.
#[derive(Debug, Clone)]
pub struct VerificationEngine {
    config: Arc<PinConfig>,
    keys: KeyStore,
    audit: AuditLog,
    verifier: Arc<dyn SignatureVerifier>,
}

impl VerificationEngine {
    /// Creates an engine using [`default_verifier`].
    pub fn new(config: Arc<PinConfig>, keys: KeyStore, audit: AuditLog) -> Self {
        Self::with_verifier(config, keys, audit, default_verifier())
    }

    /// Creates an engine with an explicit signature verifier.
    pub fn with_verifier(
        config: Arc<PinConfig>,
        keys: KeyStore,
        audit: AuditLog,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        if !verifier.is_production() {
            warn!(
                verifier = verifier.name(),
                "signature verifier is not fit for production use"
            );
        }
        info!(verifier = verifier.name(), "verification engine ready");

        Self {
            config,
            keys,
            audit,
            verifier,
        }
    }

    /// The verifier chosen at construction.
    pub fn verifier(&self) -> &dyn SignatureVerifier {
        self.verifier.as_ref()
    }

    /// Verifies `schema` for `tool_name` and records the attempt.
    ///
    /// # Errors
    ///
    /// Only key store or audit log failures. An untrusted schema is an
    /// `Ok` result with `valid == false`.
    pub async fn verify(
        &self,
        tool_name: &str,
        schema: &serde_json::Value,
        signature: Option<&str>,
        domain: Option<&str>,
    ) -> Result<VerificationResult> {
        let started = Instant::now();

        let result = match self.evaluate_trust(tool_name, schema, signature, domain).await {
            Ok(result) => result,
            Err(e) => {
                let tool_id = tool_id_for(tool_name, domain);
                if let Err(audit_err) = self.audit.log_error(&tool_id, domain, &e.to_string()) {
                    warn!(
                        tool_id = %tool_id,
                        error = %audit_err,
                        "could not record verification error"
                    );
                }
                return Err(e);
            }
        };

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.audit.log_attempt(
            &result.tool_id,
            result.domain.as_deref(),
            &result.attempt_outcome(),
            duration_ms,
        )?;

        debug!(
            tool_id = %result.tool_id,
            valid = result.valid,
            key_pinned = result.key_pinned,
            duration_ms,
            "verification complete"
        );
        Ok(result)
    }

    /// Verifies one request.
    pub async fn verify_request(&self, request: &VerificationRequest) -> Result<VerificationResult> {
        self.verify(
            &request.tool_name,
            &request.schema,
            request.signature.as_deref(),
            request.domain.as_deref(),
        )
        .await
    }

    /// Verifies independent requests concurrently.
    ///
    /// Results come back in input order. Each request is verified exactly
    /// once; a failure in one does not affect the others.
    pub async fn verify_batch(
        &self,
        requests: Vec<VerificationRequest>,
    ) -> Vec<Result<VerificationResult>> {
        let total = requests.len();
        let mut tasks = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            let engine = self.clone();
            tasks.spawn(async move { (index, engine.verify_request(&request).await) });
        }

        let mut slots: Vec<Option<Result<VerificationResult>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "batch verification task failed"),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(ToolPinError::Internal(
                        "verification task did not complete".to_string(),
                    ))
                })
            })
            .collect()
    }

    async fn evaluate_trust(
        &self,
        tool_name: &str,
        schema: &serde_json::Value,
        signature: Option<&str>,
        domain: Option<&str>,
    ) -> Result<VerificationResult> {
        let tool_id = tool_id_for(tool_name, domain);
        let result = VerificationResult::new(tool_id.clone(), domain, signature);

        let Some(domain) = domain else {
            return Ok(result.rejected("No domain provided"));
        };
        let Some(signature) = signature else {
            return Ok(result.rejected("No signature provided"));
        };

        let payload = canonical_schema(schema);

        if let Some(record) = self.keys.get_active(&tool_id)? {
            return self.check_pinned(result, &payload, signature, &record);
        }

        let timeout = self.config.discovery_timeout_duration();
        let discovered = match self.keys.discovery().fetch_document(domain, timeout).await {
            Ok(document) => document.public_key,
            Err(DiscoveryError::RevokedKey) => {
                warn!(tool_id = %tool_id, domain, "domain lists its advertised key as revoked");
                return Ok(result.rejected("Public key revoked by domain"));
            }
            Err(e) => {
                warn!(domain, error = %e, "key discovery failed");
                return Ok(result.rejected(format!("No public key found for {}", domain)));
            }
        };

        let result = result.checked_against(&discovered, false);
        if !self
            .verifier
            .verify(payload.as_bytes(), signature, &discovered)
        {
            return Ok(result.rejected("Signature verification failed against discovered key"));
        }

        if !self.config.auto_pins(domain) && self.config.interactive_mode {
            debug!(tool_id = %tool_id, domain, "verified unpinned key awaiting confirmation");
            return Ok(result.accepted());
        }

        let metadata = first_use_metadata(self.config.is_trusted(domain));
        match self
            .keys
            .pin_first_use(&tool_id, domain, &discovered, Some(metadata))?
        {
            FirstUseOutcome::Pinned(outcome) => {
                self.audit
                    .log_pin_event(&tool_id, domain, &discovered, PinAction::Pin)?;
                info!(
                    tool_id = %tool_id,
                    domain,
                    outcome = ?outcome,
                    "auto-pinned key on first use"
                );
                Ok(result.checked_against(&discovered, true).accepted())
            }
            FirstUseOutcome::AlreadyPinned(winner) => {
                debug!(tool_id = %tool_id, "lost first-use race, checking against winning pin");
                self.check_pinned(result, &payload, signature, &winner)
            }
        }
    }

    fn check_pinned(
        &self,
        result: VerificationResult,
        payload: &str,
        signature: &str,
        record: &PinnedKeyRecord,
    ) -> Result<VerificationResult> {
        let result = result.checked_against(&record.public_key_pem, true);

        if !self
            .verifier
            .verify(payload.as_bytes(), signature, &record.public_key_pem)
        {
            warn!(
                tool_id = %record.tool_id,
                pinned = %record.fingerprint(),
                "signature does not match pinned key"
            );
            return Ok(result.rejected("Signature verification failed against pinned key"));
        }

        self.keys.record_verification(record.tool_id.as_str())?;
        Ok(result.accepted())
    }
}

fn first_use_metadata(trusted_domain: bool) -> KeyMetadata {
    let mut metadata = KeyMetadata::new();
    metadata.insert("source".to_string(), serde_json::json!("first_use"));
    metadata.insert(
        "trusted_domain".to_string(),
        serde_json::json!(trusted_domain),
    );
    metadata
}
