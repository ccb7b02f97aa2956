//! The SchemaGuard facade.
//!
//! This module provides the entry point collaborators use. [`SchemaGuard`]
//! owns one configuration handle, one key store and one audit log, and
//! wires the verification and policy engines to them.

use crate::{
    config::PinConfig,
    policy::{PolicyAction, PolicyDecision, PolicyEngine},
    signature::{default_verifier, SignatureVerifier},
    verification::{VerificationEngine, VerificationRequest, VerificationResult},
    Result,
};

use std::sync::Arc;
use toolpin_audit::{AuditLog, AuditStats, PinAction};
use toolpin_keystore::{FirstUseOutcome, KeyMetadata, KeyStore, PinOutcome};
use tracing::{debug, info, warn};

/// Result of [`SchemaGuard::check`].
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    /// The verification result, absent when verification is disabled.
    pub result: Option<VerificationResult>,

    /// The decision the caller must act on.
    pub decision: PolicyDecision,
}

impl CheckOutcome {
    /// Returns true if the tool may run without further input.
    pub fn permits_execution(&self) -> bool {
        self.decision.action.permits_execution()
    }
}

/// The schema pinning facade.
///
/// # Security Model
///
/// 1. `verify` establishes whether the schema is signed by the tool's
///    trust anchor (pinned key, or a freshly discovered one)
/// 2. `evaluate` maps that onto an action under the effective policy mode
/// 3. Both steps, and every pin or revocation, are written to the audit log
///
/// A `BLOCK` from `evaluate` is final. Storage and audit failures surface as
/// errors and must be treated as a refusal, never as an allow.
///
/// # Example
///
/// ```rust,no_run
/// use toolpin_core::{PinConfig, PolicyAction, SchemaGuard, VerificationRequest};
///
/// # async fn run(schema: serde_json::Value, signature: String) -> toolpin_core::Result<()> {
/// let guard = SchemaGuard::open(PinConfig::load("schemapin.json")?)?;
///
/// let request = VerificationRequest::new("database_query", schema)
///     .with_signature(signature)
///     .with_domain("api.corp.com");
///
/// let outcome = guard.check(&request).await?;
/// match outcome.decision.action {
///     PolicyAction::Prompt => { /* ask, then guard.confirm_pin(...) */ }
///     action if action.permits_execution() => { /* run the tool */ }
///     _ => { /* refuse */ }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SchemaGuard {
    config: Arc<PinConfig>,
    keys: KeyStore,
    audit: AuditLog,
    engine: VerificationEngine,
    policy: PolicyEngine,
}

impl SchemaGuard {
    /// Opens the stores named in `config` and builds every component.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - Either database cannot be opened
    pub fn open(config: PinConfig) -> Result<Self> {
        config.validate()?;
        let keys = KeyStore::open(&config.key_store_path, config.discovery_config())?;
        let audit = AuditLog::open(&config.audit_log_path)?;

        info!(
            keys = %config.key_store_path.display(),
            audit = %config.audit_log_path.display(),
            mode = %config.policy_mode,
            "schema guard opened"
        );

        Ok(Self::with_components(config, keys, audit, default_verifier()))
    }

    /// Builds a guard from already opened stores and an explicit verifier.
    pub fn with_components(
        config: PinConfig,
        keys: KeyStore,
        audit: AuditLog,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        let config = Arc::new(config);
        let engine =
            VerificationEngine::with_verifier(config.clone(), keys.clone(), audit.clone(), verifier);
        let policy = PolicyEngine::new(config.clone());

        Self {
            config,
            keys,
            audit,
            engine,
            policy,
        }
    }

    /// Verifies a schema. See [`VerificationEngine::verify`].
    pub async fn verify(
        &self,
        tool_name: &str,
        schema: &serde_json::Value,
        signature: Option<&str>,
        domain: Option<&str>,
    ) -> Result<VerificationResult> {
        self.engine.verify(tool_name, schema, signature, domain).await
    }

    /// Decides on `result` and records the decision.
    pub fn evaluate(&self, result: &VerificationResult, tool_name: &str) -> Result<PolicyDecision> {
        let decision = self.policy.evaluate(result, tool_name);
        self.audit.log_policy_decision(
            &result.tool_id,
            decision.policy_mode.as_str(),
            &decision.reason,
            decision.action.as_str(),
        )?;
        Ok(decision)
    }

    /// Verifies, decides and records one request.
    pub async fn check(&self, request: &VerificationRequest) -> Result<CheckOutcome> {
        if !self.config.enabled {
            let decision = PolicyDecision::new(
                PolicyAction::Allow,
                "Schema verification disabled",
                self.policy.get_effective_policy(&request.tool_name),
            );
            self.audit.log_policy_decision(
                &request.tool_id(),
                decision.policy_mode.as_str(),
                &decision.reason,
                decision.action.as_str(),
            )?;
            debug!(tool_name = %request.tool_name, "verification disabled, allowing");
            return Ok(CheckOutcome {
                result: None,
                decision,
            });
        }

        let result = self.engine.verify_request(request).await?;
        let decision = self.evaluate(&result, &request.tool_name)?;
        Ok(CheckOutcome {
            result: Some(result),
            decision,
        })
    }

    /// Pins the key carried by a confirmed `PROMPT` result.
    ///
    /// # Returns
    ///
    /// `true` if the key was pinned. `false` if the result is not a valid,
    /// unpinned first-use result, or another key was pinned for the tool in
    /// the meantime.
    pub fn confirm_pin(&self, result: &VerificationResult) -> Result<bool> {
        let (Some(domain), Some(public_key)) = (&result.domain, &result.public_key) else {
            return Ok(false);
        };
        if !result.valid || result.key_pinned {
            return Ok(false);
        }

        let mut metadata = KeyMetadata::new();
        metadata.insert("source".to_string(), serde_json::json!("user_confirmed"));

        match self
            .keys
            .pin_first_use(&result.tool_id, domain, public_key, Some(metadata))?
        {
            FirstUseOutcome::Pinned(_) => {
                self.audit
                    .log_pin_event(&result.tool_id, domain, public_key, PinAction::Pin)?;
                info!(tool_id = %result.tool_id, domain = %domain, "user confirmed pin");
                Ok(true)
            }
            FirstUseOutcome::AlreadyPinned(winner) => {
                warn!(
                    tool_id = %result.tool_id,
                    pinned = %winner.fingerprint(),
                    "confirmation ignored, a different pin already exists"
                );
                Ok(false)
            }
        }
    }

    /// Pins `public_key_pem` for `tool_id`, overwriting any existing pin.
    ///
    /// Overwriting an active pin with a different key is logged as a
    /// `repin`, never as a plain `pin`.
    pub fn pin_key(
        &self,
        tool_id: &str,
        domain: &str,
        public_key_pem: &str,
        metadata: Option<KeyMetadata>,
    ) -> Result<PinOutcome> {
        let outcome = self.keys.pin(tool_id, domain, public_key_pem, metadata)?;
        match &outcome {
            PinOutcome::Replaced { previous_key } => {
                self.audit
                    .log_repin(tool_id, domain, public_key_pem, previous_key)?;
            }
            PinOutcome::Created | PinOutcome::Refreshed | PinOutcome::Reinstated => {
                self.audit
                    .log_pin_event(tool_id, domain, public_key_pem, PinAction::Pin)?;
            }
        }
        Ok(outcome)
    }

    /// Revokes the pin for `tool_id`.
    ///
    /// The domain's cached discovery document is dropped too, so the next
    /// verification fetches a fresh key.
    ///
    /// # Returns
    ///
    /// `true` if an active pin was revoked.
    pub async fn revoke_key(&self, tool_id: &str) -> Result<bool> {
        let Some(record) = self.keys.get_active(tool_id)? else {
            return Ok(false);
        };
        if !self.keys.revoke(tool_id)? {
            return Ok(false);
        }

        self.audit.log_pin_event(
            tool_id,
            &record.domain,
            &record.public_key_pem,
            PinAction::Revoke,
        )?;
        self.keys.discovery().invalidate(&record.domain).await;
        Ok(true)
    }

    /// Aggregate audit statistics.
    pub fn stats(&self) -> Result<AuditStats> {
        Ok(self.audit.stats()?)
    }

    /// The shared configuration.
    pub fn config(&self) -> &PinConfig {
        &self.config
    }

    /// The key store.
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// The audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The verification engine.
    pub fn engine(&self) -> &VerificationEngine {
        &self.engine
    }

    /// The policy engine, for override management.
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Flushes both stores to disk.
    pub fn flush(&self) -> Result<()> {
        self.keys.flush()?;
        self.audit.flush()?;
        Ok(())
    }
}
