//! Policy engine: turns a verification result into an enforcement decision.
//!
//! `evaluate` is a pure function of the result, the configuration and the
//! tool's override. It never touches the key store or the audit log; the
//! caller records the decision.

use crate::config::{PinConfig, PolicyMode};
use crate::error::ToolPinError;
use crate::verification::VerificationResult;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// What the caller should do with the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyAction {
    /// Execute.
    Allow,
    /// Execute, and surface a visible warning to the operator.
    Warn,
    /// Execute, and keep a durable record.
    Log,
    /// Do not execute.
    Block,
    /// Ask the user before pinning and executing.
    Prompt,
}

impl PolicyAction {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Warn => "WARN",
            Self::Log => "LOG",
            Self::Block => "BLOCK",
            Self::Prompt => "PROMPT",
        }
    }

    /// Returns true if the tool may run without further input.
    pub fn permits_execution(&self) -> bool {
        matches!(self, Self::Allow | Self::Warn | Self::Log)
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ALLOW" => Ok(Self::Allow),
            "WARN" => Ok(Self::Warn),
            "LOG" => Ok(Self::Log),
            "BLOCK" => Ok(Self::Block),
            "PROMPT" => Ok(Self::Prompt),
            other => Err(other.to_string()),
        }
    }
}

/// An enforcement decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// What to do.
    pub action: PolicyAction,
    /// Why.
    pub reason: String,
    /// The mode that produced the decision.
    pub policy_mode: PolicyMode,
}

impl PolicyDecision {
    pub(crate) fn new(action: PolicyAction, reason: impl Into<String>, policy_mode: PolicyMode) -> Self {
        Self {
            action,
            reason: reason.into(),
            policy_mode,
        }
    }
}

/// The policy engine.
#[derive(Debug)]
pub struct PolicyEngine {
    config: Arc<PinConfig>,
    overrides: RwLock<HashMap<String, PolicyMode>>,
}

impl PolicyEngine {
    /// Creates an engine with no overrides.
    pub fn new(config: Arc<PinConfig>) -> Self {
        Self {
            config,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Decides what to do with `result` for `tool_name`.
    pub fn evaluate(&self, result: &VerificationResult, tool_name: &str) -> PolicyDecision {
        let mode = self.get_effective_policy(tool_name);

        let decision = if !result.valid {
            let error = result.error.as_deref().unwrap_or("unknown error");
            match mode {
                PolicyMode::Enforce => PolicyDecision::new(
                    PolicyAction::Block,
                    format!("Schema verification failed: {}", error),
                    mode,
                ),
                PolicyMode::Warn => PolicyDecision::new(
                    PolicyAction::Warn,
                    format!("Schema verification failed, executing with warning: {}", error),
                    mode,
                ),
                PolicyMode::Log => PolicyDecision::new(
                    PolicyAction::Log,
                    format!("Schema verification failed, logged only: {}", error),
                    mode,
                ),
            }
        } else if result.key_pinned {
            PolicyDecision::new(
                PolicyAction::Allow,
                "Schema verification successful, trust anchor matched",
                mode,
            )
        } else if self.config.interactive_mode {
            PolicyDecision::new(
                PolicyAction::Prompt,
                "Unpinned key requires user confirmation before pinning",
                mode,
            )
        } else {
            PolicyDecision::new(
                PolicyAction::Allow,
                "Schema verification successful, auto-pinning per policy",
                mode,
            )
        };

        match decision.action {
            PolicyAction::Warn => warn!(
                tool_name,
                tool_id = %result.tool_id,
                reason = %decision.reason,
                "executing unverified tool"
            ),
            action => debug!(tool_name, %action, "policy decision"),
        }

        decision
    }

    /// Returns true if a verified first-use key from `domain` is pinned
    /// without asking.
    pub fn should_auto_pin(&self, domain: &str, tool_name: &str) -> bool {
        let auto = self.config.auto_pins(domain);
        debug!(domain, tool_name, auto, "auto-pin check");
        auto
    }

    /// Sets a per-tool mode.
    ///
    /// # Errors
    ///
    /// `ToolPinError::InvalidPolicyMode` unless `mode` is `enforce`, `warn`
    /// or `log`.
    pub fn set_override(&self, tool_name: &str, mode: &str) -> Result<()> {
        let mode: PolicyMode = mode.parse().map_err(ToolPinError::InvalidPolicyMode)?;
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool_name.to_string(), mode);
        info!(tool_name, %mode, "policy override set");
        Ok(())
    }

    /// The override for `tool_name`, or the configured mode.
    pub fn get_effective_policy(&self, tool_name: &str) -> PolicyMode {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_name)
            .copied()
            .unwrap_or(self.config.policy_mode)
    }

    /// Removes the override for `tool_name`. Returns true if one existed.
    pub fn remove_override(&self, tool_name: &str) -> bool {
        let removed = self
            .overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tool_name)
            .is_some();
        if removed {
            info!(tool_name, "policy override removed");
        }
        removed
    }

    /// All overrides, sorted by tool name.
    pub fn list_overrides(&self) -> BTreeMap<String, PolicyMode> {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(tool, mode)| (tool.clone(), *mode))
            .collect()
    }
}
