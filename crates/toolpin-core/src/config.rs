//! Configuration types for Toolpin.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use toolpin_keystore::DiscoveryConfig;

/// How failed verifications are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Failed verification blocks execution.
    Enforce,
    /// Failed verification is allowed with a visible warning.
    #[default]
    Warn,
    /// Failed verification is allowed and only recorded.
    Log,
}

impl PolicyMode {
    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enforce => "enforce",
            Self::Warn => "warn",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enforce" => Ok(Self::Enforce),
            "warn" => Ok(Self::Warn),
            "log" => Ok(Self::Log),
            other => Err(other.to_string()),
        }
    }
}

/// Configuration for schema pinning.
///
/// Mirrored field for field in the JSON config file. Absent fields take
/// their defaults, so older files keep loading as fields are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    /// Master switch. When off, every check is allowed and audited as such.
    pub enabled: bool,

    /// Default enforcement mode for failed verifications.
    pub policy_mode: PolicyMode,

    /// Pin every verified first-use key without asking.
    pub auto_pin_keys: bool,

    /// Path to the pin database.
    #[serde(alias = "key_pin_storage_path")]
    pub key_store_path: PathBuf,

    /// Path to the audit database.
    pub audit_log_path: PathBuf,

    /// Discovery request timeout, in seconds.
    pub discovery_timeout: u64,

    /// How long discovered documents are cached, in seconds.
    pub cache_ttl: u64,

    /// Explicit discovery URLs per domain.
    pub well_known_endpoints: BTreeMap<String, String>,

    /// Domains whose first-use keys are pinned automatically.
    pub trusted_domains: BTreeSet<String>,

    /// Reject discovered keys the domain lists as revoked.
    pub revocation_check: bool,

    /// Ask the operator before pinning keys from untrusted domains.
    pub interactive_mode: bool,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy_mode: PolicyMode::Warn,
            auto_pin_keys: false,
            key_store_path: PathBuf::from("schemapin_keys.db"),
            audit_log_path: PathBuf::from("schemapin_audit.db"),
            discovery_timeout: 30,
            cache_ttl: 3600,
            well_known_endpoints: BTreeMap::new(),
            trusted_domains: BTreeSet::new(),
            revocation_check: true,
            interactive_mode: true,
        }
    }
}

impl PinConfig {
    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Any read, parse or validation failure. A wrong policy is worse than
    /// no policy, so callers should treat this as fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty-printed JSON, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The config as a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value, ConfigError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Builds a config from a JSON value, defaulting absent fields.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Rejects values the system cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery_timeout == 0 {
            return Err(ConfigError::Invalid(
                "discovery_timeout must be at least 1 second".to_string(),
            ));
        }
        if self.key_store_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("key_store_path is empty".to_string()));
        }
        if self.audit_log_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("audit_log_path is empty".to_string()));
        }
        if self.key_store_path == self.audit_log_path {
            return Err(ConfigError::Invalid(
                "key_store_path and audit_log_path must differ".to_string(),
            ));
        }
        if let Some(blank) = self.trusted_domains.iter().find(|d| d.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "blank trusted domain {:?}",
                blank
            )));
        }
        Ok(())
    }

    /// Returns true if `domain` is in `trusted_domains`.
    pub fn is_trusted(&self, domain: &str) -> bool {
        self.trusted_domains.contains(domain)
    }

    /// Returns true if a verified first-use key from `domain` is pinned
    /// without asking: the domain is trusted or `auto_pin_keys` is set.
    pub fn auto_pins(&self, domain: &str) -> bool {
        self.auto_pin_keys || self.is_trusted(domain)
    }

    /// Discovery timeout as a `Duration`.
    pub fn discovery_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout)
    }

    /// Settings for the key store's discovery client.
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            well_known_endpoints: self.well_known_endpoints.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl),
            revocation_check: self.revocation_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = PinConfig::default();
        assert!(config.enabled);
        assert_eq!(config.policy_mode, PolicyMode::Warn);
        assert!(!config.auto_pin_keys);
        assert_eq!(config.key_store_path, PathBuf::from("schemapin_keys.db"));
        assert_eq!(config.discovery_timeout, 30);
        assert_eq!(config.cache_ttl, 3600);
        assert!(config.well_known_endpoints.is_empty());
        assert!(config.trusted_domains.is_empty());
        assert!(config.revocation_check);
        assert!(config.interactive_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = PinConfig {
            policy_mode: PolicyMode::Enforce,
            auto_pin_keys: true,
            discovery_timeout: 60,
            interactive_mode: false,
            ..PinConfig::default()
        };
        config
            .trusted_domains
            .insert("trusted.example.com".to_string());
        config.well_known_endpoints.insert(
            "api.example.com".to_string(),
            "https://api.example.com/custom/schemapin.json".to_string(),
        );

        config.save(&path).unwrap();
        let loaded = PinConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_value_defaults_absent_fields() {
        let config = PinConfig::from_value(serde_json::json!({
            "policy_mode": "log",
            "trusted_domains": ["a.com"]
        }))
        .unwrap();

        assert_eq!(config.policy_mode, PolicyMode::Log);
        assert!(config.is_trusted("a.com"));
        assert_eq!(config.discovery_timeout, 30);
        assert!(config.interactive_mode);
    }

    #[test]
    fn test_legacy_storage_path_alias() {
        let config = PinConfig::from_value(serde_json::json!({
            "key_pin_storage_path": "/var/lib/pins.db"
        }))
        .unwrap();
        assert_eq!(config.key_store_path, PathBuf::from("/var/lib/pins.db"));
    }

    #[test]
    fn test_to_value_mirrors_fields() {
        let value = PinConfig::default().to_value().unwrap();
        assert_eq!(value["policy_mode"], "warn");
        assert_eq!(value["discovery_timeout"], 30);
        assert_eq!(value["trusted_domains"], serde_json::json!([]));
    }

    #[test]
    fn test_unknown_policy_mode_rejected() {
        let result = PinConfig::from_value(serde_json::json!({ "policy_mode": "paranoid" }));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(PinConfig::load(&path), Err(ConfigError::Parse(_))));
        assert!(matches!(
            PinConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_timeout = PinConfig {
            discovery_timeout: 0,
            ..PinConfig::default()
        };
        assert!(matches!(zero_timeout.validate(), Err(ConfigError::Invalid(_))));

        let same_paths = PinConfig {
            audit_log_path: PathBuf::from("schemapin_keys.db"),
            ..PinConfig::default()
        };
        assert!(same_paths.validate().is_err());

        let mut blank_domain = PinConfig::default();
        blank_domain.trusted_domains.insert("  ".to_string());
        assert!(blank_domain.validate().is_err());
    }

    #[test]
    fn test_policy_mode_parsing() {
        assert_eq!("enforce".parse::<PolicyMode>(), Ok(PolicyMode::Enforce));
        assert_eq!("warn".parse::<PolicyMode>(), Ok(PolicyMode::Warn));
        assert_eq!("log".parse::<PolicyMode>(), Ok(PolicyMode::Log));
        assert!("block".parse::<PolicyMode>().is_err());
        assert_eq!(PolicyMode::Enforce.to_string(), "enforce");
    }
}
