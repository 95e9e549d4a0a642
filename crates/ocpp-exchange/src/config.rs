//! Exchange configuration with validation.

use crate::security::{ActionFilter, Direction, RuleMode, SignaturePolicy};
use ocpp_crypto::{CryptoError, Ed25519KeyPair, Ed25519PublicKey, KeyRing, SharedSecret};
use ocpp_types::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Which processor result becomes the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultSelection {
    /// The first-registered processor's result, chosen after all complete.
    #[default]
    FirstRegistered,
    /// The first present result in registration order, after all complete.
    FirstPresent,
}

/// Main exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Identity of this node
    pub node_id: String,
    /// Timeout for outgoing requests without an explicit one
    #[serde(with = "duration_serde")]
    pub default_timeout: Duration,
    /// How often the expiry sweeper runs
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,
    /// Processor result selection policy
    pub result_selection: ResultSelection,
    /// Keys and signature rules
    pub security: SecurityConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            result_selection: ResultSelection::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl ExchangeConfig {
    /// Configuration for `node_id` with defaults elsewhere.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.node()?;

        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default timeout cannot be 0".into(),
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "sweep interval cannot be 0".into(),
            ));
        }

        self.security.validate()
    }

    /// This node's id.
    pub fn node(&self) -> Result<NodeId, ConfigError> {
        NodeId::new(self.node_id.clone()).map_err(|_| ConfigError::MissingNodeId)
    }
}

/// Kind of key material in a [`KeyConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    /// Hex-encoded 32 byte Ed25519 seed (this node signs with it).
    Ed25519Seed,
    /// Hex-encoded Ed25519 public key of a peer.
    Ed25519Public,
    /// Hex-encoded HMAC-SHA256 shared secret.
    HmacSecret,
}

/// One key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Key id carried in signatures.
    pub id: String,
    /// Kind of material.
    pub kind: KeyKind,
    /// Hex-encoded material.
    pub hex: String,
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let material = match self.kind {
            KeyKind::Ed25519Public => self.hex.as_str(),
            KeyKind::Ed25519Seed | KeyKind::HmacSecret => "[REDACTED]",
        };
        f.debug_struct("KeyConfig")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("hex", &material)
            .finish()
    }
}

/// Mode of a [`RuleConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleModeConfig {
    /// Sign with `key_id`.
    Sign,
    /// Verify attached signatures from known keys.
    VerifyPresent,
    /// Demand at least one valid signature.
    Require,
}

/// One signature rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Direction the rule applies to.
    pub direction: Direction,
    /// Action the rule applies to; every action when absent.
    #[serde(default)]
    pub action: Option<String>,
    /// What the rule does.
    pub mode: RuleModeConfig,
    /// Signing key (required for `Sign`).
    #[serde(default)]
    pub key_id: Option<String>,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Oldest acceptable signature
    #[serde(with = "duration_serde")]
    pub max_signature_age: Duration,
    /// Furthest acceptable signature date in the future
    #[serde(with = "duration_serde")]
    pub max_future_skew: Duration,
    /// Key material
    pub keys: Vec<KeyConfig>,
    /// Rules, in order
    pub rules: Vec<RuleConfig>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_signature_age: crate::security::DEFAULT_MAX_SIGNATURE_AGE,
            max_future_skew: crate::security::DEFAULT_MAX_FUTURE_SKEW,
            keys: Vec::new(),
            rules: Vec::new(),
        }
    }
}

impl SecurityConfig {
    /// Validate rules against the declared keys.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for rule in &self.rules {
            match (rule.mode, &rule.key_id) {
                (RuleModeConfig::Sign, None) => {
                    return Err(ConfigError::InvalidRule(format!(
                        "{} sign rule has no key_id",
                        rule.direction
                    )));
                }
                (RuleModeConfig::Sign, Some(key_id)) => {
                    if !rule.direction.is_outgoing() {
                        return Err(ConfigError::InvalidRule(format!(
                            "sign rule for {} applies to an incoming direction",
                            key_id
                        )));
                    }
                    let signs = self
                        .keys
                        .iter()
                        .any(|k| &k.id == key_id && k.kind != KeyKind::Ed25519Public);
                    if !signs {
                        return Err(ConfigError::UnknownKey(key_id.clone()));
                    }
                }
                (_, _) => {
                    if rule.direction.is_outgoing() {
                        return Err(ConfigError::InvalidRule(format!(
                            "verification rule applies to outgoing direction {}",
                            rule.direction
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Load the key ring and build the policy.
    pub fn build(&self) -> Result<(KeyRing, SignaturePolicy), ConfigError> {
        self.validate()?;

        let mut ring = KeyRing::new();
        for key in &self.keys {
            let invalid = |source: CryptoError| ConfigError::InvalidKey {
                key_id: key.id.clone(),
                source,
            };
            match key.kind {
                KeyKind::Ed25519Seed => {
                    ring.add_ed25519(&key.id, Ed25519KeyPair::from_hex_seed(&key.hex).map_err(invalid)?)
                }
                KeyKind::Ed25519Public => ring.add_ed25519_public(
                    &key.id,
                    Ed25519PublicKey::from_hex(&key.hex).map_err(invalid)?,
                ),
                KeyKind::HmacSecret => {
                    ring.add_hmac(&key.id, SharedSecret::from_hex(&key.hex).map_err(invalid)?)
                }
            }
        }

        let mut policy = SignaturePolicy::disabled()
            .with_freshness(self.max_signature_age, self.max_future_skew);
        for rule in &self.rules {
            let actions = rule
                .action
                .clone()
                .map_or(ActionFilter::Any, ActionFilter::Named);
            let mode = match rule.mode {
                RuleModeConfig::Sign => RuleMode::Sign(rule.key_id.clone().unwrap_or_default()),
                RuleModeConfig::VerifyPresent => RuleMode::VerifyPresent,
                RuleModeConfig::Require => RuleMode::Require,
            };
            policy = policy.with_rule(rule.direction, actions, mode);
        }
        Ok((ring, policy))
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The node id is empty
    #[error("node id must be set")]
    MissingNodeId,
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// A signature rule is inconsistent
    #[error("invalid signature rule: {0}")]
    InvalidRule(String),
    /// A rule references a key that cannot sign
    #[error("no signing key configured with id {0}")]
    UnknownKey(String),
    /// Key material did not load
    #[error("key {key_id} is invalid: {source}")]
    InvalidKey {
        /// Key id
        key_id: String,
        /// Underlying failure
        #[source]
        source: CryptoError,
    },
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Duration (de)serialization as `"30s"`, `"500ms"` or `"2m"`.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize, preferring whole seconds.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize from a suffixed string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `"30s"`, `"500ms"`, `"2m"` or plain seconds.
    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
