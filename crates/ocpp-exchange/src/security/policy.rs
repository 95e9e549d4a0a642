//! Signing and verification rules.
//!
//! Rules are kept in registration order. A direction with no matching rule is
//! disabled: nothing is signed and nothing is checked.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Maximum age of a signature before it is rejected.
pub const DEFAULT_MAX_SIGNATURE_AGE: Duration = Duration::from_secs(300);

/// Maximum clock skew tolerated for signatures dated in the future.
pub const DEFAULT_MAX_FUTURE_SKEW: Duration = Duration::from_secs(10);

/// Which way a frame is travelling, relative to this node.
///
/// Request-error and response-error frames use the response directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// A request this node originates.
    OutgoingRequest,
    /// A request addressed to this node.
    IncomingRequest,
    /// A reply this node produces.
    OutgoingResponse,
    /// A reply to a request this node originated.
    IncomingResponse,
}

impl Direction {
    /// Whether frames in this direction are produced here.
    pub fn is_outgoing(self) -> bool {
        matches!(self, Self::OutgoingRequest | Self::OutgoingResponse)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which actions a rule covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionFilter {
    /// Every action.
    Any,
    /// A single action.
    Named(String),
}

impl ActionFilter {
    /// Whether the filter covers `action`.
    pub fn matches(&self, action: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Named(name) => name == action,
        }
    }
}

/// What a rule does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMode {
    /// Attach a signature made with this key (outgoing directions only).
    Sign(String),
    /// Every attached signature from a known key must verify.
    VerifyPresent,
    /// Like `VerifyPresent`, and at least one valid signature must be attached.
    Require,
}

/// One policy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRule {
    /// Direction the rule applies to.
    pub direction: Direction,
    /// Actions the rule applies to.
    pub actions: ActionFilter,
    /// What to do.
    pub mode: RuleMode,
}

impl SignatureRule {
    /// Whether the rule covers `action` travelling in `direction`.
    pub fn applies(&self, direction: Direction, action: &str) -> bool {
        self.direction == direction && self.actions.matches(action)
    }
}

/// Strongest verification demanded for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verification {
    /// No check.
    Disabled,
    /// Check what is attached.
    VerifyPresent,
    /// Check what is attached and demand at least one valid signature.
    Require,
}

/// Ordered rule set plus the signature freshness window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePolicy {
    rules: Vec<SignatureRule>,
    max_signature_age: Duration,
    max_future_skew: Duration,
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            max_signature_age: DEFAULT_MAX_SIGNATURE_AGE,
            max_future_skew: DEFAULT_MAX_FUTURE_SKEW,
        }
    }
}

impl SignaturePolicy {
    /// A policy with no rules: signing and verification disabled everywhere.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Append a rule.
    #[must_use]
    pub fn with_rule(mut self, direction: Direction, actions: ActionFilter, mode: RuleMode) -> Self {
        self.rules.push(SignatureRule {
            direction,
            actions,
            mode,
        });
        self
    }

    /// Set the freshness window.
    #[must_use]
    pub fn with_freshness(mut self, max_signature_age: Duration, max_future_skew: Duration) -> Self {
        self.max_signature_age = max_signature_age;
        self.max_future_skew = max_future_skew;
        self
    }

    /// All rules, in order.
    pub fn rules(&self) -> &[SignatureRule] {
        &self.rules
    }

    /// Oldest acceptable signature.
    pub fn max_signature_age(&self) -> Duration {
        self.max_signature_age
    }

    /// Furthest acceptable signature date in the future.
    pub fn max_future_skew(&self) -> Duration {
        self.max_future_skew
    }

    /// Keys to sign with, in rule order, without duplicates.
    pub fn signing_keys(&self, direction: Direction, action: &str) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for rule in self.rules.iter().filter(|r| r.applies(direction, action)) {
            if let RuleMode::Sign(key_id) = &rule.mode {
                if !keys.contains(&key_id.as_str()) {
                    keys.push(key_id);
                }
            }
        }
        keys
    }

    /// Strongest verification any matching rule demands.
    pub fn verification(&self, direction: Direction, action: &str) -> Verification {
        self.rules
            .iter()
            .filter(|r| r.applies(direction, action))
            .map(|rule| match rule.mode {
                RuleMode::Sign(_) => Verification::Disabled,
                RuleMode::VerifyPresent => Verification::VerifyPresent,
                RuleMode::Require => Verification::Require,
            })
            .max()
            .unwrap_or(Verification::Disabled)
    }
}
