//! Signature middleware.
//!
//! Applies a [`SignaturePolicy`] to frames using the keys in a [`KeyRing`].
//! Signatures cover [`Frame::signed_content`], which leaves the routing
//! metadata out so relays can extend the path of a signed frame.

use super::policy::{Direction, SignaturePolicy, Verification};
use chrono::{DateTime, Utc};
use ocpp_crypto::{CryptoError, KeyRing};
use ocpp_types::{Frame, Signature};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A frame could not be signed; it must not be sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("signing with key {key_id} failed: {source}")]
pub struct SigningError {
    /// Key the policy asked for.
    pub key_id: String,
    /// Underlying failure.
    #[source]
    pub source: CryptoError,
}

/// A frame failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The policy requires a valid signature and none is attached.
    #[error("a valid signature is required but none is attached")]
    MissingSignature,

    /// An attached signature from a known key did not verify.
    #[error("signature by {key_id} is invalid: {source}")]
    Invalid {
        /// Key named by the signature.
        key_id: String,
        /// Underlying failure.
        #[source]
        source: CryptoError,
    },

    /// An attached signature is older than the freshness window.
    #[error("signature by {key_id} expired {age_secs}s ago")]
    Expired {
        /// Key named by the signature.
        key_id: String,
        /// Age of the signature in seconds.
        age_secs: u64,
    },

    /// An attached signature is dated too far in the future.
    #[error("signature by {key_id} is dated {skew_secs}s in the future")]
    FromFuture {
        /// Key named by the signature.
        key_id: String,
        /// How far ahead, in seconds.
        skew_secs: u64,
    },
}

/// Signs outgoing and verifies incoming frames.
#[derive(Debug, Clone)]
pub struct SignatureMiddleware {
    keys: Arc<KeyRing>,
    policy: Arc<SignaturePolicy>,
}

impl SignatureMiddleware {
    /// Create middleware from a key ring and a policy.
    pub fn new(keys: Arc<KeyRing>, policy: Arc<SignaturePolicy>) -> Self {
        Self { keys, policy }
    }

    /// Middleware that neither signs nor verifies.
    pub fn disabled() -> Self {
        Self::new(
            Arc::new(KeyRing::new()),
            Arc::new(SignaturePolicy::disabled()),
        )
    }

    /// The active policy.
    pub fn policy(&self) -> &SignaturePolicy {
        &self.policy
    }

    /// Attach the signatures the policy asks for. Returns how many were added.
    ///
    /// On error the frame is left unchanged.
    pub fn sign_outgoing(
        &self,
        frame: &mut Frame,
        direction: Direction,
        action: &str,
    ) -> Result<usize, SigningError> {
        let keys = self.policy.signing_keys(direction, action);
        if keys.is_empty() {
            return Ok(0);
        }

        let content = frame.signed_content();
        let signed_at = Utc::now();
        let mut added = Vec::with_capacity(keys.len());
        for key_id in keys {
            let (algorithm, value) =
                self.keys
                    .sign(key_id, &content)
                    .map_err(|source| SigningError {
                        key_id: key_id.to_string(),
                        source,
                    })?;
            added.push(Signature {
                key_id: key_id.to_string(),
                algorithm,
                value,
                signed_at,
            });
        }

        let count = added.len();
        frame.signatures_mut().extend(added);
        debug!(
            correlation_id = %frame.correlation_id(),
            action = action,
            direction = %direction,
            signatures = count,
            "Signed frame"
        );
        Ok(count)
    }

    /// Check a frame against the policy. Side-effect free.
    pub fn verify_incoming(
        &self,
        frame: &Frame,
        direction: Direction,
        action: &str,
    ) -> Result<(), VerificationError> {
        self.verify_at(frame, direction, action, Utc::now())
    }

    fn verify_at(
        &self,
        frame: &Frame,
        direction: Direction,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        let verification = self.policy.verification(direction, action);
        if verification == Verification::Disabled {
            return Ok(());
        }

        let content = frame.signed_content();
        let max_age = self.policy.max_signature_age();
        let max_skew = self.policy.max_future_skew();

        let mut valid = 0usize;
        for signature in frame.signatures() {
            if !self.keys.can_verify(&signature.key_id) {
                // Signatures from keys this node does not know are not its business.
                continue;
            }

            let age = now.signed_duration_since(signature.signed_at);
            match age.to_std() {
                Ok(age) if age > max_age => {
                    return Err(VerificationError::Expired {
                        key_id: signature.key_id.clone(),
                        age_secs: age.as_secs(),
                    });
                }
                Ok(_) => {}
                // Negative age: the signature is dated in the future.
                Err(_) => {
                    let skew = (-age).to_std().unwrap_or(std::time::Duration::MAX);
                    if skew > max_skew {
                        return Err(VerificationError::FromFuture {
                            key_id: signature.key_id.clone(),
                            skew_secs: skew.as_secs(),
                        });
                    }
                }
            }

            self.keys
                .verify(
                    &signature.key_id,
                    signature.algorithm,
                    &content,
                    &signature.value,
                )
                .map_err(|source| VerificationError::Invalid {
                    key_id: signature.key_id.clone(),
                    source,
                })?;
            valid += 1;
        }

        if verification == Verification::Require && valid == 0 {
            return Err(VerificationError::MissingSignature);
        }
        Ok(())
    }
}
