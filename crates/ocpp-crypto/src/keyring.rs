//! Key ring indexed by key id.
//!
//! Holds this node's signing keys and the verifying keys of its peers. A key
//! id names exactly one key; registering an id twice replaces the earlier key.
//! The ring is built once at startup and shared read-only afterwards.

use crate::mac::SharedSecret;
use crate::signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use crate::CryptoError;
use ocpp_types::SignatureAlgorithm;
use std::collections::HashMap;

/// Key material able to produce signatures.
#[derive(Debug)]
pub enum SigningKey {
    /// Ed25519 key pair.
    Ed25519(Ed25519KeyPair),
    /// HMAC-SHA256 shared secret.
    Hmac(SharedSecret),
}

impl SigningKey {
    /// Algorithm this key signs with.
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::Ed25519(_) => SignatureAlgorithm::Ed25519,
            Self::Hmac(_) => SignatureAlgorithm::HmacSha256,
        }
    }
}

/// Key material able to check signatures.
#[derive(Debug, Clone)]
pub enum VerifyingKey {
    /// Ed25519 public key.
    Ed25519(Ed25519PublicKey),
    /// HMAC-SHA256 shared secret.
    Hmac(SharedSecret),
}

impl VerifyingKey {
    /// Algorithm this key verifies.
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::Ed25519(_) => SignatureAlgorithm::Ed25519,
            Self::Hmac(_) => SignatureAlgorithm::HmacSha256,
        }
    }
}

/// Signing and verifying keys by key id.
#[derive(Debug, Default)]
pub struct KeyRing {
    signing: HashMap<String, SigningKey>,
    verifying: HashMap<String, VerifyingKey>,
}

impl KeyRing {
    /// Create an empty key ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an Ed25519 key pair; its public half becomes a verifying key too.
    pub fn add_ed25519(&mut self, key_id: impl Into<String>, keypair: Ed25519KeyPair) {
        let key_id = key_id.into();
        self.verifying
            .insert(key_id.clone(), VerifyingKey::Ed25519(keypair.public_key()));
        self.signing.insert(key_id, SigningKey::Ed25519(keypair));
    }

    /// Add a peer's Ed25519 public key.
    pub fn add_ed25519_public(&mut self, key_id: impl Into<String>, public: Ed25519PublicKey) {
        self.verifying
            .insert(key_id.into(), VerifyingKey::Ed25519(public));
    }

    /// Add a shared secret, usable for both signing and verifying.
    pub fn add_hmac(&mut self, key_id: impl Into<String>, secret: SharedSecret) {
        let key_id = key_id.into();
        self.verifying
            .insert(key_id.clone(), VerifyingKey::Hmac(secret.clone()));
        self.signing.insert(key_id, SigningKey::Hmac(secret));
    }

    /// Whether a signing key is registered under `key_id`.
    pub fn can_sign(&self, key_id: &str) -> bool {
        self.signing.contains_key(key_id)
    }

    /// Whether a verifying key is registered under `key_id`.
    pub fn can_verify(&self, key_id: &str) -> bool {
        self.verifying.contains_key(key_id)
    }

    /// Number of distinct key ids known.
    pub fn len(&self) -> usize {
        self.verifying.len()
    }

    /// Whether the ring holds no keys.
    pub fn is_empty(&self) -> bool {
        self.verifying.is_empty() && self.signing.is_empty()
    }

    /// Sign `message` with the key named `key_id`.
    ///
    /// Returns the algorithm used and the hex-encoded signature value.
    pub fn sign(
        &self,
        key_id: &str,
        message: &[u8],
    ) -> Result<(SignatureAlgorithm, String), CryptoError> {
        let key = self
            .signing
            .get(key_id)
            .ok_or_else(|| CryptoError::UnknownKey(key_id.to_string()))?;
        let value = match key {
            SigningKey::Ed25519(pair) => hex::encode(pair.sign(message).as_bytes()),
            SigningKey::Hmac(secret) => hex::encode(secret.sign(message)?),
        };
        Ok((key.algorithm(), value))
    }

    /// Verify a hex-encoded signature value produced by `key_id`.
    pub fn verify(
        &self,
        key_id: &str,
        algorithm: SignatureAlgorithm,
        message: &[u8],
        value: &str,
    ) -> Result<(), CryptoError> {
        let key = self
            .verifying
            .get(key_id)
            .ok_or_else(|| CryptoError::UnknownKey(key_id.to_string()))?;
        if key.algorithm() != algorithm {
            return Err(CryptoError::AlgorithmMismatch {
                key_id: key_id.to_string(),
                algorithm: format!("{algorithm:?}"),
            });
        }
        let raw = hex::decode(value)?;
        match key {
            VerifyingKey::Ed25519(public) => {
                public.verify(message, &Ed25519Signature::from_slice(&raw)?)
            }
            VerifyingKey::Hmac(secret) => secret.verify(message, &raw),
        }
    }
}
