//! Signature records attached to frames.
//!
//! The records are plain data; producing and checking them lives in
//! `ocpp-crypto` and the exchange's signature middleware.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Algorithm used to produce a signature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// Ed25519 public-key signature.
    Ed25519,
    /// HMAC-SHA256 over a pre-shared secret.
    HmacSha256,
}

/// A single signature over a frame's signed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Identifier of the key that produced the signature.
    pub key_id: String,
    /// Algorithm used.
    pub algorithm: SignatureAlgorithm,
    /// Hex-encoded signature value.
    pub value: String,
    /// When the signature was produced.
    pub signed_at: DateTime<Utc>,
}
