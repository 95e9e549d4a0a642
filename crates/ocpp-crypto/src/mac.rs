//! # HMAC-SHA256
//!
//! Message authentication for links where both ends hold a pre-shared secret.
//! Verification runs in constant time through `Mac::verify_slice`.

use crate::CryptoError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 tag in bytes.
pub const HMAC_TAG_LEN: usize = 32;

/// Minimum accepted secret length in bytes.
pub const MIN_SECRET_LEN: usize = 16;

/// Pre-shared secret, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() < MIN_SECRET_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: MIN_SECRET_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    /// Parse a hex-encoded secret.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        Self::new(hex::decode(encoded.trim())?)
    }

    fn mac(&self) -> Result<HmacSha256, CryptoError> {
        HmacSha256::new_from_slice(&self.0).map_err(|_| CryptoError::InvalidKeyLength {
            expected: MIN_SECRET_LEN,
            actual: self.0.len(),
        })
    }

    /// Compute the tag over `message`.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; HMAC_TAG_LEN], CryptoError> {
        let mut mac = self.mac()?;
        mac.update(message);
        let mut tag = [0u8; HMAC_TAG_LEN];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }

    /// Check a tag over `message`.
    pub fn verify(&self, message: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
        if tag.len() != HMAC_TAG_LEN {
            return Err(CryptoError::InvalidSignatureFormat {
                expected: HMAC_TAG_LEN,
                actual: tag.len(),
            });
        }
        let mut mac = self.mac()?;
        mac.update(message);
        mac.verify_slice(tag)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret({} bytes)", self.0.len())
    }
}
