//! # OCPP Crypto - Signing Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `signatures` | Ed25519 | Frames signed for peers without a shared secret |
//! | `mac` | HMAC-SHA256 | Frames on links with a pre-shared secret |
//! | `keyring` | - | Keys by key id, used by the signature middleware |
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency
//! - **HMAC-SHA256**: Constant-time tag comparison
//! - Secret material is zeroized on drop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod keyring;
pub mod mac;
pub mod signatures;

// Re-exports
pub use errors::CryptoError;
pub use keyring::{KeyRing, SigningKey, VerifyingKey};
pub use mac::SharedSecret;
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
