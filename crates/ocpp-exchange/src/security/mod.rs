//! Signature policy and middleware.

pub mod middleware;
pub mod policy;

pub use middleware::{SignatureMiddleware, SigningError, VerificationError};
pub use policy::{
    ActionFilter, Direction, RuleMode, SignaturePolicy, SignatureRule, Verification,
    DEFAULT_MAX_FUTURE_SKEW, DEFAULT_MAX_SIGNATURE_AGE,
};
