//! # OCPP Types - Envelope Model
//!
//! Shared types for the OCPP message exchange. Every node role (charge point,
//! relay, central system) speaks in these types.
//!
//! ## Components
//!
//! | Module | Contents |
//! |--------|----------|
//! | `ids` | `CorrelationId`, `NodeId` |
//! | `path` | `NetworkPath` provenance, `SourceRouting` directives |
//! | `envelope` | The four frame kinds and their construction helpers |
//! | `codec` | OCPP-J array framing with routing metadata |
//! | `error_code` | Wire error codes |
//! | `outcome` | Canonical outcome taxonomy (`OutcomeKind`, `ExchangeFailure`) |
//! | `signature` | Signature records attached to frames |
//! | `action` | The `Action` schema trait |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod codec;
pub mod envelope;
pub mod error_code;
pub mod ids;
pub mod outcome;
pub mod path;
pub mod signature;

// Re-exports
pub use action::Action;
pub use codec::{decode, decode_value, encode, encode_value, FrameError, FrameErrorReason};
pub use envelope::{ErrorFrame, Frame, MessageKind, RequestFrame, ResponseFrame};
pub use error_code::ErrorCode;
pub use ids::{CorrelationId, IdError, NodeId};
pub use outcome::{ExchangeFailure, OutcomeKind, OUTCOME_DETAILS_KEY};
pub use path::{NetworkPath, SourceRouting};
pub use signature::{Signature, SignatureAlgorithm};
