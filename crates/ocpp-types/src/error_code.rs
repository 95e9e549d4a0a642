//! OCPP-J error codes carried by request-error and response-error frames.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// Payload is syntactically incorrect for the action.
    FormatViolation,
    /// OCPP 1.6 spelling of `FormatViolation`.
    FormationViolation,
    /// Any other error not covered by a more specific code.
    GenericError,
    /// An internal error occurred while processing the request.
    InternalError,
    /// The message type id is not supported.
    MessageTypeNotSupported,
    /// The action is not known by the receiver.
    NotImplemented,
    /// The action is recognized but not supported.
    NotSupported,
    /// Occurrence constraints were violated.
    OccurrenceConstraintViolation,
    /// Property constraints were violated.
    PropertyConstraintViolation,
    /// The payload is incomplete.
    ProtocolError,
    /// The frame is not a valid RPC message.
    RpcFrameworkError,
    /// A security issue (e.g. a signature check) prevented processing.
    SecurityError,
    /// A field has the wrong data type.
    TypeConstraintViolation,
    /// Code not defined by the protocol, kept verbatim.
    Other(String),
}

impl ErrorCode {
    /// The code as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::FormatViolation => "FormatViolation",
            Self::FormationViolation => "FormationViolation",
            Self::GenericError => "GenericError",
            Self::InternalError => "InternalError",
            Self::MessageTypeNotSupported => "MessageTypeNotSupported",
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::ProtocolError => "ProtocolError",
            Self::RpcFrameworkError => "RpcFrameworkError",
            Self::SecurityError => "SecurityError",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::Other(code) => code,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "FormatViolation" => Self::FormatViolation,
            "FormationViolation" => Self::FormationViolation,
            "GenericError" => Self::GenericError,
            "InternalError" => Self::InternalError,
            "MessageTypeNotSupported" => Self::MessageTypeNotSupported,
            "NotImplemented" => Self::NotImplemented,
            "NotSupported" => Self::NotSupported,
            "OccurrenceConstraintViolation" => Self::OccurrenceConstraintViolation,
            "PropertyConstraintViolation" => Self::PropertyConstraintViolation,
            "ProtocolError" => Self::ProtocolError,
            "RpcFrameworkError" => Self::RpcFrameworkError,
            "SecurityError" => Self::SecurityError,
            "TypeConstraintViolation" => Self::TypeConstraintViolation,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        Self::from(code.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
