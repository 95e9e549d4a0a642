//! Canonical outcome taxonomy.
//!
//! Every stage of the dispatch and outgoing pipelines reports failure as an
//! [`ExchangeFailure`]. Only at the outermost boundary is a failure turned into
//! a wire error frame, and the kind travels along in `errorDetails.outcome` so
//! the originator can surface the same kind to its caller.

use crate::error_code::ErrorCode;
use crate::ids::CorrelationId;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Key under which the outcome kind is stored in error details.
pub const OUTCOME_DETAILS_KEY: &str = "outcome";

/// Kinds of non-successful outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// The payload did not match the action's request or response shape.
    CouldNotParse,
    /// The frame itself was malformed.
    FormationViolation,
    /// Signature verification failed (or a required signature was missing).
    SignatureError,
    /// No processor produced a result.
    Failed,
    /// A processor raised an error or panicked.
    ExceptionOccurred,
    /// The remote side explicitly rejected the request.
    RequestError,
    /// The reply was malformed or rejected.
    ResponseError,
    /// No reply within the timeout, or the caller cancelled.
    Timeout,
    /// The connection closed before a reply arrived.
    ConnectionClosed,
    /// No next hop exists for the destination.
    Unreachable,
    /// The frame could not be signed, so it was never sent.
    SigningError,
}

impl OutcomeKind {
    /// Stable name used in logs and error details.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CouldNotParse => "CouldNotParse",
            Self::FormationViolation => "FormationViolation",
            Self::SignatureError => "SignatureError",
            Self::Failed => "Failed",
            Self::ExceptionOccurred => "ExceptionOccurred",
            Self::RequestError => "RequestError",
            Self::ResponseError => "ResponseError",
            Self::Timeout => "Timeout",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::Unreachable => "Unreachable",
            Self::SigningError => "SigningError",
        }
    }

    /// Parse a name produced by [`OutcomeKind::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "CouldNotParse" => Self::CouldNotParse,
            "FormationViolation" => Self::FormationViolation,
            "SignatureError" => Self::SignatureError,
            "Failed" => Self::Failed,
            "ExceptionOccurred" => Self::ExceptionOccurred,
            "RequestError" => Self::RequestError,
            "ResponseError" => Self::ResponseError,
            "Timeout" => Self::Timeout,
            "ConnectionClosed" => Self::ConnectionClosed,
            "Unreachable" => Self::Unreachable,
            "SigningError" => Self::SigningError,
            _ => return None,
        };
        Some(kind)
    }

    /// Wire error code used when this outcome is sent to a peer.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            Self::CouldNotParse => ErrorCode::FormatViolation,
            Self::FormationViolation => ErrorCode::RpcFrameworkError,
            Self::SignatureError | Self::SigningError => ErrorCode::SecurityError,
            Self::ExceptionOccurred => ErrorCode::InternalError,
            Self::Failed
            | Self::RequestError
            | Self::ResponseError
            | Self::Timeout
            | Self::ConnectionClosed
            | Self::Unreachable => ErrorCode::GenericError,
        }
    }

    /// Recover the outcome kind a peer recorded in error details.
    pub fn from_details(details: &Value) -> Option<Self> {
        details
            .get(OUTCOME_DETAILS_KEY)
            .and_then(Value::as_str)
            .and_then(Self::parse)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, non-successful result of an exchange.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} for {action} [{correlation_id}]: {description}")]
pub struct ExchangeFailure {
    /// What went wrong.
    pub kind: OutcomeKind,
    /// Correlation id of the request concerned.
    pub correlation_id: CorrelationId,
    /// Action of the request concerned.
    pub action: String,
    /// Wire error code (remote code for remote failures).
    pub code: ErrorCode,
    /// Human-readable description.
    pub description: String,
    /// Optional structured details.
    pub details: Option<Value>,
    /// Time between sending the request and the outcome, when known.
    pub runtime: Option<Duration>,
}

impl ExchangeFailure {
    /// Create a failure with the kind's default wire code.
    pub fn new(
        kind: OutcomeKind,
        correlation_id: CorrelationId,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            correlation_id,
            action: action.into(),
            code: kind.wire_code(),
            description: description.into(),
            details: None,
            runtime: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the wire error code.
    #[must_use]
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// Record the elapsed runtime.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Error details as sent on the wire: the caller's details with the outcome kind added.
    pub fn wire_details(&self) -> Value {
        let mut map = match &self.details {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                let mut map = Map::new();
                map.insert("details".to_string(), other.clone());
                map
            }
            None => Map::new(),
        };
        map.insert(
            OUTCOME_DETAILS_KEY.to_string(),
            Value::String(self.kind.as_str().to_string()),
        );
        Value::Object(map)
    }
}
