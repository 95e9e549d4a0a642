//! # Message Envelope
//!
//! The four frame kinds exchanged between OCPP nodes.
//!
//! ## Routing Properties
//!
//! - **Correlation**: all replies carry the request's `correlation_id`.
//! - **Provenance**: `network_path` records every hop; relays only ever extend it.
//! - **Reply path**: a responder builds its reply path as the request path plus
//!   itself, so walking the reply path backwards retraces the forward route.
//! - **Integrity**: `signatures` cover the frame content but not the routing
//!   metadata, so relays can extend the path without breaking them.

use crate::error_code::ErrorCode;
use crate::ids::{CorrelationId, NodeId};
use crate::outcome::{ExchangeFailure, OutcomeKind};
use crate::path::{NetworkPath, SourceRouting};
use crate::signature::Signature;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

/// OCPP-J message type ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `CALL`
    Request = 2,
    /// `CALLRESULT`
    Response = 3,
    /// `CALLERROR`
    RequestError = 4,
    /// `CALLRESULTERROR`
    ResponseError = 5,
}

impl MessageKind {
    /// The numeric message type id.
    pub fn type_id(self) -> u64 {
        self as u64
    }

    /// Map a numeric message type id.
    pub fn from_type_id(id: u64) -> Option<Self> {
        match id {
            2 => Some(Self::Request),
            3 => Some(Self::Response),
            4 => Some(Self::RequestError),
            5 => Some(Self::ResponseError),
            _ => None,
        }
    }
}

/// A request (`CALL`).
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    /// Originator-generated correlation id.
    pub correlation_id: CorrelationId,
    /// Action name, e.g. `CancelReservation`.
    pub action: String,
    /// Action-specific payload.
    pub payload: Value,
    /// Routing directive; `None` addresses the directly connected peer.
    pub destination: Option<SourceRouting>,
    /// Hops traversed so far.
    pub network_path: NetworkPath,
    /// When the originator sent the request.
    pub sent_at: Option<DateTime<Utc>>,
    /// How long the originator waits for a reply.
    pub timeout: Option<Duration>,
    /// Attached signatures.
    pub signatures: Vec<Signature>,
}

impl RequestFrame {
    /// Create an unsigned request originating at `source`.
    pub fn new(
        correlation_id: CorrelationId,
        action: impl Into<String>,
        payload: Value,
        source: NodeId,
    ) -> Self {
        Self {
            correlation_id,
            action: action.into(),
            payload,
            destination: None,
            network_path: NetworkPath::from_source(source),
            sent_at: None,
            timeout: None,
            signatures: Vec::new(),
        }
    }

    /// Set the routing directive.
    #[must_use]
    pub fn with_destination(mut self, destination: SourceRouting) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Stamp the send time and timeout.
    #[must_use]
    pub fn with_timing(mut self, sent_at: DateTime<Utc>, timeout: Duration) -> Self {
        self.sent_at = Some(sent_at);
        self.timeout = Some(timeout);
        self
    }

    /// Copy of this request with `relay` appended to the path.
    #[must_use]
    pub fn forwarded_by(&self, relay: NodeId) -> Self {
        Self {
            network_path: self.network_path.append(relay),
            ..self.clone()
        }
    }

    /// Path a reply from `responder` carries back.
    pub fn reply_path(&self, responder: &NodeId) -> NetworkPath {
        self.network_path.append(responder.clone())
    }
}

/// A successful reply (`CALLRESULT`).
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
    /// Action-specific payload.
    pub payload: Value,
    /// Forward path of the request plus the responder.
    pub network_path: NetworkPath,
    /// Attached signatures.
    pub signatures: Vec<Signature>,
}

impl ResponseFrame {
    /// Build the reply to `request` produced by `responder`.
    pub fn from_request(request: &RequestFrame, responder: &NodeId, payload: Value) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            payload,
            network_path: request.reply_path(responder),
            signatures: Vec::new(),
        }
    }
}

/// An error frame; used for both `CALLERROR` and `CALLRESULTERROR`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFrame {
    /// Correlation id of the request concerned.
    pub correlation_id: CorrelationId,
    /// Wire error code.
    pub error_code: ErrorCode,
    /// Human-readable description.
    pub error_description: String,
    /// Structured details (always a JSON object on the wire).
    pub error_details: Value,
    /// Path of the frame.
    pub network_path: NetworkPath,
    /// When the error was produced.
    pub responded_at: Option<DateTime<Utc>>,
    /// Routing directive for forward-travelling response errors.
    pub destination: Option<SourceRouting>,
    /// Attached signatures.
    pub signatures: Vec<Signature>,
}

impl ErrorFrame {
    /// Build the request-error reply for `request` from a failure.
    pub fn for_request(
        request: &RequestFrame,
        responder: &NodeId,
        failure: &ExchangeFailure,
    ) -> Self {
        Self::with_path(
            request.correlation_id.clone(),
            request.reply_path(responder),
            failure,
        )
    }

    /// Build an error frame with an explicit path.
    pub fn with_path(
        correlation_id: CorrelationId,
        network_path: NetworkPath,
        failure: &ExchangeFailure,
    ) -> Self {
        Self {
            correlation_id,
            error_code: failure.code.clone(),
            error_description: failure.description.clone(),
            error_details: failure.wire_details(),
            network_path,
            responded_at: Some(Utc::now()),
            destination: None,
            signatures: Vec::new(),
        }
    }

    /// The payload of `request` did not match the action's request shape.
    pub fn could_not_parse(
        request: &RequestFrame,
        responder: &NodeId,
        description: impl Into<String>,
    ) -> Self {
        let failure = ExchangeFailure::new(
            OutcomeKind::CouldNotParse,
            request.correlation_id.clone(),
            request.action.clone(),
            description,
        );
        Self::for_request(request, responder, &failure)
    }

    /// The frame was malformed; only its correlation id could be recovered.
    pub fn formation_violation(
        correlation_id: CorrelationId,
        network_path: NetworkPath,
        code: ErrorCode,
        description: impl Into<String>,
    ) -> Self {
        let failure = ExchangeFailure::new(
            OutcomeKind::FormationViolation,
            correlation_id.clone(),
            "",
            description,
        )
        .with_code(code);
        Self::with_path(correlation_id, network_path, &failure)
    }

    /// Processing `request` panicked or raised an error.
    pub fn exception_occurred(
        request: &RequestFrame,
        responder: &NodeId,
        description: impl Into<String>,
    ) -> Self {
        let failure = ExchangeFailure::new(
            OutcomeKind::ExceptionOccurred,
            request.correlation_id.clone(),
            request.action.clone(),
            description,
        );
        Self::for_request(request, responder, &failure)
    }

    /// Outcome kind recorded by the producer, if any.
    pub fn outcome(&self) -> Option<OutcomeKind> {
        OutcomeKind::from_details(&self.error_details)
    }
}

/// Any frame on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `CALL`
    Request(RequestFrame),
    /// `CALLRESULT`
    Response(ResponseFrame),
    /// `CALLERROR`
    RequestError(ErrorFrame),
    /// `CALLRESULTERROR`
    ResponseError(ErrorFrame),
}

impl Frame {
    /// Message kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request(_) => MessageKind::Request,
            Self::Response(_) => MessageKind::Response,
            Self::RequestError(_) => MessageKind::RequestError,
            Self::ResponseError(_) => MessageKind::ResponseError,
        }
    }

    /// Correlation id.
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Self::Request(f) => &f.correlation_id,
            Self::Response(f) => &f.correlation_id,
            Self::RequestError(f) | Self::ResponseError(f) => &f.correlation_id,
        }
    }

    /// Action name (requests only).
    pub fn action(&self) -> Option<&str> {
        match self {
            Self::Request(f) => Some(&f.action),
            _ => None,
        }
    }

    /// Network path.
    pub fn network_path(&self) -> &NetworkPath {
        match self {
            Self::Request(f) => &f.network_path,
            Self::Response(f) => &f.network_path,
            Self::RequestError(f) | Self::ResponseError(f) => &f.network_path,
        }
    }

    /// Attached signatures.
    pub fn signatures(&self) -> &[Signature] {
        match self {
            Self::Request(f) => &f.signatures,
            Self::Response(f) => &f.signatures,
            Self::RequestError(f) | Self::ResponseError(f) => &f.signatures,
        }
    }

    /// Mutable access to the signature list.
    pub fn signatures_mut(&mut self) -> &mut Vec<Signature> {
        match self {
            Self::Request(f) => &mut f.signatures,
            Self::Response(f) => &mut f.signatures,
            Self::RequestError(f) | Self::ResponseError(f) => &mut f.signatures,
        }
    }

    /// Canonical bytes covered by signatures.
    ///
    /// `[kind, correlationId, action-or-null, body]` where body is the payload,
    /// or `[code, description, details]` for error frames. Routing metadata is
    /// excluded. `serde_json` objects keep keys sorted, which makes the
    /// encoding canonical for equal values.
    pub fn signed_content(&self) -> Vec<u8> {
        let body = match self {
            Self::Request(f) => f.payload.clone(),
            Self::Response(f) => f.payload.clone(),
            Self::RequestError(f) | Self::ResponseError(f) => Value::Array(vec![
                Value::String(f.error_code.as_str().to_string()),
                Value::String(f.error_description.clone()),
                f.error_details.clone(),
            ]),
        };
        let action = self
            .action()
            .map_or(Value::Null, |a| Value::String(a.to_string()));
        Value::Array(vec![
            Value::from(self.kind().type_id()),
            Value::String(self.correlation_id().as_str().to_string()),
            action,
            body,
        ])
        .to_string()
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn sample_request() -> RequestFrame {
        RequestFrame::new(
            CorrelationId::parse("1001").unwrap(),
            "CancelReservation",
            json!({ "reservationId": 7 }),
            node("CSMS"),
        )
        .forwarded_by(node("GW"))
    }

    #[test]
    fn test_response_from_request_extends_path() {
        let request = sample_request();
        let response = ResponseFrame::from_request(&request, &node("CP1"), json!({"status": "Accepted"}));
        assert_eq!(response.correlation_id, request.correlation_id);
        assert_eq!(
            response.network_path.reversed(),
            vec![node("CP1"), node("GW"), node("CSMS")]
        );
        // The request path is untouched.
        assert_eq!(request.network_path.len(), 2);
    }

    #[test]
    fn test_error_helpers_record_outcome() {
        let request = sample_request();
        let frame = ErrorFrame::could_not_parse(&request, &node("CP1"), "missing reservationId");
        assert_eq!(frame.error_code, ErrorCode::FormatViolation);
        assert_eq!(frame.outcome(), Some(OutcomeKind::CouldNotParse));

        let frame = ErrorFrame::exception_occurred(&request, &node("CP1"), "boom");
        assert_eq!(frame.error_code, ErrorCode::InternalError);
        assert_eq!(frame.outcome(), Some(OutcomeKind::ExceptionOccurred));

        let frame = ErrorFrame::formation_violation(
            request.correlation_id.clone(),
            NetworkPath::from_source(node("CP1")),
            ErrorCode::RpcFrameworkError,
            "payload is not an object",
        );
        assert_eq!(frame.outcome(), Some(OutcomeKind::FormationViolation));
    }

    #[test]
    fn test_signed_content_ignores_routing_metadata() {
        let request = sample_request();
        let relayed = request.forwarded_by(node("R2"));
        assert_eq!(
            Frame::Request(request.clone()).signed_content(),
            Frame::Request(relayed).signed_content()
        );

        let mut tampered = request.clone();
        tampered.payload = json!({ "reservationId": 8 });
        assert_ne!(
            Frame::Request(request).signed_content(),
            Frame::Request(tampered).signed_content()
        );
    }

    #[test]
    fn test_message_kind_ids() {
        assert_eq!(MessageKind::from_type_id(2), Some(MessageKind::Request));
        assert_eq!(MessageKind::from_type_id(5), Some(MessageKind::ResponseError));
        assert_eq!(MessageKind::from_type_id(6), None);
        assert_eq!(MessageKind::RequestError.type_id(), 4);
    }
}
