//! OCPP-J array framing.
//!
//! ```text
//! [2, "<id>", "<Action>", {payload}, {meta}]
//! [3, "<id>", {payload}, {meta}]
//! [4, "<id>", "<errorCode>", "<errorDescription>", {errorDetails}, {meta}]
//! [5, "<id>", "<errorCode>", "<errorDescription>", {errorDetails}, {meta}]
//! ```
//!
//! The trailing `meta` object is optional and omitted when empty, so frames
//! without routing or signatures are plain OCPP-J. Decoding never panics; a
//! failure keeps whatever correlation id and message type could be recovered
//! so the caller can still answer a malformed request.

use crate::envelope::{ErrorFrame, Frame, MessageKind, RequestFrame, ResponseFrame};
use crate::error_code::ErrorCode;
use crate::ids::CorrelationId;
use crate::path::{NetworkPath, SourceRouting};
use crate::signature::Signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameErrorReason {
    /// Input was not JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Input was JSON but not an array.
    #[error("frame is not a JSON array")]
    NotAnArray,

    /// Message type id outside 2..=5.
    #[error("unsupported message type id {0}")]
    UnsupportedMessageType(String),

    /// A positional element was missing or had the wrong type.
    #[error("field `{0}` is missing or has the wrong type")]
    InvalidField(&'static str),

    /// Too few or too many elements for the message type.
    #[error("frame has {found} elements, expected {expected}")]
    WrongArity {
        /// Accepted element counts.
        expected: &'static str,
        /// Element count found.
        found: usize,
    },

    /// The trailing metadata object did not deserialize.
    #[error("invalid frame metadata: {0}")]
    InvalidMeta(String),
}

/// A decoding failure with whatever could be recovered from the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed frame: {reason}")]
pub struct FrameError {
    /// Message type id, when it was a number.
    pub message_type: Option<u64>,
    /// Correlation id, when it was a valid id.
    pub correlation_id: Option<CorrelationId>,
    /// What was wrong.
    pub reason: FrameErrorReason,
}

impl FrameError {
    fn bare(reason: FrameErrorReason) -> Self {
        Self {
            message_type: None,
            correlation_id: None,
            reason,
        }
    }

    /// Whether the malformed frame was a request, which is the only kind a
    /// receiver answers with an error frame.
    pub fn was_request(&self) -> bool {
        self.message_type == Some(MessageKind::Request.type_id())
    }

    /// Wire code to answer this failure with.
    pub fn wire_code(&self) -> ErrorCode {
        match self.reason {
            FrameErrorReason::UnsupportedMessageType(_) => ErrorCode::MessageTypeNotSupported,
            _ => ErrorCode::RpcFrameworkError,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameMeta {
    #[serde(default, skip_serializing_if = "NetworkPath::is_empty")]
    network_path: NetworkPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination: Option<SourceRouting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    responded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    /// Exact timeout, only for values `timeoutMs` cannot carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    signatures: Vec<Signature>,
}

impl FrameMeta {
    fn is_empty(&self) -> bool {
        self.network_path.is_empty()
            && self.destination.is_none()
            && self.sent_at.is_none()
            && self.responded_at.is_none()
            && self.timeout_ms.is_none()
            && self.timeout.is_none()
            && self.signatures.is_empty()
    }
}

/// `timeout` in whole milliseconds, if that is exact.
fn whole_millis(timeout: Duration) -> Option<u64> {
    u64::try_from(timeout.as_millis())
        .ok()
        .filter(|ms| Duration::from_millis(*ms) == timeout)
}

/// Encode a frame as a JSON value.
pub fn encode_value(frame: &Frame) -> Value {
    let (mut elements, meta) = match frame {
        Frame::Request(f) => (
            vec![
                Value::from(MessageKind::Request.type_id()),
                Value::String(f.correlation_id.to_string()),
                Value::String(f.action.clone()),
                f.payload.clone(),
            ],
            FrameMeta {
                network_path: f.network_path.clone(),
                destination: f.destination.clone(),
                sent_at: f.sent_at,
                timeout_ms: f.timeout.and_then(whole_millis),
                timeout: f.timeout.filter(|t| whole_millis(*t).is_none()),
                signatures: f.signatures.clone(),
                ..FrameMeta::default()
            },
        ),
        Frame::Response(f) => (
            vec![
                Value::from(MessageKind::Response.type_id()),
                Value::String(f.correlation_id.to_string()),
                f.payload.clone(),
            ],
            FrameMeta {
                network_path: f.network_path.clone(),
                signatures: f.signatures.clone(),
                ..FrameMeta::default()
            },
        ),
        Frame::RequestError(f) | Frame::ResponseError(f) => (
            vec![
                Value::from(frame.kind().type_id()),
                Value::String(f.correlation_id.to_string()),
                Value::String(f.error_code.to_string()),
                Value::String(f.error_description.clone()),
                f.error_details.clone(),
            ],
            FrameMeta {
                network_path: f.network_path.clone(),
                destination: f.destination.clone(),
                responded_at: f.responded_at,
                signatures: f.signatures.clone(),
                ..FrameMeta::default()
            },
        ),
    };

    if !meta.is_empty() {
        // FrameMeta has only string keys, so conversion cannot fail.
        if let Ok(meta) = serde_json::to_value(&meta) {
            elements.push(meta);
        }
    }
    Value::Array(elements)
}

/// Encode a frame as wire text.
pub fn encode(frame: &Frame) -> String {
    encode_value(frame).to_string()
}

/// Decode wire text into a frame.
pub fn decode(raw: &str) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| FrameError::bare(FrameErrorReason::InvalidJson(e.to_string())))?;
    decode_value(&value)
}

/// Decode a JSON value into a frame.
pub fn decode_value(value: &Value) -> Result<Frame, FrameError> {
    let elements = value
        .as_array()
        .ok_or_else(|| FrameError::bare(FrameErrorReason::NotAnArray))?;

    let message_type = elements.first().and_then(Value::as_u64);
    let correlation_id = elements
        .get(1)
        .and_then(Value::as_str)
        .and_then(|s| CorrelationId::parse(s).ok());

    let fail = |reason: FrameErrorReason| FrameError {
        message_type,
        correlation_id: correlation_id.clone(),
        reason,
    };

    let type_id = match elements.first() {
        Some(v) => v
            .as_u64()
            .ok_or_else(|| fail(FrameErrorReason::InvalidField("messageTypeId")))?,
        None => return Err(fail(FrameErrorReason::InvalidField("messageTypeId"))),
    };
    let kind = MessageKind::from_type_id(type_id)
        .ok_or_else(|| fail(FrameErrorReason::UnsupportedMessageType(type_id.to_string())))?;
    let id = correlation_id
        .clone()
        .ok_or_else(|| fail(FrameErrorReason::InvalidField("messageId")))?;

    let (base_len, expected) = match kind {
        MessageKind::Request => (4, "4 or 5"),
        MessageKind::Response => (3, "3 or 4"),
        MessageKind::RequestError | MessageKind::ResponseError => (5, "5 or 6"),
    };
    if elements.len() != base_len && elements.len() != base_len + 1 {
        return Err(fail(FrameErrorReason::WrongArity {
            expected,
            found: elements.len(),
        }));
    }

    let meta = match elements.get(base_len) {
        Some(raw) => {
            if !raw.is_object() {
                return Err(fail(FrameErrorReason::InvalidMeta(
                    "meta must be an object".into(),
                )));
            }
            FrameMeta::deserialize(raw)
                .map_err(|e| fail(FrameErrorReason::InvalidMeta(e.to_string())))?
        }
        None => FrameMeta::default(),
    };

    let string_at = |idx: usize, field: &'static str| -> Result<String, FrameError> {
        elements
            .get(idx)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| fail(FrameErrorReason::InvalidField(field)))
    };
    let object_at = |idx: usize, field: &'static str| -> Result<Value, FrameError> {
        elements
            .get(idx)
            .filter(|v| v.is_object())
            .cloned()
            .ok_or_else(|| fail(FrameErrorReason::InvalidField(field)))
    };

    let frame = match kind {
        MessageKind::Request => {
            let action = string_at(2, "action")?;
            if action.is_empty() {
                return Err(fail(FrameErrorReason::InvalidField("action")));
            }
            Frame::Request(RequestFrame {
                correlation_id: id,
                action,
                payload: object_at(3, "payload")?,
                destination: meta.destination,
                network_path: meta.network_path,
                sent_at: meta.sent_at,
                timeout: meta.timeout.or(meta.timeout_ms.map(Duration::from_millis)),
                signatures: meta.signatures,
            })
        }
        MessageKind::Response => Frame::Response(ResponseFrame {
            correlation_id: id,
            payload: object_at(2, "payload")?,
            network_path: meta.network_path,
            signatures: meta.signatures,
        }),
        MessageKind::RequestError | MessageKind::ResponseError => {
            let error = ErrorFrame {
                correlation_id: id,
                error_code: ErrorCode::from(string_at(2, "errorCode")?),
                error_description: string_at(3, "errorDescription")?,
                error_details: object_at(4, "errorDetails")?,
                network_path: meta.network_path,
                responded_at: meta.responded_at,
                destination: meta.destination,
                signatures: meta.signatures,
            };
            if kind == MessageKind::RequestError {
                Frame::RequestError(error)
            } else {
                Frame::ResponseError(error)
            }
        }
    };
    Ok(frame)
}
