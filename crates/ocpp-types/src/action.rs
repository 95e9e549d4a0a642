//! Action schema seam.
//!
//! Payload schemas live outside the exchange core. An action plugs in by
//! naming itself and its request/response types; the engine only needs serde
//! to move between JSON and the typed values.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named OCPP operation with typed request and response payloads.
///
/// ```ignore
/// struct CancelReservation;
///
/// impl Action for CancelReservation {
///     const NAME: &'static str = "CancelReservation";
///     type Request = CancelReservationRequest;
///     type Response = CancelReservationResponse;
/// }
/// ```
pub trait Action: Send + Sync + 'static {
    /// Action name as it appears on the wire.
    const NAME: &'static str;

    /// Request payload.
    type Request: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Response payload.
    type Response: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Parse a request payload.
    fn parse_request(payload: &Value) -> Result<Self::Request, serde_json::Error> {
        Self::Request::deserialize(payload)
    }

    /// Parse a response payload.
    fn parse_response(payload: &Value) -> Result<Self::Response, serde_json::Error> {
        Self::Response::deserialize(payload)
    }
}
