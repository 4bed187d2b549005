//! WebSocket message codec.
//!
//! Both directions use the same JSON envelope:
//!
//! ```json
//! { "event": "chat/message", "data": { "text": "hi" }, "timestamp": 1700000000000 }
//! ```
//!
//! Responses to a dispatched event extend the envelope with a `success` flag:
//! - success: `{ success: true, data, message?, event, timestamp }`
//! - error: `{ success: false, error: { code, message, statusCode }, event, timestamp }`
//!
//! Inbound timestamps are ignored; outbound timestamps are stamped at encode time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RealtimeError, RealtimeResult};

/// Event name used for frames that cannot be attributed to an inbound event.
pub const ERROR_EVENT: &str = "error";

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Event name (never empty)
    pub event: String,
    /// Event payload (always a JSON object)
    pub data: Value,
}

impl InboundMessage {
    /// Creates an inbound message. Non-object payloads are replaced by an empty object.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        let data = if data.is_object() {
            data
        } else {
            Value::Object(Map::new())
        };
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Error body of an error response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine readable error code
    pub code: String,
    /// Human readable message
    pub message: String,
    /// HTTP-style status code
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl From<&RealtimeError> for ErrorBody {
    fn from(err: &RealtimeError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            status_code: err.status_code().as_u16(),
        }
    }
}

/// Server-to-client frame, before timestamping.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Plain event envelope (emits and broadcasts)
    Event {
        /// Event name
        event: String,
        /// Event payload
        data: Value,
    },
    /// Successful response to an inbound event
    Success {
        /// Event being answered
        event: String,
        /// Response payload
        data: Value,
        /// Optional message
        message: Option<String>,
    },
    /// Error response to an inbound event
    Error {
        /// Event being answered
        event: String,
        /// Error details
        error: ErrorBody,
    },
}

impl OutboundMessage {
    /// Creates a plain event envelope.
    #[must_use]
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self::Event {
            event: event.into(),
            data,
        }
    }

    /// Creates a success response.
    #[must_use]
    pub fn success(event: impl Into<String>, data: Value, message: Option<String>) -> Self {
        Self::Success {
            event: event.into(),
            data,
            message,
        }
    }

    /// Creates an error response from a real-time error.
    #[must_use]
    pub fn error(event: impl Into<String>, err: &RealtimeError) -> Self {
        Self::Error {
            event: event.into(),
            error: ErrorBody::from(err),
        }
    }

    /// Returns the event name of this frame.
    #[must_use]
    pub fn event_name(&self) -> &str {
        match self {
            Self::Event { event, .. } | Self::Success { event, .. } | Self::Error { event, .. } => {
                event.as_str()
            }
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireFrame<'a> {
    Event {
        event: &'a str,
        data: &'a Value,
        timestamp: i64,
    },
    Success {
        success: bool,
        data: &'a Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<&'a str>,
        event: &'a str,
        timestamp: i64,
    },
    Error {
        success: bool,
        error: &'a ErrorBody,
        event: &'a str,
        timestamp: i64,
    },
}

/// Decodes a raw inbound frame.
///
/// The frame must be a JSON object with a non-empty string `event`. A missing
/// or `null` `data` becomes an empty object; any other non-object `data` is
/// rejected.
pub fn decode(raw: &str) -> RealtimeResult<InboundMessage> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| RealtimeError::Parse(format!("Failed to parse message: {e}")))?;

    let Value::Object(mut object) = value else {
        return Err(RealtimeError::Parse(
            "Message must be a JSON object".to_string(),
        ));
    };

    let event = match object.remove("event") {
        Some(Value::String(event)) if !event.trim().is_empty() => event,
        Some(Value::String(_)) => {
            return Err(RealtimeError::Parse("Event name cannot be empty".to_string()));
        }
        Some(_) => {
            return Err(RealtimeError::Parse("Event name must be a string".to_string()));
        }
        None => return Err(RealtimeError::Parse("Missing event name".to_string())),
    };

    let data = match object.remove("data") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(data @ Value::Object(_)) => data,
        Some(_) => {
            return Err(RealtimeError::Parse("Message data must be an object".to_string()));
        }
    };

    Ok(InboundMessage { event, data })
}

/// Encodes an outbound frame, stamping the current server time.
pub fn encode(message: &OutboundMessage) -> RealtimeResult<String> {
    let timestamp = chrono::Utc::now().timestamp_millis();

    let frame = match message {
        OutboundMessage::Event { event, data } => WireFrame::Event {
            event,
            data,
            timestamp,
        },
        OutboundMessage::Success {
            event,
            data,
            message,
        } => WireFrame::Success {
            success: true,
            data,
            message: message.as_deref(),
            event,
            timestamp,
        },
        OutboundMessage::Error { event, error } => WireFrame::Error {
            success: false,
            error,
            event,
            timestamp,
        },
    };

    Ok(serde_json::to_string(&frame)?)
}
