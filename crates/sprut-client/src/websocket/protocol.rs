//! JSON-RPC envelope codec for the hub protocol.
//!
//! Outbound: `{"jsonrpc": "2.0", "params": {...}, "id": 7, "token": "...", "serial": "..."}`
//!
//! Inbound:
//! - Response: `{"id": 7, "result": {...}}`
//! - Error: `{"id": 7, "error": {"code": -666003, "message": "..."}}`
//! - Event: `{"event": {...}}` (unsolicited, no id)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::CorrelationId;
use crate::error::{SprutError, SprutResult};

/// Protocol version stamped on every outbound envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// RPC error code the hub uses for an invalid or expired session token.
pub const INVALID_TOKEN_CODE: i64 = -666003;

/// Code reported when the hub sends an error that is not a `{code, message}` object.
pub const UNKNOWN_ERROR_CODE: i64 = -1;

/// Outbound request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEnvelope<'a> {
    pub jsonrpc: &'static str,
    pub params: &'a Value,
    pub id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<&'a str>,
    pub serial: &'a str,
}

/// RPC-level error carried by an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self {
                code: map
                    .get("code")
                    .and_then(Value::as_i64)
                    .unwrap_or(UNKNOWN_ERROR_CODE),
                message: map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            Value::String(message) => Self {
                code: UNKNOWN_ERROR_CODE,
                message: message.clone(),
            },
            other => Self {
                code: UNKNOWN_ERROR_CODE,
                message: other.to_string(),
            },
        }
    }

    /// Whether the hub rejected the session token.
    pub fn is_invalid_token(&self) -> bool {
        self.code == INVALID_TOKEN_CODE
    }
}

/// Classification of an inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries a correlation id and belongs to a pending call.
    Response,
    /// Unsolicited `{event: ...}` push from the hub.
    Event,
    /// Anything else. Logged and dropped.
    Unknown,
}

/// A decoded inbound envelope.
///
/// Keeps the raw JSON object so callers receive exactly what the hub sent.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    raw: Map<String, Value>,
}

impl InboundFrame {
    /// Build a frame from a JSON value. Fails unless the value is an object.
    pub fn from_value(value: Value) -> SprutResult<Self> {
        match value {
            Value::Object(raw) => Ok(Self { raw }),
            other => Err(SprutError::protocol(format!(
                "Expected a JSON object frame, got {other}"
            ))),
        }
    }

    /// The correlation id, if the frame carries a usable integer id.
    pub fn id(&self) -> Option<CorrelationId> {
        self.raw
            .get("id")
            .and_then(Value::as_u64)
            .map(CorrelationId::new)
    }

    /// The `result` member, treating `null` as absent.
    pub fn result(&self) -> Option<&Value> {
        self.raw.get("result").filter(|value| !value.is_null())
    }

    /// The `error` member, normalized to `{code, message}`.
    pub fn error(&self) -> Option<RpcError> {
        self.raw
            .get("error")
            .filter(|value| !value.is_null())
            .map(RpcError::from_value)
    }

    /// The `event` member of an unsolicited frame.
    pub fn event(&self) -> Option<&Value> {
        self.raw.get("event")
    }

    /// Whether this frame reports an invalid or expired token.
    pub fn is_invalid_token(&self) -> bool {
        self.error().is_some_and(|error| error.is_invalid_token())
    }

    /// Look up a nested member of `result` by path.
    pub fn result_at(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(self.result()?, |node, key| node.get(*key))
    }

    /// Borrow the raw envelope.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Consume into the raw envelope.
    pub fn into_value(self) -> Value {
        Value::Object(self.raw)
    }
}

/// Envelope encoder/decoder bound to one hub serial.
#[derive(Debug, Clone)]
pub struct JsonRpcCodec {
    serial: String,
}

impl JsonRpcCodec {
    /// Create a codec that stamps `serial` on every request.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }

    /// Serialize a request envelope to text.
    pub fn encode_request(
        &self,
        id: CorrelationId,
        params: &Value,
        token: Option<&str>,
    ) -> SprutResult<String> {
        let envelope = OutboundEnvelope {
            jsonrpc: JSONRPC_VERSION,
            params,
            id,
            token,
            serial: &self.serial,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Parse one text frame.
    pub fn decode(&self, text: &str) -> SprutResult<InboundFrame> {
        let value: Value = serde_json::from_str(text)?;
        InboundFrame::from_value(value)
    }

    /// Classify a decoded frame for routing.
    pub fn classify(&self, frame: &InboundFrame) -> MessageKind {
        if frame.id().is_some() {
            return MessageKind::Response;
        }
        if frame.event().is_some() {
            return MessageKind::Event;
        }
        MessageKind::Unknown
    }
}
