use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::CorrelationId;

/// Frame delimiter on the wire.
pub const DELIMITER: u8 = b'\n';

/// Outbound request: `{"id":..,"method":..,"params":[..]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: CorrelationId,
    pub method: String,
    pub params: Vec<Value>,
}

impl RequestEnvelope {
    // ---

    pub fn new(id: CorrelationId, method: impl Into<String>, params: Vec<Value>) -> Self {
        // ---
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to one wire frame, delimiter included.
    pub fn to_frame(&self) -> serde_json::Result<Bytes> {
        // ---
        let mut buf = serde_json::to_vec(self)?;
        buf.push(DELIMITER);
        Ok(Bytes::from(buf))
    }
}

/// Structured error returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Interpret whatever the server put in the `error` member.
    ///
    /// Well-formed `{code, message}` objects map directly. Anything else that
    /// is not `null` becomes code 0 with the JSON text as the message, since
    /// some servers send bare strings.
    fn from_value(value: Value) -> Option<Self> {
        // ---
        match value {
            Value::Null => None,
            Value::String(message) => Some(Self { code: 0, message }),
            Value::Object(ref obj) => {
                let code = obj.get("code").and_then(Value::as_i64);
                let message = obj.get("message").and_then(Value::as_str);
                match (code, message) {
                    (Some(code), Some(message)) => Some(Self {
                        code,
                        message: message.to_owned(),
                    }),
                    _ => Some(Self {
                        code: code.unwrap_or(0),
                        message: message.map(str::to_owned).unwrap_or_else(|| value.to_string()),
                    }),
                }
            }
            other => Some(Self {
                code: 0,
                message: other.to_string(),
            }),
        }
    }
}

/// Inbound response or push notification.
///
/// Only the routing members are extracted; the rest of the document stays in
/// `frame` and is decoded on demand by whoever receives it.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    /// Echoed request id, present only when it is an unsigned integer.
    pub id: Option<CorrelationId>,

    /// Notification topic, present only when it is a non-empty string.
    pub method: Option<Arc<str>>,

    /// Server-reported error, if any.
    pub error: Option<ApiError>,

    /// The raw frame as received (delimiter stripped).
    pub frame: Bytes,
}

#[derive(Deserialize)]
struct ResultMember {
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize)]
struct ParamsMember {
    #[serde(default)]
    params: Value,
}

impl ResponseEnvelope {
    // ---

    /// Parse a frame leniently.
    ///
    /// The frame must be a JSON object; every routing member is optional and
    /// members of an unexpected type are treated as absent.
    pub fn parse(frame: Bytes) -> serde_json::Result<Self> {
        // ---
        let mut doc: Map<String, Value> = serde_json::from_slice(&frame)?;

        let id = doc
            .get("id")
            .and_then(Value::as_u64)
            .map(CorrelationId::from);

        let method = doc
            .get("method")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(Arc::from);

        let error = doc.remove("error").and_then(ApiError::from_value);

        Ok(Self {
            id,
            method,
            error,
            frame,
        })
    }

    /// Decode the `result` member. A missing result decodes from `null`.
    pub fn result<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        // ---
        let member: ResultMember = serde_json::from_slice(&self.frame)?;
        serde_json::from_value(member.result)
    }

    /// Decode the `params` member. A missing params member decodes from `null`.
    pub fn params<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        // ---
        let member: ParamsMember = serde_json::from_slice(&self.frame)?;
        serde_json::from_value(member.params)
    }

    /// Decode the whole document.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        // ---
        serde_json::from_slice(&self.frame)
    }
}
