use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::protocol::{ApiError, CorrelationId, ResponseEnvelope};

/// Successful response to a request.
///
/// Holds the raw frame; members are decoded on demand.
#[derive(Debug, Clone)]
pub struct Response {
    envelope: ResponseEnvelope,
}

impl Response {
    pub(super) fn new(envelope: ResponseEnvelope) -> Self {
        Self { envelope }
    }

    /// Correlation id echoed by the server.
    pub fn id(&self) -> Option<CorrelationId> {
        self.envelope.id
    }

    /// The frame exactly as received, delimiter stripped.
    pub fn frame(&self) -> &Bytes {
        &self.envelope.frame
    }

    /// Decode the `result` member; a missing result decodes from `null`.
    pub fn result<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        self.envelope.result()
    }

    /// Decode the whole response document.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        self.envelope.decode()
    }
}

/// Push notification delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Notification {
    envelope: ResponseEnvelope,
}

impl Notification {
    pub(super) fn new(envelope: ResponseEnvelope) -> Self {
        Self { envelope }
    }

    /// Topic the notification was published under.
    pub fn method(&self) -> &str {
        self.envelope.method.as_deref().unwrap_or_default()
    }

    /// Structured error carried by the frame, if any.
    pub fn error(&self) -> Option<&ApiError> {
        self.envelope.error.as_ref()
    }

    /// Correlation id, when the server echoed one on the same frame.
    pub fn id(&self) -> Option<CorrelationId> {
        self.envelope.id
    }

    /// The frame exactly as received, delimiter stripped.
    pub fn frame(&self) -> &Bytes {
        &self.envelope.frame
    }

    /// Decode the `params` member.
    pub fn params<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        self.envelope.params()
    }

    /// Decode the `result` member.
    ///
    /// Subscribe confirmations carry their payload here rather than in
    /// `params`.
    pub fn result<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        self.envelope.result()
    }

    /// Decode the whole notification document.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        self.envelope.decode()
    }
}
