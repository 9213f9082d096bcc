use std::io;

use thiserror::Error;

use crate::protocol::ApiError;

/// Stream-level failure reported by a transport.
///
/// Cheap to clone so the same failure can be published to collaborators
/// and copied into every request that was waiting on the dead connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// Read or write on the underlying stream failed.
    #[error("stream I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    /// A single frame exceeded the configured limit before a delimiter was seen.
    #[error("inbound frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        // ---
        match err.kind() {
            io::ErrorKind::UnexpectedEof => TransportError::Closed,
            kind => TransportError::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}

/// Errors returned by the correlation engine.
#[derive(Error, Debug)]
pub enum RpcError {
    /// No response arrived within the node's request timeout.
    #[error("request timed out")]
    Timeout,

    /// `connect` was called on a node that already owns a transport.
    #[error("node already connected")]
    AlreadyConnected,

    /// `request` was called before any transport was attached.
    #[error("node is not connected")]
    NotConnected,

    /// The node has been shut down.
    #[error("node has shut down")]
    Shutdown,

    /// The transport died while the request was outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(TransportError),

    /// Sending on the transport failed.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Dialing the server failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding of a request or decoding of a result failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server answered with a structured error.
    #[error("server error: {0}")]
    Protocol(ApiError),

    /// The generated correlation id is still held by an outstanding request.
    #[error("correlation id {0} is still pending")]
    IdCollision(u64),

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        RpcError::Transport(err)
    }
}

impl From<ApiError> for RpcError {
    fn from(err: ApiError) -> Self {
        RpcError::Protocol(err)
    }
}

impl RpcError {
    /// Returns the server error if this is a protocol-level failure.
    pub fn as_api_error(&self) -> Option<&ApiError> {
        match self {
            RpcError::Protocol(api) => Some(api),
            _ => None,
        }
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
