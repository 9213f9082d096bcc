//! Request/response correlation for line-delimited JSON-RPC servers
//!
//! This library is the client-side engine for the Electrum wallet server
//! protocol: one persistent connection, newline-delimited JSON documents,
//! many concurrent callers. It assigns correlation ids, matches interleaved
//! responses back to their callers, fans push notifications out to
//! subscribers, and enforces a per-request timeout.
//!
//! Operation-specific wrappers (server version, address history, ...) are
//! left to the layer above; they only supply a method name, parameters and a
//! result type to [`Node::request`].
//!

// Must come first so the macros are visible to every module below.
mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_trace, log_warn};

mod domain;
mod node;
mod protocol;
mod transport;

mod node_builder;
mod node_config;

mod error;
pub mod topics;

// Re-export main types
pub use node::{Node, Notification, Response, SubscriptionHandle};
pub use node_builder::NodeBuilder;
pub use node_config::NodeConfig;

pub use error::{Result, RpcError, TransportError};
pub use protocol::{ApiError, CorrelationId, RequestEnvelope, ResponseEnvelope};

pub use transport::{create_memory_transport, create_tcp_transport, MemoryPeer};

#[cfg(feature = "transport_tls")]
pub use transport::{create_tls_transport, TlsConfig};

#[cfg(feature = "transport_tls")]
pub use rustls;

// --- public re-exports
pub use domain::{
    //
    Transport,
    TransportBase,
    TransportConfig,
    TransportHandle,
    TransportKind,
    TransportPtr,
};
