//! Transport implementations.
//!
//! Concrete implementations of the domain-level `Transport` trait, exposed
//! only through constructor functions. The TLS variant is behind the
//! `transport_tls` feature.
//!
//! Domain code must not depend on transport-specific types.

mod memory;
pub(crate) mod stream;

#[cfg(feature = "transport_tls")]
mod tls;

pub use memory::{create_memory_transport, MemoryPeer};
pub use stream::create_tcp_transport;

#[cfg(feature = "transport_tls")]
pub use tls::{create_tls_transport, TlsConfig};
