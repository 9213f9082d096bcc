//! Domain layer public interface.
//!
//! Abstractions that the correlator depends on without knowing how bytes
//! reach the server. Concrete transports live under `src/transport/`.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod transport;

pub use transport::{
    //
    Transport,
    TransportBase,
    TransportConfig,
    TransportHandle,
    TransportKind,
    TransportPtr,
};
