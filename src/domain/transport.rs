// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! A transport moves opaque frames between this client and one server. It
//! knows where a frame ends (the delimiter) but nothing about the JSON inside.
//!
//! The capability is split by ownership:
//!
//! - the [`Transport`] trait object is the shared send side, cloned into
//!   every caller of `request`;
//! - the [`TransportHandle`] owns the two inbound streams (frames and
//!   stream failures) and is moved into the single dispatch task.
//!
//! Every transport factory returns both halves together.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{Result, TransportError};

/// How the underlying connection was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain TCP stream.
    Tcp,
    /// TLS over TCP.
    Tls,
    /// In-process channel pair, used in tests.
    Memory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
            TransportKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base` so the
/// default `Transport` methods can answer identity questions.
#[derive(Debug, Clone)]
pub struct TransportBase {
    /// Remote endpoint as given by the caller, used for logging.
    pub peer: String,
    /// Connection variant.
    pub kind: TransportKind,
}

impl TransportBase {
    pub fn new(peer: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            peer: peer.into(),
            kind,
        }
    }
}

/// Connection parameters shared by every transport factory.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Capacity of the frame channel between the read loop and its consumer.
    /// A slow consumer back-pressures the read loop, not the server.
    pub inbound_capacity: usize,

    /// Longest accepted frame, delimiter excluded.
    pub max_frame_len: usize,
}

impl TransportConfig {
    /// Default frame channel capacity.
    pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

    /// Default frame size limit (16 MiB).
    pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
}

impl Default for TransportConfig {
    fn default() -> Self {
        // ---
        Self {
            inbound_capacity: Self::DEFAULT_INBOUND_CAPACITY,
            max_frame_len: Self::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Inbound side of a transport.
///
/// Contract:
/// - `inbound` yields frames in wire order with the delimiter stripped;
/// - `errors` yields at most one failure, after which both channels close
///   and nothing more is produced.
pub struct TransportHandle {
    /// Raw frames received from the server.
    pub inbound: mpsc::Receiver<Bytes>,

    /// Stream-level failures (including a clean close by the peer).
    pub errors: mpsc::Receiver<TransportError>,
}

/// Transport abstraction.
///
/// Implementations must ensure that:
/// - `send()` writes the whole frame or fails; there is no batching and no
///   buffering beyond what the underlying stream does;
/// - `send()` may be called concurrently; frames are never interleaved;
/// - `close()` stops the read side, causing the handle's channels to close,
///   and is idempotent.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Remote endpoint description.
    fn peer(&self) -> &str {
        &self.base().peer
    }

    /// Connection variant.
    fn kind(&self) -> TransportKind {
        self.base().kind
    }

    /// Write one complete frame, delimiter included.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Close the connection and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// Cloning only bumps a reference count; all clones share one connection.
pub type TransportPtr = Arc<dyn Transport>;
