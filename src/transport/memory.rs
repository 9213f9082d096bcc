//! In-memory transport implementation.
//!
//! An in-process channel pair standing in for a server connection. The
//! client side is an ordinary [`Transport`]; the other side is a
//! [`MemoryPeer`] that reads what the client sent and injects frames and
//! stream failures, playing the server in tests.
//!
//! ## Reference Semantics
//!
//! The memory transport defines the reference behavior that the stream
//! driver approximates:
//!
//! - frames are delivered in the order they were injected;
//! - at most one stream failure is reported, after which the inbound
//!   channels close and nothing further is delivered;
//! - `close()` drops every channel; the peer then sees `None` from
//!   `recv_frame()` and injection fails with `TransportError::Closed`.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::{CorrelationId, RequestEnvelope, DELIMITER};
use crate::{
    //
    log_debug,
    Result,
    RpcError,
    Transport,
    TransportBase,
    TransportConfig,
    TransportError,
    TransportHandle,
    TransportKind,
    TransportPtr,
};

/// Sending ends of the client's inbound channels, shared so either side
/// can close them.
#[derive(Default)]
struct InboundSenders {
    frames: Option<mpsc::Sender<Bytes>>,
    errors: Option<mpsc::Sender<TransportError>>,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Client half of the in-memory connection.
struct MemoryTransport {
    // ---
    base: TransportBase,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound: Arc<Mutex<InboundSenders>>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send(&self, frame: Bytes) -> Result<()> {
        // ---
        let outbound = lock_ignore_poison(&self.outbound).clone();
        let outbound = outbound.ok_or(RpcError::Transport(TransportError::Closed))?;

        outbound
            .send(frame)
            .map_err(|_| RpcError::Transport(TransportError::Closed))
    }

    async fn close(&self) -> Result<()> {
        // ---
        log_debug!("{}: closing memory transport", self.base.peer);

        lock_ignore_poison(&self.outbound).take();
        let mut inbound = lock_ignore_poison(&self.inbound);
        inbound.frames.take();
        inbound.errors.take();
        Ok(())
    }
}

/// Server half of the in-memory connection.
pub struct MemoryPeer {
    // ---
    outbound: mpsc::UnboundedReceiver<Bytes>,
    inbound: Arc<Mutex<InboundSenders>>,
}

impl MemoryPeer {
    // ---

    /// Next frame written by the client, delimiter stripped.
    ///
    /// Returns `None` once the client transport is closed.
    pub async fn recv_frame(&mut self) -> Option<Bytes> {
        // ---
        let mut frame = self.outbound.recv().await?;
        if frame.last() == Some(&DELIMITER) {
            frame.truncate(frame.len() - 1);
        }
        Some(frame)
    }

    /// Next request written by the client.
    ///
    /// Returns `None` once the client transport is closed or if the frame is
    /// not a request envelope.
    pub async fn recv_request(&mut self) -> Option<RequestEnvelope> {
        // ---
        let frame = self.recv_frame().await?;
        serde_json::from_slice(&frame).ok()
    }

    /// Inject one raw frame, as if the server had written it followed by the
    /// delimiter.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the connection is closed or failed.
    pub async fn push(&self, frame: impl Into<Bytes>) -> std::result::Result<(), TransportError> {
        // ---
        let sender = lock_ignore_poison(&self.inbound).frames.clone();
        let sender = sender.ok_or(TransportError::Closed)?;

        sender
            .send(frame.into())
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Inject a JSON document as one frame.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the connection is closed or failed.
    pub async fn push_json(&self, doc: &Value) -> std::result::Result<(), TransportError> {
        // ---
        self.push(doc.to_string()).await
    }

    /// Answer request `id` with `{"id":id,"result":result}`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the connection is closed or failed.
    pub async fn respond(
        &self,
        id: CorrelationId,
        result: Value,
    ) -> std::result::Result<(), TransportError> {
        // ---
        self.push_json(&serde_json::json!({ "id": id, "result": result }))
            .await
    }

    /// Report a stream failure and close the connection.
    ///
    /// Only the first failure is delivered; later calls return
    /// `TransportError::Closed`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the connection is already closed
    /// or failed.
    pub async fn fail(&self, err: TransportError) -> std::result::Result<(), TransportError> {
        // ---
        let errors = {
            let mut inbound = lock_ignore_poison(&self.inbound);
            inbound.frames.take();
            inbound.errors.take()
        };
        let errors = errors.ok_or(TransportError::Closed)?;

        errors.send(err).await.map_err(|_| TransportError::Closed)
    }
}

/// Create a connected in-memory transport.
///
/// Returns the client halves (to hand to a node) and the peer that plays the
/// server.
pub fn create_memory_transport(
    config: &TransportConfig,
) -> (TransportPtr, TransportHandle, MemoryPeer) {
    // ---
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::channel(config.inbound_capacity.max(1));
    let (errors_tx, errors_rx) = mpsc::channel(1);

    let inbound = Arc::new(Mutex::new(InboundSenders {
        frames: Some(frames_tx),
        errors: Some(errors_tx),
    }));

    let transport = MemoryTransport {
        base: TransportBase::new("memory", TransportKind::Memory),
        outbound: Mutex::new(Some(outbound_tx)),
        inbound: inbound.clone(),
    };

    let handle = TransportHandle {
        inbound: frames_rx,
        errors: errors_rx,
    };

    let peer = MemoryPeer {
        outbound: outbound_rx,
        inbound,
    };

    (Arc::new(transport), handle, peer)
}
