use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::protocol::{CorrelationId, ResponseEnvelope};
use crate::{log_trace, Result, RpcError};

/// What a waiting request eventually receives: the response envelope, or
/// the reason the connection went away first.
pub(super) type Reply = Result<ResponseEnvelope>;

struct PendingEntry {
    tx: oneshot::Sender<Reply>,
    created: Instant,
}

/// Tracks requests waiting for responses.
///
/// Maps correlation ids to oneshot channels. Every entry leaves the table
/// exactly once: on completion, on explicit removal (timeout or failed send),
/// or when the table is closed. A closed table accepts no new entries.
pub(super) struct PendingTable {
    // ---
    entries: HashMap<CorrelationId, PendingEntry>,
    closed: bool,
}

impl PendingTable {
    // ---

    pub fn new() -> Self {
        // ---
        Self {
            entries: HashMap::new(),
            closed: false,
        }
    }

    /// Register a waiter for `id`.
    ///
    /// Fails with `Shutdown` once the table is closed and with `IdCollision`
    /// if `id` is still outstanding; the existing waiter is left untouched.
    pub fn register(&mut self, id: CorrelationId) -> Result<oneshot::Receiver<Reply>> {
        // ---
        if self.closed {
            return Err(RpcError::Shutdown);
        }
        if self.entries.contains_key(&id) {
            return Err(RpcError::IdCollision(id.value()));
        }

        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingEntry {
                tx,
                created: Instant::now(),
            },
        );
        Ok(rx)
    }

    /// Deliver a response to the waiter for `id` and remove the entry.
    ///
    /// Returns true if a waiter was registered. The waiter may already have
    /// given up; that still counts as delivered.
    pub fn complete(&mut self, id: CorrelationId, envelope: ResponseEnvelope) -> bool {
        // ---
        match self.entries.remove(&id) {
            Some(entry) => {
                log_trace!("response {id} after {:?}", entry.created.elapsed());
                let _ = entry.tx.send(Ok(envelope));
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `id` without delivering anything.
    pub fn remove(&mut self, id: CorrelationId) -> bool {
        // ---
        self.entries.remove(&id).is_some()
    }

    /// Close the table and fail every waiter with the error from `reason`.
    ///
    /// Returns the number of waiters that were failed.
    pub fn close<F>(&mut self, reason: F) -> usize
    where
        F: Fn() -> RpcError,
    {
        // ---
        self.closed = true;

        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.tx.send(Err(reason()));
        }
        count
    }

    pub fn len(&self) -> usize {
        // ---
        self.entries.len()
    }

    pub fn is_closed(&self) -> bool {
        // ---
        self.closed
    }
}
