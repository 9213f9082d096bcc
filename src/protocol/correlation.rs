use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Correlation id carried in the `id` member of requests and echoed back by
/// the server in the matching response.
///
/// Ids are only unique among requests outstanding on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    // ---

    /// Raw integer value as it appears on the wire.
    pub fn value(self) -> u64 {
        // ---
        self.0
    }
}

impl fmt::Display for CorrelationId {
    // ---

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    // ---

    fn from(id: u64) -> Self {
        // ---
        Self(id)
    }
}

/// Monotonic id source owned by a single node.
///
/// Fetch-and-increment on a 64-bit counter; wrapping back to zero would take
/// longer than any connection lives. The pending table still rejects an id
/// that is in use, so a wrap can never overwrite a waiter.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    // ---

    /// Counter starting at zero.
    pub fn new() -> Self {
        // ---
        Self::starting_at(0)
    }

    /// Counter whose first id is `first`.
    pub fn starting_at(first: u64) -> Self {
        // ---
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> CorrelationId {
        // ---
        CorrelationId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
