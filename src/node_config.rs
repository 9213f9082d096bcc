//! Node configuration.
//!
//! Plain data with defaults matching the reference deployment. Build one
//! directly or through [`NodeBuilder`](crate::NodeBuilder).

use std::time::Duration;

use crate::TransportConfig;

/// Tuning knobs for a [`Node`](crate::Node).
///
/// # Example
///
/// ```
/// use electrum_rpc::NodeConfig;
/// use std::time::Duration;
///
/// let config = NodeConfig {
///     request_timeout: Duration::from_secs(10),
///     ..NodeConfig::default()
/// };
/// assert_eq!(config.subscriber_capacity, 1);
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    // ---
    /// How long `request` waits for the matching response.
    pub request_timeout: Duration,

    /// Buffer size of each subscriber channel. A push arriving while the
    /// buffer is full is dropped.
    pub subscriber_capacity: usize,

    /// Capacity of the frame channel between transport and dispatch loop.
    pub inbound_capacity: usize,

    /// Longest accepted inbound frame, delimiter excluded.
    pub max_frame_len: usize,

    /// Interval for `server.ping` keep-alive requests; `None` disables them.
    pub keep_alive: Option<Duration>,
}

impl NodeConfig {
    /// Default request timeout.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default subscriber buffer size.
    pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1;

    /// Transport parameters derived from this configuration.
    pub fn transport_config(&self) -> TransportConfig {
        // ---
        TransportConfig {
            inbound_capacity: self.inbound_capacity,
            max_frame_len: self.max_frame_len,
        }
    }
}

impl Default for NodeConfig {
    /// Reference defaults.
    ///
    /// - `request_timeout`: 5s
    /// - `subscriber_capacity`: 1
    /// - `inbound_capacity`: 64
    /// - `max_frame_len`: 16 MiB
    /// - `keep_alive`: disabled
    fn default() -> Self {
        // ---
        Self {
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            subscriber_capacity: Self::DEFAULT_SUBSCRIBER_CAPACITY,
            inbound_capacity: TransportConfig::DEFAULT_INBOUND_CAPACITY,
            max_frame_len: TransportConfig::DEFAULT_MAX_FRAME_LEN,
            keep_alive: None,
        }
    }
}
