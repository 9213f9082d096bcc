//! Node builder.
//!
//! Fluent construction of a [`Node`] with non-default settings.

use std::time::Duration;

use crate::{Node, NodeConfig};

/// Builder for [`Node`] instances.
///
/// Unset values fall back to [`NodeConfig::default()`].
///
/// # Example
/// ```no_run
/// use electrum_rpc::NodeBuilder;
/// use std::time::Duration;
///
/// # async fn example() -> electrum_rpc::Result<()> {
/// let node = NodeBuilder::new()
///     .request_timeout(Duration::from_secs(10))
///     .subscriber_capacity(16)
///     .keep_alive(Duration::from_secs(60))
///     .build();
///
/// node.connect_tcp("electrum.example.org:50001").await?;
/// let banner: String = node.request("server.banner", vec![]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct NodeBuilder {
    // ---
    request_timeout: Option<Duration>,
    subscriber_capacity: Option<usize>,
    inbound_capacity: Option<usize>,
    max_frame_len: Option<usize>,
    keep_alive: Option<Duration>,
}

impl NodeBuilder {
    /// Create a builder with every setting at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long a request waits for its response.
    ///
    /// Default: 5s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the buffer size of each subscriber channel (minimum 1).
    ///
    /// Default: 1.
    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = Some(capacity);
        self
    }

    /// Set the frame channel capacity between transport and dispatch loop.
    ///
    /// Default: 64.
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = Some(capacity);
        self
    }

    /// Set the longest accepted inbound frame.
    ///
    /// Default: 16 MiB.
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = Some(len);
        self
    }

    /// Send `server.ping` every `interval` while connected.
    ///
    /// Default: disabled.
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }

    /// The configuration this builder would produce.
    pub fn config(&self) -> NodeConfig {
        // ---
        let defaults = NodeConfig::default();
        NodeConfig {
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            subscriber_capacity: self
                .subscriber_capacity
                .unwrap_or(defaults.subscriber_capacity)
                .max(1),
            inbound_capacity: self
                .inbound_capacity
                .unwrap_or(defaults.inbound_capacity)
                .max(1),
            max_frame_len: self.max_frame_len.unwrap_or(defaults.max_frame_len),
            keep_alive: self.keep_alive.or(defaults.keep_alive),
        }
    }

    /// Build the node (consumes self). The node is not connected yet.
    pub fn build(self) -> Node {
        Node::with_config(self.config())
    }
}
