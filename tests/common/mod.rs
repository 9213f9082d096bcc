// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use electrum_rpc::{create_memory_transport, MemoryPeer, Node, NodeConfig};

static INIT: Once = Once::new();

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Short timeout so failure paths finish quickly.
pub fn fast_config() -> NodeConfig {
    NodeConfig {
        request_timeout: Duration::from_millis(300),
        ..NodeConfig::default()
    }
}

/// Node connected to an in-memory peer that plays the server.
pub async fn connected_node(config: NodeConfig) -> (Node, MemoryPeer) {
    init_logging();

    let node = Node::with_config(config);
    let (transport, handle, peer) = create_memory_transport(&node.config().transport_config());
    node.connect_with(transport, handle)
        .await
        .expect("memory connect failed");
    (node, peer)
}
