//! Periodic `server.ping` so idle connections are not dropped by the server.

use std::sync::Weak;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{self, MissedTickBehavior};

use super::{Inner, Node};
use crate::{log_trace, log_warn, RpcError};

/// Method used for keep-alive requests.
pub(crate) const PING: &str = "server.ping";

pub(super) async fn run(inner: Weak<Inner>, interval: Duration) {
    // ---
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // First tick completes immediately; the connection is fresh.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let node = Node { inner };

        match node.request::<Value>(PING, vec![]).await {
            Ok(_) => {
                log_trace!("keep-alive ping answered");
            }
            Err(RpcError::Shutdown) => return,
            Err(_err) => {
                log_warn!("keep-alive ping failed, stopping: {_err}");
                return;
            }
        }
    }
}
