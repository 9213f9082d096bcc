//! Dispatch loop: routes inbound frames to waiters and subscribers.
//!
//! Malformed frames are logged and discarded; the loop keeps running so one
//! bad frame cannot fail unrelated outstanding requests.

use std::sync::Weak;

use bytes::Bytes;

use super::{write_ignore_poison, Inner, Notification};
use crate::protocol::ResponseEnvelope;
use crate::{log_debug, log_trace, TransportError, TransportHandle};

pub(super) async fn run(inner: Weak<Inner>, mut handle: TransportHandle) {
    // ---
    log_debug!("dispatch task started");

    let failure = loop {
        // Frames queued ahead of a failure are routed before it is seen.
        tokio::select! {
            biased;

            frame = handle.inbound.recv() => match frame {
                Some(frame) => {
                    let Some(inner) = inner.upgrade() else {
                        log_debug!("node dropped, dispatch task exiting");
                        return;
                    };
                    route(&inner, frame);
                }
                None => break handle.errors.recv().await.unwrap_or(TransportError::Closed),
            },

            err = handle.errors.recv() => break err.unwrap_or(TransportError::Closed),
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.fail_connection(failure).await;
    }

    log_debug!("dispatch task stopped");
}

/// Route one frame. Topic fan-out and id matching are independent.
fn route(inner: &Inner, frame: Bytes) {
    // ---
    let envelope = match ResponseEnvelope::parse(frame) {
        Ok(envelope) => envelope,
        Err(_err) => {
            log_debug!("discarding malformed frame: {_err}");
            return;
        }
    };

    if let Some(topic) = envelope.method.clone() {
        let _outcome = inner
            .subscriptions
            .publish(&topic, &Notification::new(envelope.clone()));
        log_trace!(
            "{topic}: delivered to {}, dropped for {}",
            _outcome.delivered,
            _outcome.dropped
        );
    }

    match envelope.id {
        Some(id) => {
            if !write_ignore_poison(&inner.pending).complete(id, envelope) {
                log_debug!("no pending request for id {id} (late or unsolicited)");
            }
        }
        None => {
            if envelope.method.is_none() {
                log_debug!("frame has neither id nor method, ignoring");
            }
        }
    }
}
