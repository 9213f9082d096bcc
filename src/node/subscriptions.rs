use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::{read_ignore_poison, write_ignore_poison, Notification};
use crate::{log_trace, log_warn};

type SubscriberMap = HashMap<Arc<str>, Vec<mpsc::Sender<Notification>>>;

/// Receiving end of one subscription.
///
/// The stream ends (`recv()` returns `None`) when the node shuts down or its
/// connection fails. Dropping the handle simply stops delivery to it.
pub struct SubscriptionHandle {
    // ---
    topic: Arc<str>,

    // Wire order; frames that arrived while the buffer was full are missing.
    inbox: mpsc::Receiver<Notification>,
}

impl SubscriptionHandle {
    /// Topic this handle was registered under.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next notification.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.inbox.recv().await
    }

    /// Take a buffered notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.inbox.try_recv().ok()
    }
}

/// Outcome of fanning one notification out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

/// Topic → subscriber channels, owned by one node.
///
/// Overflow policy is drop-newest: a subscriber whose buffer is full misses
/// the incoming notification and keeps what it already has. Publishing never
/// waits for a subscriber.
pub(super) struct SubscriberRegistry {
    // ---
    // `None` once closed; new subscriptions then start out finished.
    topics: RwLock<Option<SubscriberMap>>,
}

impl SubscriberRegistry {
    // ---

    pub fn new() -> Self {
        // ---
        Self {
            topics: RwLock::new(Some(SubscriberMap::new())),
        }
    }

    /// Add a subscriber under `topic`. Repeated calls add independent
    /// subscribers. Senders whose handles were dropped are pruned from the
    /// topic on the way.
    pub fn subscribe(&self, topic: &str, capacity: usize) -> SubscriptionHandle {
        // ---
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let topic: Arc<str> = Arc::from(topic);

        let mut topics = write_ignore_poison(&self.topics);
        if let Some(map) = topics.as_mut() {
            let senders = map.entry(topic.clone()).or_default();
            senders.retain(|sender| !sender.is_closed());
            senders.push(tx);
        }

        SubscriptionHandle { topic, inbox: rx }
    }

    /// Deliver `notification` to every subscriber of `topic` without blocking.
    pub fn publish(&self, topic: &str, notification: &Notification) -> FanOut {
        // ---
        let mut outcome = FanOut::default();

        let topics = read_ignore_poison(&self.topics);
        let Some(senders) = topics.as_ref().and_then(|map| map.get(topic)) else {
            log_trace!("no subscribers for {topic}");
            return outcome;
        };

        for sender in senders {
            match sender.try_send(notification.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => outcome.dropped += 1,
                // Handle dropped by its owner.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        if outcome.dropped > 0 {
            log_warn!(
                "{topic}: dropped notification for {} subscriber(s) with full buffers",
                outcome.dropped
            );
        }
        outcome
    }

    /// Drop every subscriber channel, ending their streams.
    pub fn close(&self) {
        // ---
        write_ignore_poison(&self.topics).take();
    }

    /// Subscribers under `topic` whose handles are still alive.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        // ---
        read_ignore_poison(&self.topics)
            .as_ref()
            .and_then(|map| map.get(topic))
            .map_or(0, |senders| {
                senders.iter().filter(|sender| !sender.is_closed()).count()
            })
    }
}
