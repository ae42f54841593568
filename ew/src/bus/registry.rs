//! Topic subscriber registry

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use super::types::NamedEvent;
use crate::lock;

/// Callback invoked for every event on a subscribed topic
pub type Handler = Arc<dyn Fn(&NamedEvent) + Send + Sync>;

/// Identifier of one registration
pub type SubscriptionId = u64;

/// Registrations keyed by topic, each topic in subscription order
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`
    pub fn add(&self, topic: &str, handler: Handler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut topics = lock(&self.topics);
        topics.entry(topic.to_string()).or_default().push((id, handler));
        debug!(topic, id, subscribers = topics[topic].len(), "SubscriberRegistry::add");
        id
    }

    /// Remove exactly one registration; false if it was already gone
    pub fn remove(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut topics = lock(&self.topics);
        let Some(entries) = topics.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            topics.remove(topic);
        }
        debug!(topic, id, removed, "SubscriberRegistry::remove");
        removed
    }

    /// Invoke every current subscriber of the event's topic, in order
    ///
    /// Handlers run on a snapshot taken outside the lock, so a handler may
    /// subscribe or unsubscribe without deadlocking. A panicking handler is
    /// logged and skipped. Returns the number of handlers that completed.
    pub fn dispatch(&self, event: &NamedEvent) -> usize {
        let handlers: Vec<(SubscriptionId, Handler)> = match lock(&self.topics).get(&event.topic) {
            Some(entries) => entries.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(topic = %event.topic, id, "dispatch: subscriber panicked"),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.topics).get(topic).map_or(0, Vec::len)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.topics).keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Drop every registration
    pub fn clear(&self) {
        debug!("SubscriberRegistry::clear: called");
        lock(&self.topics).clear();
    }
}

/// Handle to one registration
///
/// Dropping the handle keeps the registration; call [`Subscription::unsubscribe`]
/// to remove it. Unsubscribing twice, or after the bus is gone, does nothing.
#[derive(Debug, Clone)]
pub struct Subscription {
    topic: String,
    id: SubscriptionId,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub(crate) fn new(topic: &str, id: SubscriptionId, registry: &Arc<SubscriberRegistry>) -> Self {
        Self {
            topic: topic.to_string(),
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.topic, self.id);
        }
    }
}
