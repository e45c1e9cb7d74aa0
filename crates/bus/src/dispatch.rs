//! Subscriber table and detached fan-out

use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::subscriber::EventSubscriber;
use crate::subscription::SubscriptionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

type Entry = (SubscriptionId, Arc<dyn EventSubscriber>);

/// Topic → subscribers, keyed by stable ids
#[derive(Default)]
pub(crate) struct SubscriberTable {
    topics: RwLock<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl SubscriberTable {
    /// Register a subscriber; the flag tells whether it is the topic's first
    pub fn add(&self, topic: &str, subscriber: Arc<dyn EventSubscriber>) -> (SubscriptionId, bool) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut topics = self.topics.write();
        let entries = topics.entry(topic.to_string()).or_default();
        entries.push((id, subscriber));
        (id, entries.len() == 1)
    }

    /// Remove by id; returns (removed, topic now empty)
    pub fn remove(&self, topic: &str, id: SubscriptionId) -> (bool, bool) {
        let mut topics = self.topics.write();
        let Some(entries) = topics.get_mut(topic) else {
            return (false, false);
        };

        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;

        let empty = entries.is_empty();
        if empty {
            topics.remove(topic);
        }
        (removed, removed && empty)
    }

    /// Copy of the topic's subscribers, taken without holding the lock afterwards
    pub fn snapshot(&self, topic: &str) -> Vec<Arc<dyn EventSubscriber>> {
        self.topics
            .read()
            .get(topic)
            .map(|entries| entries.iter().map(|(_, s)| s.clone()).collect())
            .unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.read().keys().cloned().collect()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.topics.write().clear();
    }
}

/// Run every subscriber in its own task; never waits for them
///
/// Each handler runs inside an inner task so a panic stays contained and is
/// reported by the supervising task. Handlers are spawned on the current
/// tokio runtime; without one nothing is delivered and
/// [`BusError::NoRuntime`] is returned.
pub(crate) fn dispatch(subscribers: Vec<Arc<dyn EventSubscriber>>, event: Event) -> BusResult<()> {
    if subscribers.is_empty() {
        tracing::trace!(topic = %event.topic, "No subscribers for event");
        return Ok(());
    }
    let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;

    let event = Arc::new(event);
    for subscriber in subscribers {
        let event = event.clone();
        runtime.spawn(async move {
            let name = subscriber.name().to_string();
            let topic = event.topic.clone();

            let handler = tokio::spawn(async move { subscriber.handle(&event).await });

            match handler.await {
                Ok(Ok(())) => {
                    tracing::debug!(topic = %topic, subscriber = %name, "Event handled");
                }
                Ok(Err(e)) => {
                    tracing::warn!(topic = %topic, subscriber = %name, error = %e, "Subscriber failed");
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(topic = %topic, subscriber = %name, "Subscriber panicked");
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, subscriber = %name, error = %e, "Subscriber task cancelled");
                }
            }
        });
    }
    Ok(())
}
