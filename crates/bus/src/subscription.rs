//! Subscription handles

use parking_lot::Mutex;
use std::fmt;

/// Stable identity of one subscriber registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Cancel = Box<dyn FnOnce() -> bool + Send>;

/// Handle returned by `subscribe`
///
/// Dropping the handle keeps the subscriber registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    cancel: Mutex<Option<Cancel>>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        topic: impl Into<String>,
        cancel: impl FnOnce() -> bool + Send + 'static,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the subscriber; returns whether this call removed it
    ///
    /// Safe to call any number of times from any thread.
    pub fn unsubscribe(&self) -> bool {
        let cancel = self.cancel.lock().take();
        match cancel {
            Some(cancel) => cancel(),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::new(SubscriptionId(7), "t", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(sub.is_active());
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sub.id().to_string(), "sub-7");
    }
}
