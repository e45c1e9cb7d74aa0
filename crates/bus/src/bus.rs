//! Event bus trait

use crate::error::BusResult;
use crate::event::Event;
use crate::factory::BusBackend;
use crate::subscriber::EventSubscriber;
use crate::subscription::Subscription;
use async_trait::async_trait;
use std::sync::Arc;

/// Best-effort, at-most-once topic fan-out
///
/// No ordering is promised between events or between subscribers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Backend behind this bus
    fn backend(&self) -> BusBackend;

    /// Hand an event to every current subscriber of its topic
    ///
    /// Returns once delivery has been started, never after handlers finish.
    async fn publish(&self, event: Event) -> BusResult<()>;

    /// Register a subscriber for one topic
    async fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> BusResult<Subscription>;

    /// Stop accepting events and drop every subscriber
    async fn close(&self) -> BusResult<()>;
}
