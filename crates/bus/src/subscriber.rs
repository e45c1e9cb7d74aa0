//! Event subscriber trait for async event handling

use crate::error::BusError;
use crate::event::Event;
use async_trait::async_trait;

/// Trait for event subscribers
///
/// Each delivery runs in its own task, so a slow or failing subscriber never
/// holds up the publisher or its siblings.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Get the subscriber name (for logging)
    fn name(&self) -> &str;

    /// Handle one event
    async fn handle(&self, event: &Event) -> Result<(), BusError>;
}

/// Subscriber backed by a closure
pub struct FnSubscriber<F> {
    name: String,
    f: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&Event) -> Result<(), BusError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> EventSubscriber for FnSubscriber<F>
where
    F: Fn(&Event) -> Result<(), BusError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<(), BusError> {
        (self.f)(event)
    }
}
