//! In-process event bus

use crate::bus::EventBus;
use crate::dispatch::{dispatch, SubscriberTable};
use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::factory::BusBackend;
use crate::subscriber::EventSubscriber;
use crate::subscription::Subscription;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bus whose subscribers live in this process
#[derive(Default)]
pub struct LocalBus {
    table: Arc<SubscriberTable>,
    closed: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.table.subscriber_count(topic)
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for LocalBus {
    fn backend(&self) -> BusBackend {
        BusBackend::Local
    }

    /// Must be polled inside a tokio runtime; subscribers run as spawned tasks
    async fn publish(&self, mut event: Event) -> BusResult<()> {
        self.ensure_open()?;

        // Local delivery always carries the publish time
        event.timestamp = Some(Utc::now());

        let subscribers = self.table.snapshot(&event.topic);
        tracing::debug!(
            topic = %event.topic,
            subscribers = subscribers.len(),
            "Publishing event"
        );
        dispatch(subscribers, event)
    }

    async fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> BusResult<Subscription> {
        self.ensure_open()?;

        let name = subscriber.name().to_string();
        let (id, _) = self.table.add(topic, subscriber);
        tracing::debug!(topic, subscriber = %name, id = %id, "Subscribed");

        let table = Arc::downgrade(&self.table);
        let owned_topic = topic.to_string();
        Ok(Subscription::new(id, topic, move || {
            table
                .upgrade()
                .map(|table| table.remove(&owned_topic, id).0)
                .unwrap_or(false)
        }))
    }

    async fn close(&self) -> BusResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.table.clear();
            tracing::debug!("Local bus closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::FnSubscriber;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn forwarder(name: &str, tx: mpsc::UnboundedSender<(String, Event)>) -> Arc<dyn EventSubscriber> {
        let tag = name.to_string();
        Arc::new(FnSubscriber::new(name, move |e: &Event| {
            let _ = tx.send((tag.clone(), e.clone()));
            Ok(())
        }))
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<(String, Event)>) -> (String, Event) {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe("graph.invalidate", forwarder("a", tx.clone())).await.unwrap();
        bus.subscribe("graph.invalidate", forwarder("b", tx.clone())).await.unwrap();
        bus.subscribe("other", forwarder("c", tx)).await.unwrap();

        bus.publish(Event::signal("graph.invalidate")).await.unwrap();

        let mut names = vec![recv(&mut rx).await.0, recv(&mut rx).await.0];
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_overrides_timestamp() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("t", forwarder("a", tx)).await.unwrap();

        let stale = Utc::now() - chrono::Duration::days(1);
        let before = Utc::now();
        bus.publish(Event::signal("t").with_timestamp(stale)).await.unwrap();

        let (_, event) = recv(&mut rx).await;
        assert!(event.timestamp.unwrap() >= before);
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_receives_nothing() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = bus.subscribe("t", forwarder("first", tx.clone())).await.unwrap();
        let _second = bus.subscribe("t", forwarder("second", tx)).await.unwrap();

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        assert_eq!(bus.subscriber_count("t"), 1);

        bus.publish(Event::signal("t")).await.unwrap();
        assert_eq!(recv(&mut rx).await.0, "second");
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe(
            "t",
            Arc::new(FnSubscriber::new("fails", |_: &Event| {
                Err(BusError::subscriber("fails", "boom"))
            })),
        )
        .await
        .unwrap();
        bus.subscribe(
            "t",
            Arc::new(FnSubscriber::new("panics", |_: &Event| -> Result<(), BusError> {
                panic!("handler panic")
            })),
        )
        .await
        .unwrap();
        bus.subscribe("t", forwarder("ok", tx)).await.unwrap();

        bus.publish(Event::signal("t")).await.unwrap();
        assert_eq!(recv(&mut rx).await.0, "ok");

        // Publisher is unaffected and can keep publishing
        bus.publish(Event::signal("t")).await.unwrap();
        assert_eq!(recv(&mut rx).await.0, "ok");
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_for_handlers() {
        let bus = LocalBus::new();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = parking_lot::Mutex::new(release_rx);

        struct Blocking(parking_lot::Mutex<std::sync::mpsc::Receiver<()>>);

        #[async_trait]
        impl EventSubscriber for Blocking {
            fn name(&self) -> &str {
                "blocking"
            }

            async fn handle(&self, _event: &Event) -> Result<(), BusError> {
                loop {
                    if self.0.lock().try_recv().is_ok() {
                        return Ok(());
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }

        bus.subscribe("t", Arc::new(Blocking(release_rx))).await.unwrap();
        timeout(Duration::from_millis(500), bus.publish(Event::signal("t")))
            .await
            .expect("publish blocked on handler")
            .unwrap();
        release_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_closed_bus_rejects_publish() {
        let bus = LocalBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.subscribe("t", forwarder("a", tx)).await.unwrap();

        bus.close().await.unwrap();
        assert_eq!(bus.subscriber_count("t"), 0);
        assert!(matches!(
            bus.publish(Event::signal("t")).await,
            Err(BusError::Closed)
        ));
    }
}
