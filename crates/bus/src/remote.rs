//! Event bus client connected to a [`BusRelay`](crate::relay::BusRelay)

use crate::bus::EventBus;
use crate::dispatch::{dispatch, SubscriberTable};
use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::factory::BusBackend;
use crate::frame::{read_frame, Frame};
use crate::subscriber::EventSubscriber;
use crate::subscription::{Subscription, SubscriptionId};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// How long `subscribe` waits for the relay to register a topic
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A line queued for the socket, optionally acknowledged once written
struct Outbound {
    line: String,
    written: Option<oneshot::Sender<bool>>,
}

struct RemoteInner {
    table: SubscriberTable,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Relay registration per topic with local subscribers; `true` once acked
    ///
    /// Held while a topic's first subscriber is added or its last one is
    /// removed, and while the matching frame is queued, so `subscribe` and
    /// `unsubscribe` frames leave in the order the table changed.
    registrations: Mutex<HashMap<String, watch::Receiver<bool>>>,
    /// One acknowledgement slot per queued `subscribe` frame, per topic in send order
    pending: Mutex<HashMap<String, VecDeque<watch::Sender<bool>>>>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl RemoteInner {
    fn ensure_usable(&self) -> BusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(BusError::ConnectionLost);
        }
        Ok(())
    }

    fn send(&self, frame: &Frame) -> BusResult<oneshot::Receiver<bool>> {
        let (tx, rx) = oneshot::channel();
        self.outbound
            .send(Outbound {
                line: frame.encode()?,
                written: Some(tx),
            })
            .map_err(|_| BusError::ConnectionLost)?;
        Ok(rx)
    }

    fn send_detached(&self, frame: &Frame) {
        match frame.encode() {
            Ok(line) => {
                let _ = self.outbound.send(Outbound {
                    line,
                    written: None,
                });
            }
            Err(e) => tracing::warn!(error = %e, "Dropping outbound frame"),
        }
    }

    /// Drop one subscriber; the last one for a topic unregisters it at the relay
    fn release(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut registrations = self.registrations.lock();
        let (removed, now_empty) = self.table.remove(topic, id);
        if now_empty {
            registrations.remove(topic);
            self.send_detached(&Frame::Unsubscribe {
                topic: topic.to_string(),
            });
        }
        removed
    }

    fn lost(&self) {
        self.connected.store(false, Ordering::Release);
        // Dropping the waiters wakes every pending subscribe with an error
        self.pending.lock().clear();
    }
}

/// Bus that publishes and receives through a TCP relay
pub struct RemoteBus {
    inner: Arc<RemoteInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RemoteBus {
    /// Connect to a relay at `host:port`
    pub async fn connect(addr: &str) -> BusResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| BusError::BackendUnavailable(format!("tcp relay {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(RemoteInner {
            table: SubscriberTable::default(),
            outbound: tx,
            registrations: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        let writer = tokio::spawn(write_loop(write_half, rx));
        let reader = tokio::spawn(read_loop(read_half, inner.clone()));

        tracing::info!(relay = %addr, "Connected to bus relay");
        Ok(Self {
            inner,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.table.subscriber_count(topic)
    }

    fn stop_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for RemoteBus {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

#[async_trait]
impl EventBus for RemoteBus {
    fn backend(&self) -> BusBackend {
        BusBackend::Tcp
    }

    async fn publish(&self, mut event: Event) -> BusResult<()> {
        self.inner.ensure_usable()?;

        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }
        let topic = event.topic.clone();

        let written = self.inner.send(&Frame::Publish { event })?;
        match written.await {
            Ok(true) => {
                tracing::debug!(topic = %topic, "Published event to relay");
                Ok(())
            }
            _ => Err(BusError::ConnectionLost),
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> BusResult<Subscription> {
        self.inner.ensure_usable()?;

        let name = subscriber.name().to_string();
        let (id, mut registered) = {
            let mut registrations = self.inner.registrations.lock();
            let (id, first) = self.inner.table.add(topic, subscriber);

            if first {
                let (ack_tx, ack_rx) = watch::channel(false);
                self.inner
                    .pending
                    .lock()
                    .entry(topic.to_string())
                    .or_default()
                    .push_back(ack_tx);

                let queued = self.inner.send(&Frame::Subscribe {
                    topic: topic.to_string(),
                });
                if queued.is_err() {
                    // Nothing was queued, so no acknowledgement will come
                    if let Some(waiters) = self.inner.pending.lock().get_mut(topic) {
                        waiters.pop_back();
                    }
                    self.inner.table.remove(topic, id);
                    return Err(BusError::ConnectionLost);
                }
                registrations.insert(topic.to_string(), ack_rx.clone());
                (id, ack_rx)
            } else {
                match registrations.get(topic) {
                    Some(rx) => (id, rx.clone()),
                    None => {
                        self.inner.table.remove(topic, id);
                        return Err(BusError::ConnectionLost);
                    }
                }
            }
        };

        // Later subscribers wait on the same acknowledgement as the first
        let acked = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
            registered.wait_for(|acked| *acked).await.is_ok()
        })
        .await
        .unwrap_or(false);
        if !acked {
            self.inner.release(topic, id);
            tracing::warn!(topic, subscriber = %name, "Relay did not acknowledge subscription");
            return Err(BusError::ConnectionLost);
        }
        tracing::debug!(topic, subscriber = %name, id = %id, "Subscribed via relay");

        let inner = Arc::downgrade(&self.inner);
        let owned_topic = topic.to_string();
        Ok(Subscription::new(id, topic, move || {
            inner
                .upgrade()
                .map(|inner| inner.release(&owned_topic, id))
                .unwrap_or(false)
        }))
    }

    async fn close(&self) -> BusResult<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            {
                let mut registrations = self.inner.registrations.lock();
                self.inner.table.clear();
                registrations.clear();
            }
            self.stop_tasks();
            self.inner.lost();
            tracing::info!("Remote bus closed");
        }
        Ok(())
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        let ok = match write_half.write_all(out.line.as_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Relay write failed");
                false
            }
        };
        if let Some(written) = out.written {
            let _ = written.send(ok);
        }
        if !ok {
            break;
        }
    }
}

async fn read_loop(read_half: OwnedReadHalf, inner: Arc<RemoteInner>) {
    let mut reader = BufReader::new(read_half);
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::warn!("Bus relay closed the connection");
                break;
            }
            Err(BusError::Codec(e)) => {
                tracing::warn!(error = %e, "Ignoring malformed frame from relay");
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "Relay read failed");
                break;
            }
        };

        match frame {
            Frame::Deliver { event } => {
                let subscribers = inner.table.snapshot(&event.topic);
                dispatch(subscribers, event);
            }
            Frame::Subscribed { topic } => {
                let waiter = {
                    let mut pending = inner.pending.lock();
                    let waiter = pending.get_mut(&topic).and_then(VecDeque::pop_front);
                    if pending.get(&topic).is_some_and(VecDeque::is_empty) {
                        pending.remove(&topic);
                    }
                    waiter
                };
                if let Some(waiter) = waiter {
                    let _ = waiter.send(true);
                }
            }
            other => {
                tracing::warn!(frame = ?other, "Unexpected frame from relay");
            }
        }
    }
    inner.lost();
}
