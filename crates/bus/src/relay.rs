//! TCP relay fanning bus frames between processes
//!
//! Every connected peer gets a writer task fed by an unbounded channel. A
//! `publish` from any peer is delivered to every peer subscribed to the topic,
//! the publisher included.

use crate::error::{BusError, BusResult};
use crate::frame::{read_frame, Frame};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

struct Peer {
    addr: SocketAddr,
    sender: mpsc::UnboundedSender<String>,
    topics: HashSet<String>,
}

/// Connected peers, shared by every connection task
#[derive(Clone, Default)]
struct Peers {
    inner: Arc<RwLock<HashMap<Uuid, Peer>>>,
}

impl Peers {
    async fn add(&self, id: Uuid, peer: Peer) {
        self.inner.write().await.insert(id, peer);
    }

    async fn remove(&self, id: &Uuid) -> Option<Peer> {
        self.inner.write().await.remove(id)
    }

    async fn set_subscribed(&self, id: &Uuid, topic: &str, subscribed: bool) {
        if let Some(peer) = self.inner.write().await.get_mut(id) {
            if subscribed {
                peer.topics.insert(topic.to_string());
            } else {
                peer.topics.remove(topic);
            }
        }
    }

    async fn send_to(&self, id: &Uuid, line: String) -> bool {
        match self.inner.read().await.get(id) {
            Some(peer) => peer.sender.send(line).is_ok(),
            None => false,
        }
    }

    /// Queue a line for every peer subscribed to `topic`; returns the count
    async fn deliver(&self, topic: &str, line: &str) -> usize {
        let peers = self.inner.read().await;
        peers
            .values()
            .filter(|peer| peer.topics.contains(topic))
            .filter(|peer| peer.sender.send(line.to_string()).is_ok())
            .count()
    }

    async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

pub struct BusRelay {
    listener: TcpListener,
    peers: Peers,
}

impl BusRelay {
    /// Bind the listening socket
    pub async fn bind(addr: impl ToSocketAddrs) -> BusResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            peers: Peers::default(),
        })
    }

    pub fn local_addr(&self) -> BusResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is cancelled
    pub async fn run(self) -> BusResult<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "Bus relay listening");

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(error = %e, "Relay accept failed");
                    continue;
                }
            };

            let peers = self.peers.clone();
            tokio::spawn(async move {
                handle_connection(stream, addr, peers).await;
            });
        }
    }

    /// Run on the current runtime
    pub fn spawn(self) -> BusResult<RelayHandle> {
        let addr = self.local_addr()?;
        let peers = self.peers.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!(error = %e, "Bus relay stopped");
            }
        });
        Ok(RelayHandle { addr, peers, task })
    }
}

/// Background relay
pub struct RelayHandle {
    addr: SocketAddr,
    peers: Peers,
    task: JoinHandle<()>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.count().await
    }

    /// Stop accepting connections
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
        tracing::info!(addr = %self.addr, "Bus relay shut down");
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, peers: Peers) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let id = Uuid::new_v4();
    peers
        .add(
            id,
            Peer {
                addr,
                sender: tx,
                topics: HashSet::new(),
            },
        )
        .await;
    tracing::info!(peer = %addr, "Relay peer connected");

    let send_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                tracing::warn!(peer = %addr, error = %e, "Relay write failed");
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(BusError::Codec(e)) => {
                tracing::warn!(peer = %addr, error = %e, "Ignoring malformed frame");
                continue;
            }
            Err(e) => {
                tracing::error!(peer = %addr, error = %e, "Relay read failed");
                break;
            }
        };

        match frame {
            Frame::Subscribe { topic } => {
                peers.set_subscribed(&id, &topic, true).await;
                tracing::debug!(peer = %addr, topic = %topic, "Peer subscribed");
                if let Ok(line) = (Frame::Subscribed { topic }).encode() {
                    peers.send_to(&id, line).await;
                }
            }
            Frame::Unsubscribe { topic } => {
                peers.set_subscribed(&id, &topic, false).await;
                tracing::debug!(peer = %addr, topic = %topic, "Peer unsubscribed");
            }
            Frame::Publish { event } => {
                let topic = event.topic.clone();
                match (Frame::Deliver { event }).encode() {
                    Ok(line) => {
                        let delivered = peers.deliver(&topic, &line).await;
                        tracing::debug!(peer = %addr, topic = %topic, delivered, "Relayed event");
                    }
                    Err(e) => {
                        tracing::warn!(peer = %addr, topic = %topic, error = %e, "Dropping event");
                    }
                }
            }
            other => {
                tracing::warn!(peer = %addr, frame = ?other, "Unexpected frame from peer");
            }
        }
    }

    if let Some(peer) = peers.remove(&id).await {
        tracing::info!(peer = %peer.addr, topics = peer.topics.len(), "Relay peer disconnected");
    }
    send_task.abort();
}
