//! Fan-out of relay frames to every connected client.
//!
//! One tokio broadcast channel per relay; each client holds its own
//! receiver buffering up to `capacity` frames. Frames are encoded once and
//! shared as `Arc<str>`, so fan-out cost does not grow with message size.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{Message, ProtocolError};

/// One encoded JSON text frame.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_clients: usize,
}

struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// A connected relay client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: Uuid,
    pub addr: SocketAddr,
}

impl ClientInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            addr,
        }
    }
}

pub struct BroadcastGroup {
    sender: broadcast::Sender<Frame>,
    clients: Arc<RwLock<HashMap<Uuid, ClientInfo>>>,
    capacity: usize,
    stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` frames may queue per client before a slow client starts
    /// losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            clients: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            stats: Arc::new(AtomicBroadcastStats {
                messages_sent: AtomicU64::new(0),
                messages_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a client and return its receiver.
    pub async fn add_client(&self, info: ClientInfo) -> broadcast::Receiver<Frame> {
        let mut clients = self.clients.write().await;
        clients.insert(info.client_id, info);
        self.sender.subscribe()
    }

    pub async fn remove_client(&self, client_id: &Uuid) -> Option<ClientInfo> {
        self.clients.write().await.remove(client_id)
    }

    /// Encode `msg` once and send it to every client, sender included.
    ///
    /// Returns the number of receivers reached.
    pub fn broadcast(&self, msg: &Message) -> Result<usize, ProtocolError> {
        let frame: Frame = msg.encode()?.into();
        Ok(self.broadcast_raw(frame))
    }

    pub fn broadcast_raw(&self, frame: Frame) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging receiver skipped.
    pub fn record_dropped(&self, count: u64) {
        self.stats.messages_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn has_client(&self, client_id: &Uuid) -> bool {
        self.clients.read().await.contains_key(client_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_clients: self.client_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
