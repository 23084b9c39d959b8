//! WebSocket relay for presentation sessions.
//!
//! Architecture:
//! ```text
//! Presenter ──┐                         ┌──► Presenter (echo)
//!             ├── RelayServer ── Room ──┼──► Viewer A
//! Viewer A ───┤     │                   └──► Viewer B
//! Viewer B ───┘     └── Presentation {presenter, document, page}
//! ```
//!
//! The relay is the authority for who presents and what is shown:
//! - `auth` with the shared credential claims the presenter role
//!   (first claim wins, released when that client disconnects)
//! - `page_change` / `new_pdf` are accepted from the presenter only, then
//!   remembered and broadcast to every client, sender included
//! - every join and leave broadcasts `user_count`
//! - a joining client is sent the current document and page

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, ClientInfo, Frame};
use crate::config::{self, ConfigError};
use crate::protocol::{Message, ProtocolError};

pub const INVALID_CREDENTIALS: &str = "Invalid admin credentials";
pub const PRESENTER_TAKEN: &str = "Another client is already presenting";
pub const SERVER_FULL: &str = "Server is full";

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    /// Shared presenter credential; empty rejects every claim
    pub credential: String,
    pub max_clients: usize,
    /// Frames buffered per client before a slow client starts skipping
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            credential: String::new(),
            max_clients: 100,
            broadcast_capacity: 256,
        }
    }
}

impl RelayConfig {
    /// Defaults overlaid with `PODIUM_RELAY_*` (and `PODIUM_CREDENTIAL`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("PODIUM_RELAY_BIND") {
            config.bind_addr = v;
        }
        if let Some(v) = lookup("PODIUM_CREDENTIAL") {
            config.credential = v;
        }
        if let Some(v) = lookup("PODIUM_RELAY_MAX_CLIENTS") {
            config.max_clients = config::parse("PODIUM_RELAY_MAX_CLIENTS", &v)?;
        }
        if let Some(v) = lookup("PODIUM_RELAY_BROADCAST_CAPACITY") {
            config.broadcast_capacity = config::parse("PODIUM_RELAY_BROADCAST_CAPACITY", &v)?;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub refused_connections: u64,
    pub total_messages: u64,
    /// Messages from non-presenters or with bad credentials
    pub rejected_messages: u64,
}

/// Authoritative presentation state held by the relay.
#[derive(Debug, Clone, Default)]
struct Presentation {
    presenter: Option<Uuid>,
    document: Option<String>,
    page: u32,
}

impl Presentation {
    fn replay(&self) -> Option<Message> {
        self.document
            .as_ref()
            .map(|filename| Message::new_pdf(filename.as_str(), self.page.max(1)))
    }
}

struct Room {
    broadcast: BroadcastGroup,
    presentation: RwLock<Presentation>,
}

pub struct RelayServer {
    config: RelayConfig,
    room: Arc<Room>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        if config.credential.is_empty() {
            log::warn!("No presenter credential configured; presenter claims will be rejected");
        }
        let room = Arc::new(Room {
            broadcast: BroadcastGroup::new(config.broadcast_capacity),
            presentation: RwLock::new(Presentation::default()),
        });
        Self {
            config,
            room,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address and serve until an accept error.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        log::info!("Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let room = self.room.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, room, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Subscribe a client and read the replay, or refuse when full.
    ///
    /// Runs under the presentation write lock: the capacity check and the
    /// subscription are atomic against other joins, and nothing broadcast in
    /// between is missed or duplicated.
    async fn admit(
        room: &Room,
        info: ClientInfo,
        max_clients: usize,
    ) -> Option<(broadcast::Receiver<Frame>, Option<Message>)> {
        let presentation = room.presentation.write().await;
        if room.broadcast.client_count().await >= max_clients {
            return None;
        }
        let rx = room.broadcast.add_client(info).await;
        Some((rx, presentation.replay()))
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        room: Arc<Room>,
        stats: Arc<RwLock<ServerStats>>,
        config: RelayConfig,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let info = ClientInfo::new(addr);
        let client_id = info.client_id;

        let Some((mut broadcast_rx, replay)) = Self::admit(&room, info, config.max_clients).await else {
            log::warn!("Refusing {addr}: {} clients connected", config.max_clients);
            stats.write().await.refused_connections += 1;
            let refusal = Message::error(SERVER_FULL).encode()?;
            ws_sender.send(WsMessage::Text(refusal.into())).await?;
            ws_sender.close().await?;
            return Ok(());
        };

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }
        log::info!("Client {client_id} connected from {addr}");

        let result = Self::serve_client(
            client_id,
            &mut ws_sender,
            &mut ws_receiver,
            &mut broadcast_rx,
            replay,
            &room,
            &stats,
            &config,
        )
        .await;

        // Cleanup runs whether the client left cleanly or errored
        room.broadcast.remove_client(&client_id).await;
        {
            let mut presentation = room.presentation.write().await;
            if presentation.presenter == Some(client_id) {
                presentation.presenter = None;
                log::info!("Presenter {client_id} left, role released");
            }
        }
        Self::broadcast_user_count(&room).await;
        stats.write().await.active_connections -= 1;
        log::info!("Client {client_id} disconnected");

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn serve_client<S, R>(
        client_id: Uuid,
        ws_sender: &mut S,
        ws_receiver: &mut R,
        broadcast_rx: &mut broadcast::Receiver<Frame>,
        replay: Option<Message>,
        room: &Room,
        stats: &RwLock<ServerStats>,
        config: &RelayConfig,
    ) -> Result<(), ServerError>
    where
        S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        if let Some(replay) = replay {
            ws_sender.send(WsMessage::Text(replay.encode()?.into())).await?;
        }
        Self::broadcast_user_count(room).await;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            stats.write().await.total_messages += 1;
                            match Message::decode(text.as_str()) {
                                Ok(msg) => {
                                    if let Some(reply) =
                                        Self::handle_message(client_id, msg, room, stats, config).await
                                    {
                                        ws_sender.send(WsMessage::Text(reply.encode()?.into())).await?;
                                    }
                                }
                                Err(e) => log::warn!("Dropping frame from {client_id}: {e}"),
                            }
                        }

                        Some(Ok(WsMessage::Ping(data))) => {
                            ws_sender.send(WsMessage::Pong(data)).await?;
                        }

                        Some(Ok(WsMessage::Close(_))) | None => break,

                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {client_id}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                frame = broadcast_rx.recv() => {
                    match frame {
                        Ok(frame) => {
                            ws_sender.send(WsMessage::Text(frame.to_string().into())).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Client {client_id} lagged by {n} frames");
                            room.broadcast.record_dropped(n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply one decoded client message; returns a direct reply, if any.
    async fn handle_message(
        client_id: Uuid,
        msg: Message,
        room: &Room,
        stats: &RwLock<ServerStats>,
        config: &RelayConfig,
    ) -> Option<Message> {
        match msg {
            Message::Auth { password } => {
                if config.credential.is_empty() || password != config.credential {
                    log::warn!("Client {client_id} sent invalid credentials");
                    stats.write().await.rejected_messages += 1;
                    return Some(Message::error(INVALID_CREDENTIALS));
                }
                let mut presentation = room.presentation.write().await;
                match presentation.presenter {
                    Some(current) if current != client_id => {
                        stats.write().await.rejected_messages += 1;
                        Some(Message::error(PRESENTER_TAKEN))
                    }
                    _ => {
                        presentation.presenter = Some(client_id);
                        log::info!("Client {client_id} is now presenting");
                        Some(Message::AdminStatus { is_presenter: true })
                    }
                }
            }

            Message::PageChange { page } => {
                let mut presentation = room.presentation.write().await;
                if presentation.presenter != Some(client_id) {
                    log::warn!("Ignoring page_change from non-presenter {client_id}");
                    stats.write().await.rejected_messages += 1;
                    return None;
                }
                presentation.page = page;
                if let Err(e) = room.broadcast.broadcast(&Message::page_change(page)) {
                    log::error!("Failed to broadcast page_change: {e}");
                }
                None
            }

            Message::NewPdf {
                filename,
                current_page,
            } => {
                let mut presentation = room.presentation.write().await;
                if presentation.presenter != Some(client_id) {
                    log::warn!("Ignoring new_pdf from non-presenter {client_id}");
                    stats.write().await.rejected_messages += 1;
                    return None;
                }
                log::info!("Presenting {filename} from page {current_page}");
                let announce = Message::new_pdf(filename.as_str(), current_page);
                presentation.document = Some(filename);
                presentation.page = current_page;
                if let Err(e) = room.broadcast.broadcast(&announce) {
                    log::error!("Failed to broadcast new_pdf: {e}");
                }
                None
            }

            other => {
                log::debug!("Ignoring {} from client {client_id}", other.kind());
                None
            }
        }
    }

    async fn broadcast_user_count(room: &Room) {
        let count = room.broadcast.client_count().await as u32;
        if let Err(e) = room.broadcast.broadcast(&Message::UserCount { count }) {
            log::error!("Failed to broadcast user_count: {e}");
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}
