//! Connection lifecycle for the presentation relay.
//!
//! Provides:
//! - Open/close of one logical WebSocket connection
//! - Fire-and-forget sends, accepted only while Open
//! - Bounded fixed-delay reconnect with a single pending timer
//!
//! Each socket gets a fresh generation number. Socket tasks report back
//! through the session queue tagged with that generation, and anything
//! tagged with an older generation is ignored, so superseded sockets can
//! never flip the state of the current one.

use std::sync::Arc;
use std::time::Duration;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as Frame;

use crate::config::SessionConfig;
use crate::event::{ConnectionEvent, EventSender, SessionEvent};
use crate::protocol::{Message, ProtocolError};

/// Outbound frames buffered per socket before sends start failing.
const OUTBOUND_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

/// What the controller learns from a [`ConnectionEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Socket is open; reconnect counter was reset
    Opened,
    /// One inbound text frame, still undecoded
    Frame(String),
    /// Socket closed; a reconnect is scheduled as attempt `next_attempt`
    Closed { next_attempt: u32 },
    /// A scheduled reconnect is now connecting
    Reconnecting { attempt: u32 },
    /// Attempts exhausted; nothing further is scheduled
    GaveUp { attempts: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Connection is not open (state: {0:?})")]
    NotOpen(ConnectionState),
    #[error("Outbound buffer is full")]
    Backpressure,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// An established bidirectional text-frame pipe.
///
/// Dropping `outbound` closes the underlying socket; `inbound` ends when
/// the peer closes.
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Something that can open a [`Link`] to a URL.
pub trait Transport: Send + Sync {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link, TransportError>> {
        let url = url.to_string();
        async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let (mut ws_writer, mut ws_reader) = ws_stream.split();

            let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

            // Writer task: forward outgoing channel to WebSocket, close when
            // the link owner drops its sender
            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if ws_writer.send(Frame::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_writer.close().await;
            });

            // Reader task: forward text frames until close
            tokio::spawn(async move {
                while let Some(frame) = ws_reader.next().await {
                    match frame {
                        Ok(Frame::Text(text)) => {
                            if in_tx.send(text.as_str().to_owned()).await.is_err() {
                                break;
                            }
                        }
                        Ok(Frame::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }
            });

            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}

/// Owns the one logical connection to the relay.
pub struct ConnectionManager {
    url: String,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,

    transport: Arc<dyn Transport>,
    events: EventSender,

    state: ConnectionState,
    /// Identity of the current socket
    generation: u64,
    /// Consecutive failed attempts since the last successful open
    attempts: u32,

    outbound: Option<mpsc::Sender<String>>,
    link_task: Option<JoinHandle<()>>,

    retry_timer: Option<JoinHandle<()>>,
    timer_seq: u64,
}

impl ConnectionManager {
    pub fn new(config: &SessionConfig, transport: Arc<dyn Transport>, events: EventSender) -> Self {
        Self {
            url: config.transport_url.clone(),
            reconnect_delay: config.reconnect_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
            transport,
            events,
            state: ConnectionState::Closed,
            generation: 0,
            attempts: 0,
            outbound: None,
            link_task: None,
            retry_timer: None,
            timer_seq: 0,
        }
    }

    /// Open a new socket, closing any socket that is Open or Connecting.
    pub fn open(&mut self) {
        self.cancel_retry();
        self.supersede();

        self.state = if self.attempts == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };

        let generation = self.generation;
        let events = self.events.clone();
        let connecting = self.transport.connect(&self.url);
        log::info!("Connecting to {} (generation {generation})", self.url);

        self.link_task = Some(tokio::spawn(async move {
            let post = |event| events.send(SessionEvent::Connection(event)).is_ok();
            match connecting.await {
                Ok(Link { outbound, mut inbound }) => {
                    if !post(ConnectionEvent::Opened { generation, outbound }) {
                        return;
                    }
                    while let Some(text) = inbound.recv().await {
                        if !post(ConnectionEvent::Frame { generation, text }) {
                            return;
                        }
                    }
                    post(ConnectionEvent::Closed {
                        generation,
                        reason: None,
                    });
                }
                Err(e) => {
                    post(ConnectionEvent::Closed {
                        generation,
                        reason: Some(e.to_string()),
                    });
                }
            }
        }));
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&mut self) {
        self.cancel_retry();
        self.supersede();
        self.state = ConnectionState::Closed;
        log::info!("Connection closed by client");
    }

    /// Send one message. Dropped with an error unless Open.
    pub fn send(&self, msg: &Message) -> Result<(), SendError> {
        let outbound = match (&self.outbound, self.state) {
            (Some(tx), ConnectionState::Open) => tx,
            _ => {
                log::warn!("Dropping {} while {:?}", msg.kind(), self.state);
                return Err(SendError::NotOpen(self.state));
            }
        };
        let text = msg.encode()?;
        outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SendError::ConnectionClosed,
        })
    }

    /// Apply a lifecycle event from a socket task or timer.
    pub fn handle(&mut self, event: ConnectionEvent) -> Option<LinkEvent> {
        match event {
            ConnectionEvent::Opened { generation, outbound } => {
                if generation != self.generation {
                    log::warn!("Ignoring open from superseded socket {generation}");
                    return None;
                }
                self.state = ConnectionState::Open;
                self.attempts = 0;
                self.outbound = Some(outbound);
                log::info!("Connected to {}", self.url);
                Some(LinkEvent::Opened)
            }

            ConnectionEvent::Frame { generation, text } => {
                if generation != self.generation {
                    log::warn!("Ignoring frame from superseded socket {generation}");
                    return None;
                }
                log::trace!("Frame: {text}");
                Some(LinkEvent::Frame(text))
            }

            ConnectionEvent::Closed { generation, reason } => {
                if generation != self.generation {
                    return None;
                }
                self.outbound = None;
                self.link_task = None;

                if let Some(reason) = reason {
                    log::warn!("Connection to {} failed: {reason}", self.url);
                }

                if self.attempts < self.max_reconnect_attempts {
                    self.attempts += 1;
                    self.state = ConnectionState::Reconnecting;
                    self.schedule_retry();
                    log::info!(
                        "Connection lost, reconnect {}/{} in {:?}",
                        self.attempts,
                        self.max_reconnect_attempts,
                        self.reconnect_delay
                    );
                    Some(LinkEvent::Closed {
                        next_attempt: self.attempts,
                    })
                } else {
                    self.state = ConnectionState::Closed;
                    log::error!(
                        "Giving up on {} after {} reconnect attempts",
                        self.url,
                        self.attempts
                    );
                    Some(LinkEvent::GaveUp {
                        attempts: self.attempts,
                    })
                }
            }

            ConnectionEvent::RetryDue { timer } => {
                if timer != self.timer_seq || self.retry_timer.is_none() {
                    return None;
                }
                self.retry_timer = None;
                self.open();
                Some(LinkEvent::Reconnecting {
                    attempt: self.attempts,
                })
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Current reconnect counter.
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether a reconnect timer is pending.
    pub fn retry_pending(&self) -> bool {
        self.retry_timer.is_some()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Retire the current socket: later events from it are stale.
    fn supersede(&mut self) {
        self.generation += 1;
        self.outbound = None;
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
    }

    fn schedule_retry(&mut self) {
        self.cancel_retry();
        self.timer_seq += 1;
        let timer = self.timer_seq;
        let delay = self.reconnect_delay;
        let events = self.events.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::Connection(ConnectionEvent::RetryDue { timer }));
        }));
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_retry();
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
    }
}
