//! # podium-sync: Real-time presentation sync
//!
//! One presenter drives a shared PDF; every connected viewer follows the
//! current document and page through a WebSocket relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────┐   WebSocket    ┌─────────────┐
//! │ PresentationController │ ◄────────────► │ RelayServer │
//! │ (per viewer/presenter) │   JSON frames  │ (central)   │
//! └───────────┬────────────┘                └──────┬──────┘
//!             │                                    │
//!     ┌───────┼──────────┐                 ┌───────┴───────┐
//!     ▼       ▼          ▼                 │ BroadcastGroup│
//! SyncState  Render    Connection          │ (fan-out)     │
//!  Store   Coordinator  Manager            └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages, one per text frame
//! - [`connection`]: socket lifecycle with bounded reconnect
//! - [`state`]: client-local view of the shared presentation
//! - [`render`]: last-request-wins rendering over a pluggable rasterizer
//! - [`upload`]: upload validation and the uploader seam
//! - [`controller`]: the session event loop
//! - [`broadcast`] / [`server`]: the relay

pub mod config;
pub mod event;
pub mod protocol;
pub mod connection;
pub mod state;
pub mod render;
pub mod upload;
pub mod controller;
pub mod broadcast;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use config::{ConfigError, SessionConfig, ZoomLimits};
pub use connection::{ConnectionManager, ConnectionState, Link, Transport, WsTransport};
pub use controller::{Intent, IntentError, Phase, PresentationController};
pub use event::{Notice, NoticeLevel};
pub use protocol::{Message, ProtocolError};
pub use render::{Bitmap, PdfDocument, Rasterizer, RenderError, Scale};
pub use server::{RelayConfig, RelayServer, ServerError};
pub use state::{DocumentRef, SyncStateStore};
pub use upload::{PdfFile, UploadError, Uploader};
