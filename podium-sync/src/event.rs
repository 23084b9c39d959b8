//! The session event queue.
//!
//! Every asynchronous completion (socket opened, frame received, socket
//! closed, reconnect timer fired, document loaded, page rendered, upload
//! finished) is posted as a [`SessionEvent`] onto one unbounded channel.
//! The [`PresentationController`] is its only consumer, so all state
//! mutation happens on a single logical queue in arrival order.
//!
//! [`PresentationController`]: crate::controller::PresentationController

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::render::{Bitmap, PdfDocument, RenderError, RenderTicket};
use crate::state::DocumentRef;
use crate::upload::UploadError;

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the session queue.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug)]
pub enum SessionEvent {
    Connection(ConnectionEvent),
    Render(RenderEvent),
    Upload(UploadEvent),
}

/// Raw lifecycle events from connection tasks.
///
/// `generation` identifies the socket that produced the event; events from
/// a superseded socket are ignored by the [`ConnectionManager`].
///
/// [`ConnectionManager`]: crate::connection::ConnectionManager
#[derive(Debug)]
pub enum ConnectionEvent {
    Opened {
        generation: u64,
        outbound: mpsc::Sender<String>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
        reason: Option<String>,
    },
    /// The reconnect timer identified by `timer` elapsed
    RetryDue { timer: u64 },
}

/// Completions from the rasterizer, tagged with what they were started for.
#[derive(Debug)]
pub enum RenderEvent {
    Loaded {
        document: DocumentRef,
        result: Result<Arc<dyn PdfDocument>, RenderError>,
    },
    Rendered {
        ticket: RenderTicket,
        result: Result<Bitmap, RenderError>,
    },
}

#[derive(Debug)]
pub enum UploadEvent {
    /// Upload completed; `Ok` carries the server-generated filename
    Finished { result: Result<String, UploadError> },
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}
