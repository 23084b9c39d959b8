//! Presentation controller: the session's single event loop.
//!
//! Turns user intents into protocol messages and turns session events into
//! state updates and render requests:
//!
//! ```text
//!  Intent ──► PresentationController ──► ConnectionManager ──► relay
//!                   ▲          │
//!   SessionEvent ───┘          ├──► SyncStateStore
//!   (socket, timer,            └──► RenderCoordinator ──► Rasterizer
//!    render, upload)
//! ```
//!
//! Document phases:
//!
//! ```text
//! NoDocument ──upload ok──► Loading ──load ok──► Ready(page, presenter)
//! Ready ──inbound new_pdf──► Loading ──load ok──► Ready(new page)
//! Loading ──load failed──► previous phase (state rolled back)
//! ```
//!
//! The relay is the sole authority: inbound `page_change`/`admin_status`
//! are applied without client-side verification. Local page changes are
//! filtered before anything is sent.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::connection::{ConnectionManager, ConnectionState, LinkEvent, SendError, Transport};
use crate::event::{
    self, EventReceiver, EventSender, Notice, SessionEvent, UploadEvent,
};
use crate::protocol::Message;
use crate::render::{
    Rasterizer, RenderCoordinator, RenderOutcome, RenderTicket, Scale, Surface,
};
use crate::state::{DocumentRef, DocumentSnapshot, StateChange, SyncStateStore};
use crate::upload::{self, PdfFile, UploadError, Uploader};

/// Externally visible phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoDocument,
    Loading,
    Ready { page: u32, is_presenter: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    NoDocument,
    Loading,
    Ready,
}

/// Where to return if the pending load fails.
#[derive(Debug, Clone)]
struct Fallback {
    snapshot: DocumentSnapshot,
    stage: Stage,
}

/// User intents accepted by [`PresentationController::run`].
#[derive(Debug)]
pub enum Intent {
    ChangePage(u32),
    NextPage,
    PreviousPage,
    /// Claim the presenter role; `None` uses the configured credential
    ClaimPresenter(Option<String>),
    Upload(PdfFile),
    ZoomIn,
    ZoomOut,
    SetZoom(f32),
    Reconnect,
    Shutdown,
}

/// Why an intent was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntentError {
    #[error("Only the presenter can do that")]
    NotPresenter,
    #[error("Already presenting")]
    AlreadyPresenter,
    #[error("No document is ready")]
    NoDocument,
    #[error("Page {page} is outside 1..={page_count}")]
    OutOfRange { page: u32, page_count: u32 },
    #[error("Already on page {0}")]
    Unchanged(u32),
    #[error("An upload is already in progress")]
    UploadInFlight,
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Send(#[from] SendError),
}

pub struct PresentationController {
    config: SessionConfig,
    connection: ConnectionManager,
    store: SyncStateStore,
    renderer: RenderCoordinator,
    uploader: Arc<dyn Uploader>,

    scale: Scale,
    stage: Stage,
    fallback: Option<Fallback>,
    /// Uploaded document to announce once it has loaded locally
    announce: Option<DocumentRef>,
    /// Tell a viewer when the pending remote document is ready
    notify_loaded: bool,
    upload_in_flight: bool,

    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    notice_tx: mpsc::UnboundedSender<Notice>,
    notice_rx: Option<mpsc::UnboundedReceiver<Notice>>,
}

impl PresentationController {
    pub fn new(
        config: &SessionConfig,
        transport: Arc<dyn Transport>,
        rasterizer: Arc<dyn Rasterizer>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        let (events_tx, events_rx) = event::channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        Self {
            config: config.clone(),
            connection: ConnectionManager::new(config, transport, events_tx.clone()),
            store: SyncStateStore::new(),
            renderer: RenderCoordinator::new(config, rasterizer, events_tx.clone()),
            uploader,
            scale: Scale::ACTUAL_SIZE.clamped(&config.zoom),
            stage: Stage::NoDocument,
            fallback: None,
            announce: None,
            notify_loaded: false,
            upload_in_flight: false,
            events_tx,
            events_rx: Some(events_rx),
            notice_tx,
            notice_rx: Some(notice_rx),
        }
    }

    /// Take the notice receiver (can only be called once).
    pub fn take_notice_rx(&mut self) -> Option<mpsc::UnboundedReceiver<Notice>> {
        self.notice_rx.take()
    }

    /// Open the connection to the relay.
    pub fn start(&mut self) {
        self.connection.open();
    }

    /// Run the event loop until `Shutdown` or the intent channel closes.
    pub async fn run(mut self, mut intents: mpsc::Receiver<Intent>) {
        let Some(mut events) = self.events_rx.take() else {
            log::error!("Event queue already taken");
            return;
        };
        self.start();

        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event),
                intent = intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => {
                        if let Err(e) = self.dispatch(intent) {
                            log::debug!("Intent refused: {e}");
                        }
                    }
                },
            }
        }

        self.connection.close();
    }

    /// Wait for and handle one session event. Returns `false` once the
    /// queue is gone.
    pub async fn process_next(&mut self) -> bool {
        let event = match self.events_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => return false,
        };
        match event {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    pub fn dispatch(&mut self, intent: Intent) -> Result<(), IntentError> {
        match intent {
            Intent::ChangePage(page) => self.change_page(page),
            Intent::NextPage => self.next_page(),
            Intent::PreviousPage => self.previous_page(),
            Intent::ClaimPresenter(credential) => self.claim_presenter(credential),
            Intent::Upload(file) => self.upload(file),
            Intent::ZoomIn => {
                self.zoom_in();
                Ok(())
            }
            Intent::ZoomOut => {
                self.zoom_out();
                Ok(())
            }
            Intent::SetZoom(factor) => {
                self.set_zoom(factor);
                Ok(())
            }
            Intent::Reconnect => {
                self.connection.open();
                Ok(())
            }
            Intent::Shutdown => {
                self.connection.close();
                Ok(())
            }
        }
    }

    // ─── Intents ─────────────────────────────────────────────────

    /// Move the shared presentation to `page`.
    ///
    /// Refused without any state change or message unless this client is
    /// presenter, a document is ready, and `page` is a different page
    /// within the document.
    pub fn change_page(&mut self, page: u32) -> Result<(), IntentError> {
        if !self.store.is_presenter() {
            return Err(IntentError::NotPresenter);
        }
        let page_count = match (self.stage, self.store.page_count()) {
            (Stage::Ready, Some(count)) => count,
            _ => return Err(IntentError::NoDocument),
        };
        if page == 0 || page > page_count {
            self.notify(Notice::error(format!(
                "Page {page} does not exist (1-{page_count})"
            )));
            return Err(IntentError::OutOfRange { page, page_count });
        }
        if page == self.store.page() {
            return Err(IntentError::Unchanged(page));
        }

        self.store.set_page(page);
        self.render_current();
        if let Err(e) = self.connection.send(&Message::page_change(page)) {
            log::warn!("page_change {page} not sent: {e}");
        }
        Ok(())
    }

    pub fn next_page(&mut self) -> Result<(), IntentError> {
        self.change_page(self.store.page() + 1)
    }

    pub fn previous_page(&mut self) -> Result<(), IntentError> {
        self.change_page(self.store.page().saturating_sub(1))
    }

    /// Ask the relay for the presenter role.
    pub fn claim_presenter(&mut self, credential: Option<String>) -> Result<(), IntentError> {
        if self.store.is_presenter() {
            return Err(IntentError::AlreadyPresenter);
        }
        let password = credential.unwrap_or_else(|| self.config.credential.clone());
        if let Err(e) = self.connection.send(&Message::auth(password)) {
            self.notify(Notice::error("Not connected to server"));
            return Err(e.into());
        }
        Ok(())
    }

    /// Validate and upload a new document. Presenter only.
    pub fn upload(&mut self, file: PdfFile) -> Result<(), IntentError> {
        if !self.store.is_presenter() {
            return Err(IntentError::NotPresenter);
        }
        if self.upload_in_flight {
            return Err(IntentError::UploadInFlight);
        }
        if let Err(e) = upload::validate(&file, &self.config) {
            self.notify(Notice::error(e.to_string()));
            return Err(e.into());
        }

        log::info!("Uploading {} ({} bytes)", file.name, file.size());
        self.upload_in_flight = true;
        let uploading = self.uploader.upload(&self.config.upload_url, file);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = uploading.await;
            let _ = events.send(SessionEvent::Upload(UploadEvent::Finished { result }));
        });
        Ok(())
    }

    pub fn zoom_in(&mut self) {
        self.apply_scale(self.scale.zoomed_in(&self.config.zoom));
    }

    pub fn zoom_out(&mut self) {
        self.apply_scale(self.scale.zoomed_out(&self.config.zoom));
    }

    pub fn set_zoom(&mut self, factor: f32) {
        self.apply_scale(Scale::from_factor(factor).snapped(&self.config.zoom));
    }

    fn apply_scale(&mut self, scale: Scale) {
        if scale == self.scale {
            return;
        }
        log::debug!("Zoom {} -> {}", self.scale, scale);
        self.scale = scale;
        self.render_current();
    }

    // ─── Events ──────────────────────────────────────────────────

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connection(event) => {
                if let Some(link_event) = self.connection.handle(event) {
                    self.on_link_event(link_event);
                }
            }
            SessionEvent::Render(event) => {
                if let Some(outcome) = self.renderer.handle(event) {
                    self.on_render_outcome(outcome);
                }
            }
            SessionEvent::Upload(UploadEvent::Finished { result }) => {
                self.on_upload_finished(result);
            }
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => {}
            LinkEvent::Frame(text) => match Message::decode(&text) {
                Ok(msg) => self.on_message(msg),
                Err(e) => log::warn!("Dropping inbound frame: {e}"),
            },
            LinkEvent::Closed { next_attempt } => {
                // The role belongs to the socket; a new socket starts as viewer.
                self.store.set_presenter(false);
                log::info!("Disconnected, reconnect attempt {next_attempt} scheduled");
            }
            LinkEvent::Reconnecting { attempt } => {
                log::info!("Reconnect attempt {attempt}");
            }
            LinkEvent::GaveUp { .. } => {
                self.store.set_presenter(false);
                self.notify(Notice::error(
                    "Unable to connect to server. Please refresh the page.",
                ));
            }
        }
    }

    fn on_message(&mut self, msg: Message) {
        match msg {
            Message::NewPdf { .. } => {
                let snapshot = self.store.snapshot();
                match self.store.apply(&msg) {
                    Some(StateChange::Document { document, .. }) => {
                        log::info!("New presentation {document}");
                        self.notify_loaded = !self.store.is_presenter();
                        self.begin_loading(snapshot);
                    }
                    Some(StateChange::Page { .. }) => self.render_current(),
                    _ => {}
                }
            }
            Message::PageChange { .. } => {
                if let Some(StateChange::Page { from, to }) = self.store.apply(&msg) {
                    log::debug!("Page {from} -> {to}");
                    self.render_current();
                }
            }
            Message::AdminStatus { .. } => {
                if let Some(StateChange::Role { is_presenter: true }) = self.store.apply(&msg) {
                    self.notify(Notice::info("You are now the presenter"));
                }
            }
            Message::UserCount { .. } => {
                self.store.apply(&msg);
            }
            Message::Error { error } => {
                self.notify(Notice::error(error));
            }
            Message::Auth { .. } => {
                log::debug!("Ignoring auth message from server");
            }
        }
    }

    fn on_render_outcome(&mut self, outcome: RenderOutcome) {
        match outcome {
            RenderOutcome::DocumentLoaded {
                document,
                page_count,
            } => {
                if self.store.document() != Some(&document) {
                    return;
                }
                if let Some(StateChange::Page { from, .. }) =
                    self.store.document_loaded(&document, page_count)
                {
                    log::warn!("Page {from} is past the end of {document}, showing page 1");
                }
                self.stage = Stage::Ready;
                self.fallback = None;
                self.render_current();

                if self.announce.as_ref() == Some(&document) {
                    self.announce = None;
                    let msg = Message::new_pdf(document.filename(), self.store.page());
                    if let Err(e) = self.connection.send(&msg) {
                        log::warn!("new_pdf for {document} not sent: {e}");
                    }
                }
                if std::mem::take(&mut self.notify_loaded) && !self.store.is_presenter() {
                    self.notify(Notice::info("New presentation loaded"));
                }
            }
            RenderOutcome::LoadFailed { document, error } => {
                log::error!("Failed to load {document}: {error}");
                self.notify(Notice::error("Failed to load PDF"));
                self.roll_back();
            }
            RenderOutcome::Rendered(ticket) => {
                log::trace!("Showing {} page {} at {}", ticket.document, ticket.page, ticket.scale);
            }
            RenderOutcome::RenderFailed { ticket, error } => {
                log::error!("Failed to render page {}: {error}", ticket.page);
                self.notify(Notice::error("Failed to render page"));
            }
        }
    }

    fn on_upload_finished(&mut self, result: Result<String, UploadError>) {
        self.upload_in_flight = false;
        match result {
            Ok(filename) => {
                log::info!("Uploaded as {filename}");
                let snapshot = self.store.snapshot();
                let document = DocumentRef::new(filename);
                if self.store.replace_document(document.clone(), 1).is_some() {
                    self.announce = Some(document);
                    self.notify_loaded = false;
                    self.begin_loading(snapshot);
                }
            }
            Err(e) => {
                log::error!("Upload failed: {e}");
                self.notify(Notice::error(format!("Failed to upload PDF: {e}")));
            }
        }
    }

    fn begin_loading(&mut self, snapshot: DocumentSnapshot) {
        // Keep the oldest good state if loads are chained
        if self.fallback.is_none() {
            self.fallback = Some(Fallback {
                snapshot,
                stage: self.stage,
            });
        }
        self.stage = Stage::Loading;
        self.render_current();
    }

    fn roll_back(&mut self) {
        self.announce = None;
        self.notify_loaded = false;
        if let Some(fallback) = self.fallback.take() {
            self.store.restore(fallback.snapshot);
            self.stage = fallback.stage;
            if self.stage == Stage::Ready {
                self.render_current();
            }
        }
    }

    fn render_current(&mut self) {
        if self.stage == Stage::NoDocument {
            return;
        }
        let Some(document) = self.store.document().cloned() else {
            return;
        };
        self.renderer.request_render(RenderTicket {
            document,
            page: self.store.page(),
            scale: self.scale,
        });
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notice_tx.send(notice);
    }

    // ─── Accessors ───────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        match self.stage {
            Stage::NoDocument => Phase::NoDocument,
            Stage::Loading => Phase::Loading,
            Stage::Ready => Phase::Ready {
                page: self.store.page(),
                is_presenter: self.store.is_presenter(),
            },
        }
    }

    pub fn state(&self) -> &SyncStateStore {
        &self.store
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.reconnect_attempts()
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.renderer.surface()
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// Retrieval URL of the current document, for download.
    pub fn document_url(&self) -> Option<String> {
        self.store
            .document()
            .map(|doc| self.config.document_url(doc.filename()))
    }

    pub fn is_uploading(&self) -> bool {
        self.upload_in_flight
    }
}
