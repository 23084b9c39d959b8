//! Render coordination between the session and an external rasterizer.
//!
//! The rasterizer ("load document D", "render page N at scale S") is
//! supplied by the embedder through [`Rasterizer`] / [`PdfDocument`].
//! [`RenderCoordinator`] drives it with last-request-wins semantics:
//!
//! ```text
//! request_render(A) ──► render A ─────────────────┐ (stale, discarded)
//! request_render(B) ──► render B ──┐              │
//!                                  ▼              ▼
//!                         Rendered{B} ──► surface = B
//! ```
//!
//! Nothing in flight is cancelled. Every completion carries the
//! [`RenderTicket`] it was started for and is applied only if that ticket
//! is still the latest request.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::config::{SessionConfig, ZoomLimits};
use crate::event::{EventSender, RenderEvent, SessionEvent};
use crate::state::DocumentRef;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Failed to load document: {0}")]
    Load(String),
    #[error("Page {page} out of range (document has {page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("Failed to render page: {0}")]
    Render(String),
}

/// Zoom factor, stored as a whole percentage so equal zoom levels compare
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scale(u32);

impl Scale {
    pub const ACTUAL_SIZE: Scale = Scale(100);

    pub fn from_factor(factor: f32) -> Self {
        Self((factor * 100.0).round().max(1.0) as u32)
    }

    pub fn from_percent(percent: u32) -> Self {
        Self(percent.max(1))
    }

    pub fn factor(self) -> f32 {
        self.0 as f32 / 100.0
    }

    pub fn percent(self) -> u32 {
        self.0
    }

    pub fn clamped(self, limits: &ZoomLimits) -> Self {
        let min = Self::from_factor(limits.min).0;
        let max = Self::from_factor(limits.max).0;
        Self(self.0.clamp(min, max))
    }

    /// Round to the nearest multiple of the zoom step, then clamp.
    pub fn snapped(self, limits: &ZoomLimits) -> Self {
        let step = Self::from_factor(limits.step).0;
        Self((self.0 + step / 2) / step * step).clamped(limits)
    }

    pub fn zoomed_in(self, limits: &ZoomLimits) -> Self {
        Self(self.0 + Self::from_factor(limits.step).0).clamped(limits)
    }

    pub fn zoomed_out(self, limits: &ZoomLimits) -> Self {
        Self(self.0.saturating_sub(Self::from_factor(limits.step).0)).clamped(limits)
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::ACTUAL_SIZE
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// One (document, page, scale) render request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderTicket {
    pub document: DocumentRef,
    pub page: u32,
    pub scale: Scale,
}

/// Rasterized page pixels (RGBA8).
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// A loaded document, able to rasterize its pages.
pub trait PdfDocument: fmt::Debug + Send + Sync {
    fn page_count(&self) -> u32;

    fn render_page(&self, page: u32, scale: Scale) -> BoxFuture<'static, Result<Bitmap, RenderError>>;
}

/// Loads documents by retrieval URL.
pub trait Rasterizer: Send + Sync {
    fn load(&self, url: &str) -> BoxFuture<'static, Result<Arc<dyn PdfDocument>, RenderError>>;
}

/// The display surface: the last accepted render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    pub ticket: RenderTicket,
    pub bitmap: Bitmap,
}

/// What the controller learns from a [`RenderEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    DocumentLoaded { document: DocumentRef, page_count: u32 },
    LoadFailed { document: DocumentRef, error: RenderError },
    Rendered(RenderTicket),
    RenderFailed { ticket: RenderTicket, error: RenderError },
}

/// How a request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRequest {
    /// Already requested or already on the surface
    Duplicate,
    /// Document load started or pending; the page follows
    Loading,
    Rendering,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub loads_started: u64,
    pub renders_started: u64,
    pub stale_discarded: u64,
}

struct LoadedDocument {
    document: DocumentRef,
    handle: Arc<dyn PdfDocument>,
}

pub struct RenderCoordinator {
    rasterizer: Arc<dyn Rasterizer>,
    events: EventSender,
    config: SessionConfig,

    loaded: Option<LoadedDocument>,
    /// Documents whose load is in flight
    loading: HashSet<DocumentRef>,
    /// Latest request not yet completed
    requested: Option<RenderTicket>,
    surface: Option<Surface>,
    stats: RenderStats,
}

impl RenderCoordinator {
    pub fn new(config: &SessionConfig, rasterizer: Arc<dyn Rasterizer>, events: EventSender) -> Self {
        Self {
            rasterizer,
            events,
            config: config.clone(),
            loaded: None,
            loading: HashSet::new(),
            requested: None,
            surface: None,
            stats: RenderStats::default(),
        }
    }

    /// Request `ticket` on the surface, loading its document first if needed.
    pub fn request_render(&mut self, ticket: RenderTicket) -> RenderRequest {
        if self.requested.as_ref() == Some(&ticket) {
            return RenderRequest::Duplicate;
        }
        if self.surface.as_ref().map(|s| &s.ticket) == Some(&ticket) {
            // Anything still in flight lands stale
            self.requested = None;
            return RenderRequest::Duplicate;
        }

        self.requested = Some(ticket.clone());

        let handle = match &self.loaded {
            Some(loaded) if loaded.document == ticket.document => Some(loaded.handle.clone()),
            _ => None,
        };
        match handle {
            Some(handle) => {
                self.start_render(handle, ticket);
                RenderRequest::Rendering
            }
            None => {
                if !self.loading.contains(&ticket.document) {
                    self.start_load(ticket.document);
                }
                RenderRequest::Loading
            }
        }
    }

    /// Apply a rasterizer completion.
    pub fn handle(&mut self, event: RenderEvent) -> Option<RenderOutcome> {
        match event {
            RenderEvent::Loaded { document, result } => {
                self.loading.remove(&document);
                let wanted = self.requested.as_ref().map(|t| &t.document) == Some(&document);
                if !wanted {
                    self.stats.stale_discarded += 1;
                    log::debug!("Discarding stale load of {document}");
                    return None;
                }

                match result {
                    Ok(handle) => {
                        let page_count = handle.page_count();
                        log::info!("Loaded {document} ({page_count} pages)");
                        self.loaded = Some(LoadedDocument {
                            document: document.clone(),
                            handle: handle.clone(),
                        });
                        // Out-of-range pages wait for the controller to pick
                        // a valid page.
                        match self.requested.clone() {
                            Some(ticket) if ticket.page >= 1 && ticket.page <= page_count => {
                                self.start_render(handle, ticket);
                            }
                            _ => self.requested = None,
                        }
                        Some(RenderOutcome::DocumentLoaded {
                            document,
                            page_count,
                        })
                    }
                    Err(error) => {
                        log::error!("Loading {document} failed: {error}");
                        self.requested = None;
                        Some(RenderOutcome::LoadFailed { document, error })
                    }
                }
            }

            RenderEvent::Rendered { ticket, result } => {
                if self.requested.as_ref() != Some(&ticket) {
                    self.stats.stale_discarded += 1;
                    log::debug!(
                        "Discarding stale render of {} page {} at {}",
                        ticket.document,
                        ticket.page,
                        ticket.scale
                    );
                    return None;
                }
                self.requested = None;

                match result {
                    Ok(bitmap) => {
                        self.surface = Some(Surface {
                            ticket: ticket.clone(),
                            bitmap,
                        });
                        Some(RenderOutcome::Rendered(ticket))
                    }
                    Err(error) => {
                        log::error!("Rendering page {} failed: {error}", ticket.page);
                        Some(RenderOutcome::RenderFailed { ticket, error })
                    }
                }
            }
        }
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn loaded_document(&self) -> Option<&DocumentRef> {
        self.loaded.as_ref().map(|l| &l.document)
    }

    pub fn pending(&self) -> Option<&RenderTicket> {
        self.requested.as_ref()
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    fn start_load(&mut self, document: DocumentRef) {
        let url = self.config.document_url(document.filename());
        log::info!("Loading {url}");
        self.stats.loads_started += 1;
        self.loading.insert(document.clone());

        let loading = self.rasterizer.load(&url);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = loading.await;
            let _ = events.send(SessionEvent::Render(RenderEvent::Loaded { document, result }));
        });
    }

    fn start_render(&mut self, handle: Arc<dyn PdfDocument>, ticket: RenderTicket) {
        log::debug!(
            "Rendering {} page {} at {}",
            ticket.document,
            ticket.page,
            ticket.scale
        );
        self.stats.renders_started += 1;

        let rendering = handle.render_page(ticket.page, ticket.scale);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = rendering.await;
            let _ = events.send(SessionEvent::Render(RenderEvent::Rendered { ticket, result }));
        });
    }
}
