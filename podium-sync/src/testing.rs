//! In-memory fakes for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::connection::{Link, Transport, TransportError};
use crate::render::{Bitmap, PdfDocument, Rasterizer, RenderError, Scale};
use crate::upload::{PdfFile, UploadError, Uploader};

/// The server side of an accepted fake connection.
pub(crate) struct FakePeer {
    pub to_client: mpsc::Sender<String>,
    pub from_client: mpsc::Receiver<String>,
}

/// Transport that accepts or refuses every connect.
pub(crate) struct FakeTransport {
    accept: bool,
    connects: AtomicUsize,
    peers_tx: mpsc::UnboundedSender<FakePeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakePeer>>,
}

impl FakeTransport {
    fn new(accept: bool) -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            accept,
            connects: AtomicUsize::new(0),
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
        }
    }

    pub fn accepting() -> Self {
        Self::new(true)
    }

    pub fn refusing() -> Self {
        Self::new(false)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The peer end of the next accepted connection.
    pub async fn next_peer(&self) -> FakePeer {
        self.peers_rx
            .lock()
            .await
            .recv()
            .await
            .expect("transport dropped")
    }
}

impl Transport for FakeTransport {
    fn connect(&self, _url: &str) -> BoxFuture<'static, Result<Link, TransportError>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return future::ready(Err(TransportError::Connect("refused".to_string()))).boxed();
        }
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let _ = self.peers_tx.send(FakePeer {
            to_client: in_tx,
            from_client: out_rx,
        });
        future::ready(Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        }))
        .boxed()
    }
}

#[derive(Debug, Default)]
struct RasterLog {
    loads: AtomicUsize,
    renders: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

/// Rasterizer over a fixed table of filename → page count.
#[derive(Default)]
pub(crate) struct FakeRasterizer {
    documents: HashMap<String, u32>,
    failing_pages: HashSet<u32>,
    stalled: bool,
    log: Arc<RasterLog>,
}

impl FakeRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, filename: &str, pages: u32) -> Self {
        self.documents.insert(filename.to_string(), pages);
        self
    }

    pub fn failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    /// Renders never complete.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn loads(&self) -> usize {
        self.log.loads.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.log.renders.load(Ordering::SeqCst)
    }

    pub fn loaded_urls(&self) -> Vec<String> {
        self.log.urls.lock().unwrap().clone()
    }
}

impl Rasterizer for FakeRasterizer {
    fn load(&self, url: &str) -> BoxFuture<'static, Result<Arc<dyn PdfDocument>, RenderError>> {
        self.log.loads.fetch_add(1, Ordering::SeqCst);
        self.log.urls.lock().unwrap().push(url.to_string());

        let filename = url.rsplit('/').next().unwrap_or_default();
        let result = match self.documents.get(filename) {
            Some(&pages) => Ok(Arc::new(FakeDocument {
                page_count: pages,
                failing_pages: self.failing_pages.clone(),
                stalled: self.stalled,
                log: self.log.clone(),
            }) as Arc<dyn PdfDocument>),
            None => Err(RenderError::Load(format!("no such document: {url}"))),
        };
        future::ready(result).boxed()
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeDocument {
    page_count: u32,
    failing_pages: HashSet<u32>,
    stalled: bool,
    log: Arc<RasterLog>,
}

impl FakeDocument {
    pub fn new(page_count: u32) -> Self {
        Self {
            page_count,
            ..Self::default()
        }
    }
}

impl PdfDocument for FakeDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn render_page(&self, page: u32, scale: Scale) -> BoxFuture<'static, Result<Bitmap, RenderError>> {
        self.log.renders.fetch_add(1, Ordering::SeqCst);
        if self.stalled {
            return future::pending().boxed();
        }
        let result = if page == 0 || page > self.page_count {
            Err(RenderError::PageOutOfRange {
                page,
                page_count: self.page_count,
            })
        } else if self.failing_pages.contains(&page) {
            Err(RenderError::Render(format!("page {page} is corrupt")))
        } else {
            let side = scale.percent();
            Ok(Bitmap {
                width: side,
                height: side,
                pixels: Arc::from(vec![page as u8; 4]),
            })
        };
        future::ready(result).boxed()
    }
}

/// Uploader with a canned response. Records the endpoints it was given.
pub(crate) struct FakeUploader {
    response: Result<String, UploadError>,
    endpoints: Mutex<Vec<String>>,
}

impl FakeUploader {
    pub fn returning(filename: &str) -> Self {
        Self {
            response: Ok(filename.to_string()),
            endpoints: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: UploadError) -> Self {
        Self {
            response: Err(error),
            endpoints: Mutex::new(Vec::new()),
        }
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

impl Uploader for FakeUploader {
    fn upload(&self, endpoint: &str, _file: PdfFile) -> BoxFuture<'static, Result<String, UploadError>> {
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        future::ready(self.response.clone()).boxed()
    }
}
