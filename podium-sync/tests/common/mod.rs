//! Shared fixtures for integration tests: a relay on a free port plus
//! in-process rasterizer and uploader stand-ins.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use tokio::time::{timeout, Duration, Instant};

use podium_sync::render::{Bitmap, PdfDocument, Rasterizer, RenderError, Scale};
use podium_sync::server::{RelayConfig, RelayServer};
use podium_sync::upload::{PdfFile, UploadError, Uploader};
use podium_sync::{PresentationController, SessionConfig, WsTransport};

pub const CREDENTIAL: &str = "letmein";

/// Find a free port for testing.
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay on a free port, return the port.
pub async fn start_test_server() -> u16 {
    start_test_server_with(RelayConfig {
        credential: CREDENTIAL.to_string(),
        broadcast_capacity: 64,
        ..RelayConfig::default()
    })
    .await
}

pub async fn start_test_server_with(config: RelayConfig) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = RelayServer::new(config);
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    port
}

pub fn session_config(port: u16) -> SessionConfig {
    SessionConfig {
        transport_url: format!("ws://127.0.0.1:{port}/ws"),
        retrieval_base: "http://files.test".to_string(),
        credential: CREDENTIAL.to_string(),
        reconnect_delay: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}

/// Controller wired to the real WebSocket transport and the stubs below.
pub fn controller(config: &SessionConfig, uploaded_as: &str) -> PresentationController {
    PresentationController::new(
        config,
        Arc::new(WsTransport),
        Arc::new(StubRasterizer::new().with_document(uploaded_as, 5)),
        Arc::new(StubUploader(uploaded_as.to_string())),
    )
}

/// Process controller events until `done` holds, or fail after 5 s.
pub async fn pump_until<F>(ctrl: &mut PresentationController, mut done: F) -> bool
where
    F: FnMut(&PresentationController) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(ctrl) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, ctrl.process_next()).await {
            Ok(true) => {}
            _ => return false,
        }
    }
    true
}

/// Keep processing events for a short quiet period.
pub async fn drain(ctrl: &mut PresentationController) {
    while let Ok(true) = timeout(Duration::from_millis(100), ctrl.process_next()).await {}
}

pub fn pdf(name: &str) -> PdfFile {
    PdfFile::new(name, "application/pdf", b"%PDF-1.7".to_vec())
}

#[derive(Default)]
pub struct StubRasterizer {
    documents: HashMap<String, u32>,
}

impl StubRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, filename: &str, pages: u32) -> Self {
        self.documents.insert(filename.to_string(), pages);
        self
    }
}

impl Rasterizer for StubRasterizer {
    fn load(&self, url: &str) -> BoxFuture<'static, Result<Arc<dyn PdfDocument>, RenderError>> {
        let filename = url.rsplit('/').next().unwrap_or_default();
        let result = match self.documents.get(filename) {
            Some(&page_count) => Ok(Arc::new(StubDocument { page_count }) as Arc<dyn PdfDocument>),
            None => Err(RenderError::Load(format!("404 for {url}"))),
        };
        future::ready(result).boxed()
    }
}

#[derive(Debug)]
pub struct StubDocument {
    page_count: u32,
}

impl PdfDocument for StubDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn render_page(&self, page: u32, scale: Scale) -> BoxFuture<'static, Result<Bitmap, RenderError>> {
        let side = scale.percent() * 8;
        let bitmap = Bitmap {
            width: side,
            height: side,
            pixels: Arc::from(vec![page as u8; 16]),
        };
        future::ready(Ok(bitmap)).boxed()
    }
}

/// Uploader that always stores the file under a fixed name.
pub struct StubUploader(pub String);

impl Uploader for StubUploader {
    fn upload(&self, _endpoint: &str, _file: PdfFile) -> BoxFuture<'static, Result<String, UploadError>> {
        future::ready(Ok(self.0.clone())).boxed()
    }
}
