//! Document upload: local validation and the uploader seam.
//!
//! The HTTP transfer itself belongs to the embedder and is reached through
//! [`Uploader`]. Everything that can be checked before bytes leave the
//! machine (content type, size ceiling) is checked here.

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::config::SessionConfig;

/// A PDF picked by the presenter.
#[derive(Clone, PartialEq, Eq)]
pub struct PdfFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PdfFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl std::fmt::Debug for PdfFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Unsupported file type {0:?}, please upload a PDF file")]
    UnsupportedType(String),
    #[error("File size {size} exceeds limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("Upload rejected: {0}")]
    Rejected(String),
    #[error("Upload failed: {0}")]
    Transport(String),
}

/// Sends a validated file to the upload endpoint.
///
/// Resolves to the server-generated filename under which the document can
/// be retrieved.
pub trait Uploader: Send + Sync {
    fn upload(&self, endpoint: &str, file: PdfFile) -> BoxFuture<'static, Result<String, UploadError>>;
}

/// Check content type and size against the configured limits.
pub fn validate(file: &PdfFile, config: &SessionConfig) -> Result<(), UploadError> {
    if !config
        .allowed_mime_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&file.content_type))
    {
        return Err(UploadError::UnsupportedType(file.content_type.clone()));
    }
    if file.size() > config.max_file_size {
        return Err(UploadError::TooLarge {
            size: file.size(),
            max: config.max_file_size,
        });
    }
    Ok(())
}
