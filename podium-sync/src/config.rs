//! Session configuration.
//!
//! Built once at startup and handed to the [`ConnectionManager`] and
//! [`PresentationController`] by reference. Defaults mirror the stock
//! deployment (relay on `localhost:8080`); every field can be overridden
//! from `PODIUM_*` environment variables via [`SessionConfig::from_env`].
//!
//! [`ConnectionManager`]: crate::connection::ConnectionManager
//! [`PresentationController`]: crate::controller::PresentationController

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Zoom bounds are inconsistent: min {min}, max {max}, step {step}")]
    ZoomBounds { min: f32, max: f32, step: f32 },
}

/// Client-side configuration for one presentation session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the relay
    pub transport_url: String,
    /// Out-of-band upload endpoint (POST), handed to the [`Uploader`]
    ///
    /// [`Uploader`]: crate::upload::Uploader
    pub upload_url: String,
    /// Base for document retrieval: `<base>/uploads/<filename>`
    pub retrieval_base: String,
    /// Shared presenter credential sent with `auth`
    pub credential: String,
    /// Upload size ceiling in bytes
    pub max_file_size: u64,
    /// Allow-listed upload content types
    pub allowed_mime_types: Vec<String>,
    /// Fixed delay before each reconnect attempt
    pub reconnect_delay: Duration,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    pub zoom: ZoomLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport_url: "ws://localhost:8080/ws".to_string(),
            upload_url: "http://localhost:8080/upload".to_string(),
            retrieval_base: "http://localhost:8080".to_string(),
            credential: String::new(),
            max_file_size: 10 * 1024 * 1024,
            allowed_mime_types: vec!["application/pdf".to_string()],
            reconnect_delay: Duration::from_millis(2000),
            max_reconnect_attempts: 5,
            zoom: ZoomLimits::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with any `PODIUM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("PODIUM_TRANSPORT_URL") {
            config.transport_url = v;
        }
        if let Some(v) = lookup("PODIUM_UPLOAD_URL") {
            config.upload_url = v;
        }
        if let Some(v) = lookup("PODIUM_RETRIEVAL_BASE") {
            config.retrieval_base = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("PODIUM_CREDENTIAL") {
            config.credential = v;
        }
        if let Some(v) = lookup("PODIUM_MAX_FILE_SIZE") {
            config.max_file_size = parse("PODIUM_MAX_FILE_SIZE", &v)?;
        }
        if let Some(v) = lookup("PODIUM_ALLOWED_MIME_TYPES") {
            config.allowed_mime_types = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("PODIUM_RECONNECT_DELAY_MS") {
            config.reconnect_delay =
                Duration::from_millis(parse("PODIUM_RECONNECT_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("PODIUM_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = parse("PODIUM_MAX_RECONNECT_ATTEMPTS", &v)?;
        }

        let mut zoom = config.zoom;
        if let Some(v) = lookup("PODIUM_ZOOM_MIN") {
            zoom.min = parse("PODIUM_ZOOM_MIN", &v)?;
        }
        if let Some(v) = lookup("PODIUM_ZOOM_MAX") {
            zoom.max = parse("PODIUM_ZOOM_MAX", &v)?;
        }
        if let Some(v) = lookup("PODIUM_ZOOM_STEP") {
            zoom.step = parse("PODIUM_ZOOM_STEP", &v)?;
        }
        config.zoom = zoom.validated()?;

        Ok(config)
    }

    /// Retrieval URL for an uploaded document.
    pub fn document_url(&self, filename: &str) -> String {
        format!("{}/uploads/{}", self.retrieval_base, filename)
    }
}

pub(crate) fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

/// Zoom bounds and step, as scale factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLimits {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self {
            min: 0.5,
            max: 2.0,
            step: 0.1,
        }
    }
}

impl ZoomLimits {
    fn validated(self) -> Result<Self, ConfigError> {
        if self.min > 0.0 && self.min <= self.max && self.step > 0.0 {
            Ok(self)
        } else {
            Err(ConfigError::ZoomBounds {
                min: self.min,
                max: self.max,
                step: self.step,
            })
        }
    }
}
