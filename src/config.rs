//! Configuration types for the launcher client.
//!
//! All client behaviour is controlled through [`ClientConfig`], built via its
//! [`ClientConfigBuilder`]. One config is shared by every session object of a
//! process; each session still owns its own parameters, task and token
//! counter.

use crate::api::ToolApi;
use crate::error::LauncherError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for the launcher client.
///
/// # Example
/// ```rust
/// use launcher_client::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .base_url("http://localhost:5000")
///     .debounce_ms(150)
///     .build()
///     .unwrap();
/// assert_eq!(config.debounce_ms, 150);
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Server origin the `/api/{tool}/...` paths are resolved against.
    /// Default: `http://127.0.0.1:5000`.
    pub base_url: String,

    /// Quiet period after the last parameter change before a preview is
    /// requested. Default: 200.
    pub debounce_ms: u64,

    /// Overall timeout for request/response calls in seconds. Default: 120.
    ///
    /// Not applied to the progress stream, which stays open for as long as
    /// the server keeps sending keepalives.
    pub request_timeout_secs: u64,

    /// TCP connect timeout in seconds. Default: 10.
    pub connect_timeout_secs: u64,

    /// Smallest width or height the parameter model will produce. Default: 1.
    pub min_dimension: u32,

    /// Largest width or height the parameter model will produce. Default: 10000.
    pub max_dimension: u32,

    /// Quality applied to freshly loaded images. Default: 85.
    pub default_quality: u8,

    /// Target output size in KB for freshly loaded images. Default: 1024.
    pub default_target_kb: u32,

    /// Pre-constructed API backend. Takes precedence over `base_url`.
    pub api: Option<Arc<dyn ToolApi>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            debounce_ms: 200,
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            min_dimension: 1,
            max_dimension: 10_000,
            default_quality: 85,
            default_target_kb: 1024,
            api: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("debounce_ms", &self.debounce_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("min_dimension", &self.min_dimension)
            .field("max_dimension", &self.max_dimension)
            .field("default_quality", &self.default_quality)
            .field("default_target_kb", &self.default_target_kb)
            .field("api", &self.api.as_ref().map(|_| "<dyn ToolApi>"))
            .finish()
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolve the API backend: the injected one, or an HTTP client for `base_url`.
    pub fn resolve_api(&self) -> Result<Arc<dyn ToolApi>, LauncherError> {
        if let Some(ref api) = self.api {
            return Ok(Arc::clone(api));
        }
        let http = crate::api::http::HttpApi::new(self)?;
        Ok(Arc::new(http))
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs.max(1);
        self
    }

    pub fn dimension_limits(mut self, min: u32, max: u32) -> Self {
        self.config.min_dimension = min;
        self.config.max_dimension = max;
        self
    }

    pub fn default_quality(mut self, q: u8) -> Self {
        self.config.default_quality = q.clamp(1, 100);
        self
    }

    pub fn default_target_kb(mut self, kb: u32) -> Self {
        self.config.default_target_kb = kb;
        self
    }

    pub fn api(mut self, api: Arc<dyn ToolApi>) -> Self {
        self.config.api = Some(api);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, LauncherError> {
        let c = &self.config;
        if c.api.is_none()
            && !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://"))
        {
            return Err(LauncherError::InvalidConfig(format!(
                "base URL must be http:// or https://, got '{}'",
                c.base_url
            )));
        }
        if c.min_dimension == 0 || c.min_dimension > c.max_dimension {
            return Err(LauncherError::InvalidConfig(format!(
                "dimension limits must satisfy 1 <= min <= max, got {}..{}",
                c.min_dimension, c.max_dimension
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// The three tools served by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// Image resizer with live preview.
    ImgSizer,
    /// PDF to Markdown conversion task.
    Pdf2Md,
    /// Video to GIF conversion task.
    Vid2Gif,
}

impl Tool {
    /// Registry order as shown on the launcher hub.
    pub fn all() -> [Tool; 3] {
        [Tool::ImgSizer, Tool::Pdf2Md, Tool::Vid2Gif]
    }

    /// Path segment used under `/api/`.
    pub fn id(self) -> &'static str {
        match self {
            Tool::ImgSizer => "imgsizer",
            Tool::Pdf2Md => "pdf2md",
            Tool::Vid2Gif => "vid2gif",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tool::ImgSizer => "Image Resizer",
            Tool::Pdf2Md => "PDF to Markdown",
            Tool::Vid2Gif => "Video to GIF",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Tool::ImgSizer => "Resize and compress images with live preview and quality control",
            Tool::Pdf2Md => "Convert PDF files to Markdown format for efficient LLM processing",
            Tool::Vid2Gif => {
                "Convert video files to GIF with customizable size, duration, and dimensions"
            }
        }
    }

    /// Endpoint that accepts the source file: `upload` for the previewing
    /// tool, `convert` for the task-based ones.
    pub fn upload_endpoint(self) -> &'static str {
        match self {
            Tool::ImgSizer => "upload",
            Tool::Pdf2Md | Tool::Vid2Gif => "convert",
        }
    }

    /// Filename used when the server does not send `Content-Disposition`.
    pub fn fallback_filename(self) -> &'static str {
        match self {
            Tool::ImgSizer => "image.jpg",
            Tool::Pdf2Md => "document.md",
            Tool::Vid2Gif => "animation.gif",
        }
    }

    /// Whether the task reports page-by-page progress or a single opaque step.
    pub fn reports_steps(self) -> bool {
        matches!(self, Tool::Pdf2Md)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Tool {
    type Err = LauncherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::all()
            .into_iter()
            .find(|t| t.id() == s.trim().to_lowercase())
            .ok_or_else(|| LauncherError::InvalidConfig(format!("unknown tool '{s}'")))
    }
}

/// How the image is fitted into the requested box when the aspect lock is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Scale both axes independently. (default)
    #[default]
    Stretch,
    /// Scale to fit inside the box, keeping proportions.
    Fit,
    /// Scale to cover the box, then crop the overflow.
    Crop,
}

/// Output container for image export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    #[default]
    Jpeg,
    Png,
}

/// Aspect handling for GIF output dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectMode {
    /// Keep the source proportions inside the requested box. (default)
    #[default]
    Maintain,
    Crop,
    Fill,
}

impl AspectMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectMode::Maintain => "maintain",
            AspectMode::Crop => "crop",
            AspectMode::Fill => "fill",
        }
    }
}
