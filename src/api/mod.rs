//! The server contract: request/response types and the [`ToolApi`] trait.
//!
//! Everything the client knows about the server goes through [`ToolApi`].
//! [`http::HttpApi`] is the production implementation over reqwest; session
//! objects hold an `Arc<dyn ToolApi>` so tests can swap in a scripted backend
//! and drive the state machines without a network.
//!
//! ```text
//! ImageSizer ──▶ upload_image · preview · auto_adjust · export
//! TaskController ──▶ start_conversion · fetch_summary · download
//! ProgressStream ──▶ open_progress (SSE)
//! ```

pub mod http;
pub mod sse;

use crate::config::{AspectMode, ExportFormat, ResizeMode, Tool};
use crate::error::LauncherError;
use crate::progress::ProgressEvent;
use crate::source::{Artifact, SourceFile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio_stream::Stream;

/// Raw progress events decoded from one server-sent event connection.
///
/// An `Err` item means the transport failed; the stream ends after it.
pub type EventSource = Pin<Box<dyn Stream<Item = Result<ProgressEvent, LauncherError>> + Send>>;

/// Opaque server-side task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

/// Metadata returned by the image upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUpload {
    pub file_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub original_bytes: u64,
}

/// Body of `POST /api/imgsizer/preview`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewRequest {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub mode: ResizeMode,
}

/// A rendered preview and the headers describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewResponse {
    /// Encoded preview image.
    pub bytes: Vec<u8>,
    /// `X-Estimated-Bytes`: size of the output at the requested quality.
    pub estimated_bytes: u64,
    /// `X-Width`, when sent. The server may clamp or round.
    pub width: Option<u32>,
    /// `X-Height`, when sent.
    pub height: Option<u32>,
}

/// Body of `POST /api/imgsizer/auto-adjust`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoAdjustRequest {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub mode: ResizeMode,
    pub target_kb: u32,
}

/// Parameters suggested by the server to hit a target size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoAdjustment {
    pub quality: u8,
    pub scale: f64,
    pub width: u32,
    pub height: u32,
}

/// Body of `POST /api/imgsizer/export`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRequest {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub mode: ResizeMode,
    pub format: ExportFormat,
}

/// Multipart submission starting a server-side conversion task.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub tool: Tool,
    pub file: SourceFile,
    /// Extra form fields sent alongside the file.
    pub fields: Vec<(String, String)>,
}

impl ConversionRequest {
    /// A PDF-to-Markdown submission; the tool takes no options.
    pub fn document(file: SourceFile) -> Self {
        Self {
            tool: Tool::Pdf2Md,
            file,
            fields: Vec::new(),
        }
    }

    /// A video-to-GIF submission with its options as form fields.
    pub fn gif(file: SourceFile, options: &GifOptions) -> Self {
        Self {
            tool: Tool::Vid2Gif,
            file,
            fields: options.to_fields(),
        }
    }
}

/// User options for the video-to-GIF tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GifOptions {
    /// Maximum GIF duration in seconds. Default: 5.
    pub duration_secs: f64,
    /// Target output size in MB. Default: 5.
    pub target_size_mb: f64,
    pub aspect_mode: AspectMode,
    /// Keep the source dimensions; `width`/`height` are ignored when set.
    pub use_original: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Default for GifOptions {
    fn default() -> Self {
        Self {
            duration_secs: 5.0,
            target_size_mb: 5.0,
            aspect_mode: AspectMode::Maintain,
            use_original: true,
            width: None,
            height: None,
        }
    }
}

impl GifOptions {
    /// Render the options as multipart form fields.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("duration".to_string(), self.duration_secs.to_string()),
            ("target_size_mb".to_string(), self.target_size_mb.to_string()),
            ("aspect_mode".to_string(), self.aspect_mode.as_str().to_string()),
        ];
        if !self.use_original {
            if let Some(w) = self.width {
                fields.push(("width".to_string(), w.to_string()));
            }
            if let Some(h) = self.height {
                fields.push(("height".to_string(), h.to_string()));
            }
        }
        fields
    }
}

/// A size reported by the result endpoint: raw bytes or a preformatted label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeField {
    Bytes(u64),
    Formatted(String),
}

/// Body of `GET /api/{tool}/preview/{task_id}` for a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub input_size: SizeField,
    pub output_size: SizeField,
    /// Server-computed percentage reduction, used when sizes are preformatted.
    #[serde(default)]
    pub reduction: Option<f64>,
    #[serde(default)]
    pub markdown: Option<String>,
}

/// The server contract for all three tools.
#[async_trait]
pub trait ToolApi: Send + Sync {
    /// `POST /api/imgsizer/upload`.
    async fn upload_image(&self, file: &SourceFile) -> Result<ImageUpload, LauncherError>;

    /// `POST /api/imgsizer/preview`.
    async fn preview(&self, request: &PreviewRequest) -> Result<PreviewResponse, LauncherError>;

    /// `POST /api/imgsizer/auto-adjust`.
    async fn auto_adjust(
        &self,
        request: &AutoAdjustRequest,
    ) -> Result<AutoAdjustment, LauncherError>;

    /// `POST /api/imgsizer/export`.
    async fn export(&self, request: &ExportRequest) -> Result<Artifact, LauncherError>;

    /// `POST /api/{tool}/convert`; returns the new task's id.
    async fn start_conversion(&self, request: &ConversionRequest)
        -> Result<TaskId, LauncherError>;

    /// `GET /api/{tool}/progress/{task_id}` as a stream of decoded events.
    async fn open_progress(
        &self,
        tool: Tool,
        task_id: &TaskId,
    ) -> Result<EventSource, LauncherError>;

    /// `GET /api/{tool}/preview/{task_id}`.
    async fn fetch_summary(
        &self,
        tool: Tool,
        task_id: &TaskId,
    ) -> Result<ResultSummary, LauncherError>;

    /// `GET /api/{tool}/download/{task_id}`.
    async fn download(&self, tool: Tool, task_id: &TaskId) -> Result<Artifact, LauncherError>;
}
