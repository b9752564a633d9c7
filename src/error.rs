//! Error types for the launcher client.
//!
//! Every network or transport failure is caught at the call site that issued
//! the request and converted into one [`LauncherError`] variant. The variants
//! are grouped by the step that failed, and [`LauncherError::kind`] collapses
//! them into the coarse [`ErrorKind`] taxonomy the session objects use to pick
//! a failure policy:
//!
//! * **Upload**: bad or unsupported file; surfaced immediately, no task.
//! * **Preview**: transient unless the server sent a structured message.
//! * **Stream**: server-reported failure or a dropped connection; terminal.
//! * **ResultFetch**: post-completion fetch failed; the task stays completed.
//! * **Export**: non-success export response; nothing is downloaded.
//!
//! Discarding a stale preview response is not an error and never produces one.

use std::path::PathBuf;
use thiserror::Error;

/// Fixed message used when a progress stream ends without a terminal event.
pub const CONNECTION_LOST: &str = "Connection lost during conversion";

/// All errors returned by the launcher client library.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// No source file was selected before submitting.
    #[error("No file selected")]
    NoFileSelected,

    /// The local source file could not be read.
    #[error("Cannot read '{path}': {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The server rejected the upload or the request never reached it.
    #[error("Upload failed: {message}")]
    Upload { message: String },

    // ── Preview errors ────────────────────────────────────────────────────
    /// Transport error or non-success status without a structured body.
    #[error("Preview request failed: {detail}")]
    PreviewTransient { detail: String },

    /// The server answered with a structured `error` message.
    #[error("{message}")]
    PreviewRejected { message: String },

    /// Auto-adjust could not compute parameters.
    #[error("Auto-adjust failed: {message}")]
    AutoAdjust { message: String },

    // ── Stream errors ─────────────────────────────────────────────────────
    /// The server reported a failure on the progress stream.
    #[error("{message}")]
    Stream { message: String },

    /// The stream dropped before a terminal event arrived.
    #[error("Connection lost during conversion")]
    ConnectionLost,

    // ── Result errors ─────────────────────────────────────────────────────
    /// Fetching the result of a completed task failed.
    #[error("Could not load result: {message}")]
    ResultFetch { message: String },

    /// Export returned a non-success response.
    #[error("Export failed: {message}")]
    Export { message: String },

    /// Downloading a finished artifact failed.
    #[error("Download failed: {message}")]
    Download { message: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write a downloaded artifact to disk.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error taxonomy used for failure policies and presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Upload,
    Preview,
    Stream,
    ResultFetch,
    Export,
    AutoAdjust,
    Download,
    Config,
    Io,
}

impl LauncherError {
    /// Classify this error into the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoFileSelected | Self::SourceUnreadable { .. } | Self::Upload { .. } => {
                ErrorKind::Upload
            }
            Self::PreviewTransient { .. } | Self::PreviewRejected { .. } => ErrorKind::Preview,
            Self::AutoAdjust { .. } => ErrorKind::AutoAdjust,
            Self::Stream { .. } | Self::ConnectionLost => ErrorKind::Stream,
            Self::ResultFetch { .. } => ErrorKind::ResultFetch,
            Self::Export { .. } => ErrorKind::Export,
            Self::Download { .. } => ErrorKind::Download,
            Self::OutputWriteFailed { .. } => ErrorKind::Io,
            Self::InvalidConfig(_) | Self::Internal(_) => ErrorKind::Config,
        }
    }

    /// Whether the preview failure policy should swallow this error silently.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PreviewTransient { .. })
    }
}
