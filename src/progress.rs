//! Progress events and the observer trait for task lifecycles.
//!
//! The server pushes one JSON object per SSE message. [`ProgressEvent`] is
//! the typed form of that payload; [`ProgressEvent::from_payload`] normalises
//! the handful of shapes the tools emit:
//!
//! | Payload | Event |
//! |---------|-------|
//! | `{"keepalive": true}` | [`ProgressEvent::Keepalive`] |
//! | `{"page": 3, "total": 10, "status": "…"}` | [`ProgressEvent::Progress`] (determinate) |
//! | `{"status": "Creating GIF..."}` | [`ProgressEvent::Progress`] (indeterminate) |
//! | `{"done": true, "size_mb": 1.5}` | [`ProgressEvent::Done`] |
//! | `{"error": "…"}` | [`ProgressEvent::Error`] |
//!
//! Inject an [`Arc<dyn TaskObserver>`] into a
//! [`crate::task::TaskController`] to receive lifecycle callbacks, e.g. to
//! drive a terminal progress bar.
//!
//! # Example
//!
//! ```rust
//! use launcher_client::{Progress, TaskObserver};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl TaskObserver for Counter {
//!     fn on_progress(&self, progress: &Progress) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{:?}% {}", progress.percent(), progress.status.as_deref().unwrap_or(""));
//!     }
//! }
//! ```

use crate::api::TaskId;
use crate::task::{TaskOutcome, TaskState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A progress report from a running task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    /// Current step (page number for document conversion).
    pub step: Option<u64>,
    /// Total number of steps.
    pub total: Option<u64>,
    /// Human-readable status line.
    pub status: Option<String>,
}

impl Progress {
    /// Percentage complete, `round(step / total * 100)` clamped to `0..=100`.
    ///
    /// `None` when the backend does not expose step counts; callers show an
    /// indeterminate indicator instead.
    pub fn percent(&self) -> Option<u8> {
        match (self.step, self.total) {
            (Some(step), Some(total)) if total > 0 => {
                let pct = (step as f64 / total as f64 * 100.0).round();
                Some(pct.clamp(0.0, 100.0) as u8)
            }
            _ => None,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.percent().is_none()
    }
}

/// Data carried by the terminal `done` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DoneSummary {
    /// Final artifact size in MB (video-to-GIF).
    pub size_mb: Option<f64>,
    /// Final artifact size in bytes (document conversion).
    pub output_size: Option<u64>,
}

/// One normalised message from a progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Connection heartbeat; carries no information.
    Keepalive,
    Progress(Progress),
    Done(DoneSummary),
    Error { message: String },
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    keepalive: bool,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    page: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    size_mb: Option<f64>,
    #[serde(default)]
    output_size: Option<u64>,
}

impl ProgressEvent {
    /// Decode one SSE `data` payload.
    ///
    /// Returns `None` for payloads that are not JSON objects or match none of
    /// the known shapes. Precedence follows the server's intent: keepalive,
    /// then error, then done, then progress.
    pub fn from_payload(data: &str) -> Option<Self> {
        let raw: RawPayload = serde_json::from_str(data.trim()).ok()?;
        if raw.keepalive {
            return Some(Self::Keepalive);
        }
        if let Some(err) = raw.error {
            let message = match err {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => return None,
                other => other.to_string(),
            };
            return Some(Self::Error { message });
        }
        if raw.done {
            return Some(Self::Done(DoneSummary {
                size_mb: raw.size_mb,
                output_size: raw.output_size,
            }));
        }
        if raw.page.is_some() || raw.status.is_some() {
            return Some(Self::Progress(Progress {
                step: raw.page,
                total: raw.total,
                status: raw.status,
            }));
        }
        None
    }

    /// `Done` and `Error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error { .. })
    }
}

/// Receives lifecycle callbacks from a [`crate::task::TaskController`].
///
/// All methods default to no-ops so implementations only override what they
/// render. Callbacks run on the controller's task, in event order.
pub trait TaskObserver: Send + Sync {
    /// The task moved between lifecycle states.
    fn on_state_change(&self, task_id: Option<&TaskId>, from: TaskState, to: TaskState) {
        let _ = (task_id, from, to);
    }

    /// A progress event was applied.
    fn on_progress(&self, progress: &Progress) {
        let _ = progress;
    }

    /// A user-visible error: upload, stream or result fetch.
    fn on_error(&self, message: &str) {
        let _ = message;
    }

    /// The task completed and its follow-up fetch finished (successfully or not).
    fn on_complete(&self, outcome: &TaskOutcome) {
        let _ = outcome;
    }
}

/// Observer that ignores everything. This is the default.
pub struct NoopObserver;

impl TaskObserver for NoopObserver {}

/// Convenience alias for the observer stored in a controller.
pub type ObserverRef = Arc<dyn TaskObserver>;
