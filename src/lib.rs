//! # launcher-client
//!
//! Client-side orchestration for the tool launcher's three server-backed
//! tools: the image resizer (`imgsizer`), PDF to Markdown (`pdf2md`) and
//! video to GIF (`vid2gif`).
//!
//! ## Why this crate?
//!
//! The transformations themselves run on the server. What is hard on the
//! client is the choreography around them: sliders firing dozens of preview
//! requests a second, responses arriving out of order on a slow network, a
//! conversion streaming progress for minutes before the connection drops.
//! This crate owns that choreography and keeps it testable without a network.
//!
//! ## Architecture
//!
//! ```text
//! user input
//!  │
//!  ├─ ParameterModel    width/height/quality, aspect lock      (params)
//!  ├─ PreviewScheduler  debounce window + stale-token guard     (scheduler)
//!  │    └─ ImageSizer   per-view resizer session                (imgsizer)
//!  │
//!  ├─ TaskController    submit → stream → result state machine  (task)
//!  │    └─ ProgressStream  SSE pump → mpsc of TaggedEvent       (stream)
//!  │
//!  └─ ResultPresenter   size deltas and target deviation        (presenter)
//!
//! ToolApi (api) ── HttpApi over reqwest, or any test double
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use launcher_client::{ClientConfig, ConversionRequest, SourceFile, TaskController, Tool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("http://127.0.0.1:5000")
//!         .build()?;
//!     let mut controller = TaskController::new(&config, Tool::Pdf2Md)?;
//!     let file = SourceFile::from_path("paper.pdf").await?;
//!     let outcome = controller.run(ConversionRequest::document(file)).await?;
//!     if let Some(summary) = outcome.summary() {
//!         println!("{}", launcher_client::presenter::completion_stats(summary));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `launcher` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! launcher-client = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod config;
pub mod error;
pub mod imgsizer;
pub mod params;
pub mod presenter;
pub mod progress;
pub mod scheduler;
pub mod source;
pub mod stream;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{ConversionRequest, GifOptions, TaskId, ToolApi};
pub use config::{AspectMode, ClientConfig, ClientConfigBuilder, ExportFormat, ResizeMode, Tool};
pub use error::{ErrorKind, LauncherError};
pub use imgsizer::{ImageSizer, ImageView, PreviewOutcome};
pub use params::{ImageParameters, ParamChange, ParameterModel};
pub use presenter::{format_bytes, CompletionStats, PreviewStats, TargetDeviation};
pub use progress::{DoneSummary, NoopObserver, Progress, ProgressEvent, TaskObserver};
pub use scheduler::{DebounceTimer, PreviewScheduler, PreviewToken};
pub use source::{Artifact, SourceFile};
pub use stream::{ProgressStream, StreamHandle, TaggedEvent};
pub use task::{Task, TaskController, TaskOutcome, TaskResult, TaskState, Transition};
