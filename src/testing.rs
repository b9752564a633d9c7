//! Scripted in-memory [`ToolApi`] for unit tests.

use crate::api::{
    AutoAdjustRequest, AutoAdjustment, ConversionRequest, EventSource, ExportRequest,
    ImageUpload, PreviewRequest, PreviewResponse, ResultSummary, SizeField, TaskId, ToolApi,
};
use crate::config::Tool;
use crate::error::LauncherError;
use crate::progress::ProgressEvent;
use crate::source::{Artifact, SourceFile};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

type EventTx = mpsc::UnboundedSender<Result<ProgressEvent, LauncherError>>;
type EventRx = mpsc::UnboundedReceiver<Result<ProgressEvent, LauncherError>>;

/// A preview request held open until the test answers it.
pub(crate) struct GatedPreview {
    pub request: PreviewRequest,
    pub reply: oneshot::Sender<Result<PreviewResponse, LauncherError>>,
}

#[derive(Default)]
pub(crate) struct ScriptedApi {
    pub uploads: AtomicUsize,
    pub conversions: AtomicUsize,
    pub summaries: AtomicUsize,
    pub downloads: AtomicUsize,
    pub exports: AtomicUsize,
    pub auto_adjusts: AtomicUsize,

    pub upload_result: Mutex<Option<Result<ImageUpload, LauncherError>>>,
    pub preview_results: Mutex<VecDeque<Result<PreviewResponse, LauncherError>>>,
    pub preview_requests: Mutex<Vec<PreviewRequest>>,
    pub auto_adjust_result: Mutex<Option<Result<AutoAdjustment, LauncherError>>>,
    pub export_requests: Mutex<Vec<ExportRequest>>,
    pub export_result: Mutex<Option<Result<Artifact, LauncherError>>>,
    pub start_results: Mutex<VecDeque<Result<TaskId, LauncherError>>>,
    pub summary_result: Mutex<Option<Result<ResultSummary, LauncherError>>>,
    pub download_result: Mutex<Option<Result<Artifact, LauncherError>>>,

    gated: Mutex<Option<mpsc::UnboundedSender<GatedPreview>>>,
    streams: Mutex<HashMap<TaskId, VecDeque<EventRx>>>,
}

impl ScriptedApi {
    /// Hold every preview request until the test replies through the
    /// returned receiver.
    pub fn gate_previews(&self) -> mpsc::UnboundedReceiver<GatedPreview> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.gated.lock().unwrap() = Some(tx);
        rx
    }

    /// Queue a live progress channel for `task_id`.
    pub fn script_progress(&self, task_id: &str) -> EventTx {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams
            .lock()
            .unwrap()
            .entry(TaskId::from(task_id))
            .or_default()
            .push_back(rx);
        tx
    }

    /// Queue a progress channel that delivers `events` and then closes.
    pub fn script_events(&self, task_id: &str, events: Vec<Result<ProgressEvent, LauncherError>>) {
        let tx = self.script_progress(task_id);
        for ev in events {
            let _ = tx.send(ev);
        }
    }

    pub fn previews(&self) -> Vec<PreviewRequest> {
        self.preview_requests.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub(crate) fn sample_upload() -> ImageUpload {
    ImageUpload {
        file_id: "f1".into(),
        filename: Some("photo.jpg".into()),
        width: 4000,
        height: 3000,
        original_bytes: 2_000_000,
    }
}

/// Estimate grows with pixel count and quality so tests can tell responses apart.
pub(crate) fn echo_preview(request: &PreviewRequest) -> PreviewResponse {
    PreviewResponse {
        bytes: vec![0xFF, 0xD8],
        estimated_bytes: request.width as u64 * request.height as u64 * request.quality as u64
            / 400,
        width: Some(request.width),
        height: Some(request.height),
    }
}

#[async_trait]
impl ToolApi for ScriptedApi {
    async fn upload_image(&self, _file: &SourceFile) -> Result<ImageUpload, LauncherError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.upload_result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(sample_upload()))
    }

    async fn preview(&self, request: &PreviewRequest) -> Result<PreviewResponse, LauncherError> {
        self.preview_requests.lock().unwrap().push(request.clone());
        let gate = self.gated.lock().unwrap().clone();
        if let Some(gate) = gate {
            let (reply, wait) = oneshot::channel();
            let _ = gate.send(GatedPreview {
                request: request.clone(),
                reply,
            });
            return wait.await.unwrap_or_else(|_| {
                Err(LauncherError::PreviewTransient {
                    detail: "gate dropped".into(),
                })
            });
        }
        let scripted = self.preview_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(echo_preview(request)))
    }

    async fn auto_adjust(
        &self,
        request: &AutoAdjustRequest,
    ) -> Result<AutoAdjustment, LauncherError> {
        self.auto_adjusts.fetch_add(1, Ordering::SeqCst);
        self.auto_adjust_result.lock().unwrap().take().unwrap_or_else(|| {
            Ok(AutoAdjustment {
                quality: 70,
                scale: 1.0,
                width: request.width,
                height: request.height,
            })
        })
    }

    async fn export(&self, request: &ExportRequest) -> Result<Artifact, LauncherError> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        self.export_requests.lock().unwrap().push(request.clone());
        self.export_result.lock().unwrap().take().unwrap_or_else(|| {
            Ok(Artifact {
                filename: "photo_resized.jpg".into(),
                content_type: Some("image/jpeg".into()),
                bytes: vec![1, 2, 3],
            })
        })
    }

    async fn start_conversion(
        &self,
        _request: &ConversionRequest,
    ) -> Result<TaskId, LauncherError> {
        let n = self.conversions.fetch_add(1, Ordering::SeqCst) + 1;
        self.start_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TaskId(format!("task-{n}"))))
    }

    async fn open_progress(
        &self,
        _tool: Tool,
        task_id: &TaskId,
    ) -> Result<EventSource, LauncherError> {
        let rx = self
            .streams
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(|q| q.pop_front());
        match rx {
            Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Err(LauncherError::Stream {
                message: format!("no stream scripted for {task_id}"),
            }),
        }
    }

    async fn fetch_summary(
        &self,
        _tool: Tool,
        _task_id: &TaskId,
    ) -> Result<ResultSummary, LauncherError> {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        self.summary_result.lock().unwrap().take().unwrap_or_else(|| {
            Ok(ResultSummary {
                input_size: SizeField::Bytes(1_000_000),
                output_size: SizeField::Bytes(800_000),
                reduction: Some(20.0),
                markdown: Some("# Title\n".into()),
            })
        })
    }

    async fn download(&self, tool: Tool, _task_id: &TaskId) -> Result<Artifact, LauncherError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.download_result.lock().unwrap().take().unwrap_or_else(|| {
            Ok(Artifact {
                filename: tool.fallback_filename().into(),
                content_type: Some("image/gif".into()),
                bytes: b"GIF89a".to_vec(),
            })
        })
    }
}
