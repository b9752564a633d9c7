//! The image resizer session: parameters, debounced previews, export.
//!
//! [`ImageSizer`] is the per-view object that ties a [`ParameterModel`] to a
//! [`PreviewScheduler`] and the server. Setters update the parameters and
//! (re)arm the debounce window; discrete actions such as presets refresh the
//! preview immediately. Preview requests run concurrently; each response is
//! reconciled against the scheduler's latest token, so a slow response for
//! old parameters can never overwrite a newer preview.
//!
//! The session does not spawn. The caller drives it by awaiting
//! [`ImageSizer::next_outcome`] (or [`ImageSizer::settle`]), which waits on
//! whichever comes first: the debounce deadline or an in-flight response.
//!
//! ```rust,no_run
//! use launcher_client::{ClientConfig, ImageSizer, SourceFile};
//!
//! # async fn demo() -> Result<(), launcher_client::LauncherError> {
//! let config = ClientConfig::default();
//! let mut sizer = ImageSizer::new(&config)?;
//! sizer.upload(Some(SourceFile::from_path("photo.jpg").await?)).await?;
//! sizer.set_width(1200);
//! sizer.settle().await;
//! if let Some(stats) = sizer.view().stats {
//!     println!("{} ({})", stats.size_label(), stats.deviation.label);
//! }
//! # Ok(())
//! # }
//! ```

use crate::api::{
    AutoAdjustRequest, ExportRequest, ImageUpload, PreviewRequest, PreviewResponse, ToolApi,
};
use crate::config::{ClientConfig, ExportFormat, ResizeMode};
use crate::error::LauncherError;
use crate::params::{ImageParameters, ParamChange, ParameterModel};
use crate::presenter::{preview_stats, PreviewStats};
use crate::scheduler::{PreviewScheduler, PreviewToken};
use crate::source::{Artifact, SourceFile};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

type PreviewReply = (
    PreviewToken,
    PreviewRequest,
    Result<PreviewResponse, LauncherError>,
);

/// Everything a renderer needs to draw the resizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageView {
    pub image: Option<ImageUpload>,
    /// Last applied preview.
    pub preview: Option<PreviewResponse>,
    pub stats: Option<PreviewStats>,
    /// Token of the applied preview.
    pub applied: Option<PreviewToken>,
    /// Single status line: upload, preview or export errors.
    pub status: Option<String>,
}

/// Result of one step of the preview loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewOutcome {
    /// The debounce window elapsed and a request went out.
    Issued(PreviewToken),
    /// A current response was applied to the view.
    Applied(PreviewToken),
    /// A superseded response arrived and was ignored.
    Discarded(PreviewToken),
    /// A transient failure was swallowed.
    Dropped(PreviewToken),
    /// The server returned a structured error; scheduling is halted.
    Rejected { token: PreviewToken, message: String },
}

enum Step {
    Reply(PreviewReply),
    Deadline,
}

/// Per-view session for the image resizer.
pub struct ImageSizer {
    api: Arc<dyn ToolApi>,
    params: ParameterModel,
    scheduler: PreviewScheduler,
    image: Option<ImageUpload>,
    in_flight: FuturesUnordered<BoxFuture<'static, PreviewReply>>,
    view: watch::Sender<ImageView>,
}

impl fmt::Debug for ImageSizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSizer")
            .field("params", self.params.get())
            .field("scheduler", &self.scheduler)
            .field("image", &self.image)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl ImageSizer {
    pub fn new(config: &ClientConfig) -> Result<Self, LauncherError> {
        Ok(Self::with_api(config.resolve_api()?, config))
    }

    pub fn with_api(api: Arc<dyn ToolApi>, config: &ClientConfig) -> Self {
        let (view, _) = watch::channel(ImageView::default());
        Self {
            api,
            params: ParameterModel::new(config),
            scheduler: PreviewScheduler::new(Duration::from_millis(config.debounce_ms)),
            image: None,
            in_flight: FuturesUnordered::new(),
            view,
        }
    }

    pub fn params(&self) -> &ImageParameters {
        self.params.get()
    }

    pub fn subscribe_params(&self) -> watch::Receiver<ImageParameters> {
        self.params.subscribe()
    }

    pub fn view(&self) -> ImageView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ImageView> {
        self.view.subscribe()
    }

    pub fn is_loaded(&self) -> bool {
        self.image.is_some()
    }

    /// True while a debounce window is open or a request is outstanding.
    pub fn is_busy(&self) -> bool {
        self.scheduler.is_pending() || !self.in_flight.is_empty()
    }

    // ── Upload ───────────────────────────────────────────────────────────

    /// Upload a new source image and request its first preview.
    pub async fn upload(&mut self, file: Option<SourceFile>) -> Result<ImageUpload, LauncherError> {
        let Some(file) = file else {
            self.set_status(LauncherError::NoFileSelected.to_string());
            return Err(LauncherError::NoFileSelected);
        };
        let upload = match self.api.upload_image(&file).await {
            Ok(upload) => upload,
            Err(e) => {
                warn!("Upload of {} failed: {}", file.name, e);
                self.set_status(e.to_string());
                return Err(e);
            }
        };
        info!(
            "Loaded {} ({}x{}, {} bytes)",
            upload.filename.as_deref().unwrap_or(&file.name),
            upload.width,
            upload.height,
            upload.original_bytes
        );

        self.in_flight = FuturesUnordered::new();
        self.scheduler.reset();
        self.image = Some(upload.clone());
        self.params.load(upload.width, upload.height);
        self.view.send_replace(ImageView {
            image: Some(upload.clone()),
            ..ImageView::default()
        });
        self.refresh();
        Ok(upload)
    }

    // ── Parameter edits ──────────────────────────────────────────────────

    pub fn set_width(&mut self, width: u32) {
        let change = self.params.set_width(width);
        self.after_change(change);
    }

    pub fn set_height(&mut self, height: u32) {
        let change = self.params.set_height(height);
        self.after_change(change);
    }

    pub fn set_aspect_locked(&mut self, locked: bool) {
        let change = self.params.set_aspect_locked(locked);
        self.after_change(change);
    }

    pub fn set_quality(&mut self, quality: u8) {
        let change = self.params.set_quality(quality);
        self.after_change(change);
    }

    pub fn set_mode(&mut self, mode: ResizeMode) {
        let change = self.params.set_mode(mode);
        self.after_change(change);
    }

    pub fn set_target_kb(&mut self, target_kb: u32) {
        let change = self.params.set_target_kb(target_kb);
        self.after_change(change);
    }

    /// Apply a size preset. Ignored until an image is loaded.
    pub fn apply_preset(&mut self, width: u32, height: u32, quality: u8) {
        if !self.is_loaded() {
            return;
        }
        let change = self.params.apply_preset(width, height, quality);
        self.after_change(change);
    }

    /// Bypass the debounce window and request a preview now.
    pub fn force_refresh(&mut self) -> Option<PreviewToken> {
        self.refresh()
    }

    /// Ask the server for parameters that hit the target size, apply them,
    /// and refresh the preview.
    pub async fn auto_adjust(&mut self) -> Result<(), LauncherError> {
        let Some(image) = &self.image else {
            return Err(LauncherError::NoFileSelected);
        };
        let p = self.params.get();
        let request = AutoAdjustRequest {
            file_id: image.file_id.clone(),
            width: p.width,
            height: p.height,
            mode: p.effective_mode(),
            target_kb: p.target_kb,
        };
        match self.api.auto_adjust(&request).await {
            Ok(adjustment) => {
                debug!(
                    "Auto-adjust: quality {} scale {:.3}",
                    adjustment.quality, adjustment.scale
                );
                let change = self.params.apply_auto_adjust(&adjustment);
                self.after_change(change);
                Ok(())
            }
            Err(e) => {
                self.set_status(e.to_string());
                Err(e)
            }
        }
    }

    /// Render the final image with the committed parameters.
    pub async fn export(&mut self, format: ExportFormat) -> Result<Artifact, LauncherError> {
        let Some(image) = &self.image else {
            return Err(LauncherError::NoFileSelected);
        };
        let p = self.params.get();
        let request = ExportRequest {
            file_id: image.file_id.clone(),
            width: p.width,
            height: p.height,
            quality: p.quality,
            mode: p.effective_mode(),
            format,
        };
        match self.api.export(&request).await {
            Ok(artifact) => {
                info!("Exported {} ({} bytes)", artifact.filename, artifact.bytes.len());
                Ok(artifact)
            }
            Err(e) => {
                self.set_status(e.to_string());
                Err(e)
            }
        }
    }

    // ── Preview loop ─────────────────────────────────────────────────────

    /// Wait for the next preview event.
    ///
    /// Returns `None` when there is nothing to wait for: no open debounce
    /// window and no request in flight.
    pub async fn next_outcome(&mut self) -> Option<PreviewOutcome> {
        if !self.is_busy() {
            return None;
        }
        let step = {
            let scheduler = &self.scheduler;
            let in_flight = &mut self.in_flight;
            tokio::select! {
                biased;
                Some(reply) = in_flight.next(), if !in_flight.is_empty() => Step::Reply(reply),
                _ = scheduler.expired(), if scheduler.is_pending() => Step::Deadline,
                else => return None,
            }
        };
        match step {
            Step::Reply(reply) => Some(self.reconcile(reply)),
            Step::Deadline => {
                let token = self.scheduler.fire(self.is_loaded())?;
                self.dispatch(token);
                Some(PreviewOutcome::Issued(token))
            }
        }
    }

    /// Drive the preview loop until it is idle. Returns every outcome.
    pub async fn settle(&mut self) -> Vec<PreviewOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next_outcome().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn after_change(&mut self, change: ParamChange) {
        match change {
            ParamChange::Debounced => {
                self.scheduler.notify_changed(self.is_loaded());
            }
            ParamChange::Immediate => {
                self.refresh();
            }
            ParamChange::StatsOnly => {
                let params = self.params.get().clone();
                self.view.send_modify(|view| {
                    if let Some(preview) = &view.preview {
                        view.stats = Some(preview_stats(preview, &params));
                    }
                });
            }
        }
    }

    fn refresh(&mut self) -> Option<PreviewToken> {
        let token = self.scheduler.force_refresh(self.is_loaded())?;
        self.dispatch(token);
        Some(token)
    }

    fn dispatch(&mut self, token: PreviewToken) {
        let Some(image) = &self.image else {
            return;
        };
        let p = self.params.get();
        let request = PreviewRequest {
            file_id: image.file_id.clone(),
            width: p.width,
            height: p.height,
            quality: p.quality,
            mode: p.effective_mode(),
        };
        trace!("Dispatching preview {:?}", token);
        let api = Arc::clone(&self.api);
        self.in_flight.push(Box::pin(async move {
            let result = api.preview(&request).await;
            (token, request, result)
        }));
    }

    fn reconcile(&mut self, (token, request, result): PreviewReply) -> PreviewOutcome {
        if !self.scheduler.is_current(token) {
            debug!("Discarding stale preview {:?}", token);
            return PreviewOutcome::Discarded(token);
        }
        match result {
            Ok(response) => {
                let mut params = self.params.get().clone();
                params.quality = request.quality;
                let stats = preview_stats(&response, &params);
                self.view.send_modify(|view| {
                    view.preview = Some(response);
                    view.stats = Some(stats);
                    view.applied = Some(token);
                    view.status = None;
                });
                PreviewOutcome::Applied(token)
            }
            Err(e) if e.is_transient() => {
                debug!("Preview {:?} failed transiently: {}", token, e);
                PreviewOutcome::Dropped(token)
            }
            Err(e) => {
                warn!("Preview rejected: {}", e);
                self.scheduler.halt();
                let message = e.to_string();
                self.set_status(message.clone());
                PreviewOutcome::Rejected { token, message }
            }
        }
    }

    fn set_status(&self, message: String) {
        self.view.send_modify(|view| view.status = Some(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::TargetStatus;
    use crate::testing::{echo_preview, ScriptedApi};
    use std::sync::atomic::Ordering;

    fn config() -> ClientConfig {
        ClientConfig::default()
    }

    fn photo() -> Option<SourceFile> {
        Some(SourceFile::from_bytes("photo.jpg", vec![0xFF, 0xD8, 0xFF]))
    }

    async fn loaded(api: &Arc<ScriptedApi>) -> ImageSizer {
        let dyn_api: Arc<dyn ToolApi> = api.clone();
        let mut sizer = ImageSizer::with_api(dyn_api, &config());
        sizer.upload(photo()).await.unwrap();
        sizer.settle().await;
        sizer
    }

    #[tokio::test(start_paused = true)]
    async fn upload_requests_initial_preview() {
        let api = Arc::new(ScriptedApi::default());
        let sizer = loaded(&api).await;
        let previews = api.previews();
        assert_eq!(previews.len(), 1);
        assert_eq!((previews[0].width, previews[0].height), (4000, 3000));
        let view = sizer.view();
        assert_eq!(view.applied.map(PreviewToken::value), Some(1));
        assert_eq!(view.stats.unwrap().quality, 85);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_without_image_send_nothing() {
        let api = Arc::new(ScriptedApi::default());
        let dyn_api: Arc<dyn ToolApi> = api.clone();
        let mut sizer = ImageSizer::with_api(dyn_api, &config());
        sizer.set_width(640);
        sizer.apply_preset(1080, 1080, 80);
        assert_eq!(sizer.force_refresh(), None);
        assert!(sizer.settle().await.is_empty());
        assert!(api.previews().is_empty());
        assert_eq!(sizer.params().width, 640);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_changes_coalesce_into_one_request() {
        let api = Arc::new(ScriptedApi::default());
        let mut sizer = loaded(&api).await;
        let start = tokio::time::Instant::now();

        for (i, w) in [3000u32, 2500, 2000, 1600, 1200].into_iter().enumerate() {
            if i > 0 {
                tokio::time::advance(Duration::from_millis(50)).await;
            }
            sizer.set_width(w);
            sizer.set_quality(60 + i as u8);
        }
        let outcomes = sizer.settle().await;

        let token = sizer.scheduler.latest().unwrap();
        assert_eq!(token.value(), 2);
        assert_eq!(
            outcomes,
            vec![PreviewOutcome::Issued(token), PreviewOutcome::Applied(token)]
        );
        let previews = api.previews();
        assert_eq!(previews.len(), 2);
        let last = &previews[1];
        assert_eq!((last.width, last.height, last.quality), (1200, 900, 64));
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_response_is_discarded() {
        let api = Arc::new(ScriptedApi::default());
        let mut sizer = loaded(&api).await;
        let mut gate = api.gate_previews();

        sizer.apply_preset(1920, 1080, 90);
        sizer.apply_preset(1280, 720, 80);
        let t2 = sizer.scheduler.latest().unwrap();

        // Poll both requests into the fake.
        let none = tokio::time::timeout(Duration::from_millis(1), sizer.next_outcome()).await;
        assert!(none.is_err());
        let a = gate.recv().await.unwrap();
        let b = gate.recv().await.unwrap();
        let (first, second) = if a.request.width == 1920 { (a, b) } else { (b, a) };
        assert_eq!(first.request.width, 1920);
        assert_eq!(second.request.width, 1280);

        let second_response = echo_preview(&second.request);
        second.reply.send(Ok(second_response.clone())).unwrap();
        assert_eq!(sizer.next_outcome().await, Some(PreviewOutcome::Applied(t2)));

        first.reply.send(Ok(echo_preview(&first.request))).unwrap();
        let late = sizer.next_outcome().await.unwrap();
        assert!(matches!(late, PreviewOutcome::Discarded(t) if t < t2));

        let view = sizer.view();
        assert_eq!(view.applied, Some(t2));
        assert_eq!(view.preview, Some(second_response));
        assert_eq!(view.stats.unwrap().width, 1280);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_leaves_view_unchanged() {
        let api = Arc::new(ScriptedApi::default());
        let mut sizer = loaded(&api).await;
        let before = sizer.view();
        api.preview_results
            .lock()
            .unwrap()
            .push_back(Err(LauncherError::PreviewTransient {
                detail: "HTTP 502 Bad Gateway".into(),
            }));

        sizer.set_quality(50);
        let outcomes = sizer.settle().await;
        assert!(matches!(outcomes.last(), Some(PreviewOutcome::Dropped(_))));
        assert_eq!(sizer.view(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn structured_error_halts_until_explicit_action() {
        let api = Arc::new(ScriptedApi::default());
        let mut sizer = loaded(&api).await;
        api.preview_results
            .lock()
            .unwrap()
            .push_back(Err(LauncherError::PreviewRejected {
                message: "Image too large".into(),
            }));

        sizer.set_width(2000);
        sizer.settle().await;
        assert_eq!(sizer.view().status.as_deref(), Some("Image too large"));

        sizer.set_width(1000);
        assert!(sizer.settle().await.is_empty());
        assert_eq!(api.previews().len(), 2);

        sizer.apply_preset(800, 600, 85);
        let outcomes = sizer.settle().await;
        assert!(matches!(outcomes.last(), Some(PreviewOutcome::Applied(_))));
        assert_eq!(sizer.view().status, None);

        sizer.set_width(640);
        sizer.settle().await;
        assert_eq!(api.previews().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn param_subscribers_follow_edits_before_the_preview() {
        let api = Arc::new(ScriptedApi::default());
        let mut sizer = loaded(&api).await;
        let mut params = sizer.subscribe_params();
        let mut view = sizer.subscribe_view();
        view.mark_unchanged();

        sizer.set_width(2000);
        assert!(params.has_changed().unwrap());
        let snapshot = params.borrow_and_update().clone();
        assert_eq!((snapshot.width, snapshot.height), (2000, 1500));
        assert!(!view.has_changed().unwrap());

        sizer.settle().await;
        assert!(view.has_changed().unwrap());
        assert_eq!(view.borrow().stats.as_ref().unwrap().width, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn target_change_recomputes_stats_without_request() {
        let api = Arc::new(ScriptedApi::default());
        let mut sizer = loaded(&api).await;
        // The fake estimates 4000 * 3000 * 85 / 400 = 2,550,000 bytes.
        sizer.set_target_kb(1000);
        assert!(sizer.settle().await.is_empty());
        let stats = sizer.view().stats.unwrap();
        assert_eq!(stats.deviation.status, TargetStatus::Over);
        assert_eq!(api.previews().len(), 1);

        sizer.set_target_kb(3000);
        let stats = sizer.view().stats.unwrap();
        assert_eq!(stats.deviation.status, TargetStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_adjust_applies_quality_and_refreshes() {
        let api = Arc::new(ScriptedApi::default());
        let mut sizer = loaded(&api).await;
        *api.auto_adjust_result.lock().unwrap() = Some(Ok(crate::api::AutoAdjustment {
            quality: 55,
            scale: 0.5,
            width: 2000,
            height: 1500,
        }));

        sizer.auto_adjust().await.unwrap();
        sizer.settle().await;
        let last = api.previews().pop().unwrap();
        assert_eq!((last.width, last.height, last.quality), (2000, 1500, 55));
        assert_eq!(api.auto_adjusts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn export_uses_committed_parameters() {
        let api = Arc::new(ScriptedApi::default());
        let mut sizer = loaded(&api).await;
        sizer.set_aspect_locked(false);
        sizer.set_mode(ResizeMode::Crop);
        sizer.set_width(1000);
        sizer.set_height(1000);

        let artifact = sizer.export(ExportFormat::Png).await.unwrap();
        assert_eq!(artifact.filename, "photo_resized.jpg");
        let req = api.export_requests.lock().unwrap()[0].clone();
        assert_eq!((req.width, req.height), (1000, 1000));
        assert_eq!(req.mode, ResizeMode::Crop);
        assert_eq!(req.format, ExportFormat::Png);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_upload_sets_status_and_stays_unloaded() {
        let api = Arc::new(ScriptedApi::default());
        *api.upload_result.lock().unwrap() = Some(Err(LauncherError::Upload {
            message: "Unsupported file type".into(),
        }));
        let dyn_api: Arc<dyn ToolApi> = api.clone();
        let mut sizer = ImageSizer::with_api(dyn_api, &config());

        assert!(sizer.upload(photo()).await.is_err());
        assert!(!sizer.is_loaded());
        assert_eq!(
            sizer.view().status.as_deref(),
            Some("Upload failed: Unsupported file type")
        );
        assert!(matches!(
            sizer.upload(None).await,
            Err(LauncherError::NoFileSelected)
        ));
    }
}
