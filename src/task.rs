//! Conversion task lifecycle.
//!
//! ```text
//! Created ──submit──▶ Uploading ──task id──▶ Streaming ──done──▶ Completed
//!                         │                     │  ▲
//!                         │ upload error        │  └─ progress
//!                         ▼                     ▼
//!                       Failed ◀──── error event / connection lost
//! ```
//!
//! [`TaskController`] owns exactly one [`Task`] at a time. A new submission
//! detaches the previous task's stream and starts over from `Created`, so
//! events still in flight for the abandoned id are dropped on arrival.
//!
//! Stream events reach the controller through an `mpsc` channel and are
//! applied by [`TaskController::apply_event`], a synchronous transition
//! function. `Completed` triggers exactly one follow-up fetch: the summary
//! for document conversion, the artifact itself for GIF conversion. A failed
//! fetch is recorded on the outcome; the task stays `Completed`.

use crate::api::{ConversionRequest, ResultSummary, TaskId, ToolApi};
use crate::config::{ClientConfig, Tool};
use crate::error::LauncherError;
use crate::progress::{DoneSummary, NoopObserver, ObserverRef, Progress, ProgressEvent};
use crate::source::Artifact;
use crate::stream::{ProgressStream, StreamHandle, TaggedEvent};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Lifecycle state of a conversion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Created,
    Uploading,
    Streaming,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Uploading => "uploading",
            TaskState::Streaming => "streaming",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The controller's current task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Task {
    /// Assigned by the server once the upload is accepted.
    pub id: Option<TaskId>,
    pub state: TaskState,
    pub last_progress: Option<Progress>,
    /// Failure message when `state` is `Failed`.
    pub error: Option<String>,
    /// Payload of the `done` event.
    pub done: Option<DoneSummary>,
}

/// What the post-completion fetch produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    Summary(ResultSummary),
    Artifact(Artifact),
}

/// A completed task together with its fetched result.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub done: DoneSummary,
    pub result: Option<TaskResult>,
    /// Set when the follow-up fetch failed.
    pub result_error: Option<String>,
}

impl TaskOutcome {
    pub fn summary(&self) -> Option<&ResultSummary> {
        match &self.result {
            Some(TaskResult::Summary(s)) => Some(s),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match &self.result {
            Some(TaskResult::Artifact(a)) => Some(a),
            _ => None,
        }
    }
}

/// Effect of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Wrong task id, keepalive, or the task is no longer streaming.
    Ignored,
    Progressed(Progress),
    Completed,
    Failed(String),
}

/// Drives a single conversion task at a time for one tool.
pub struct TaskController {
    api: Arc<dyn ToolApi>,
    tool: Tool,
    task: Task,
    stream: ProgressStream,
    events: mpsc::UnboundedReceiver<TaggedEvent>,
    handle: Option<StreamHandle>,
    outcome: Option<TaskOutcome>,
    observer: ObserverRef,
}

impl fmt::Debug for TaskController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskController")
            .field("tool", &self.tool)
            .field("task", &self.task)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl TaskController {
    pub fn new(config: &ClientConfig, tool: Tool) -> Result<Self, LauncherError> {
        Ok(Self::with_api(config.resolve_api()?, tool))
    }

    pub fn with_api(api: Arc<dyn ToolApi>, tool: Tool) -> Self {
        let (stream, events) = ProgressStream::new(Arc::clone(&api), tool);
        Self {
            api,
            tool,
            task: Task::default(),
            stream,
            events,
            handle: None,
            outcome: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: ObserverRef) -> Self {
        self.observer = observer;
        self
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn state(&self) -> TaskState {
        self.task.state
    }

    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    /// Start a new task.
    ///
    /// `None` means no file was selected: nothing is sent and the current
    /// task is left untouched. Otherwise any previous task is abandoned, the
    /// file is uploaded, and on acceptance the progress stream is attached.
    pub async fn submit(
        &mut self,
        request: Option<ConversionRequest>,
    ) -> Result<TaskId, LauncherError> {
        let Some(request) = request else {
            self.observer.on_error(&LauncherError::NoFileSelected.to_string());
            return Err(LauncherError::NoFileSelected);
        };
        if request.tool != self.tool {
            return Err(LauncherError::InvalidConfig(format!(
                "{} request submitted to the {} controller",
                request.tool, self.tool
            )));
        }

        self.detach_stream();
        self.outcome = None;
        let previous = self.task.state;
        self.task = Task::default();
        self.observer
            .on_state_change(None, previous, TaskState::Created);
        self.set_state(TaskState::Uploading);

        match self.api.start_conversion(&request).await {
            Ok(id) => {
                info!("{} task {} accepted", self.tool, id);
                self.task.id = Some(id.clone());
                self.handle = Some(self.stream.attach(id.clone()));
                self.set_state(TaskState::Streaming);
                Ok(id)
            }
            Err(e) => {
                warn!("{} submission failed: {}", self.tool, e);
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Apply one stream event to the current task.
    ///
    /// Events for another task id, or arriving after the task left
    /// `Streaming`, are ignored.
    pub fn apply_event(&mut self, tagged: TaggedEvent) -> Transition {
        if self.task.id.as_ref() != Some(&tagged.task_id) {
            trace!("Dropping event for abandoned task {}", tagged.task_id);
            return Transition::Ignored;
        }
        if self.task.state != TaskState::Streaming {
            trace!("Dropping event for {} task", self.task.state);
            return Transition::Ignored;
        }

        match tagged.event {
            ProgressEvent::Keepalive => Transition::Ignored,
            ProgressEvent::Progress(progress) => {
                self.task.last_progress = Some(progress.clone());
                self.observer.on_progress(&progress);
                self.set_state(TaskState::Streaming);
                Transition::Progressed(progress)
            }
            ProgressEvent::Done(done) => {
                self.task.done = Some(done);
                self.detach_stream();
                self.set_state(TaskState::Completed);
                Transition::Completed
            }
            ProgressEvent::Error { message } => {
                self.detach_stream();
                self.fail(message.clone());
                Transition::Failed(message)
            }
        }
    }

    /// Wait for the next event that changes the task.
    ///
    /// Returns `None` when the task is not streaming. On `Completed` the
    /// result fetch has already run when this returns.
    pub async fn next_transition(&mut self) -> Option<Transition> {
        while self.task.state == TaskState::Streaming {
            let tagged = self.events.recv().await?;
            let transition = self.apply_event(tagged);
            match transition {
                Transition::Ignored => continue,
                Transition::Completed => {
                    self.fetch_result().await;
                    return Some(transition);
                }
                other => return Some(other),
            }
        }
        None
    }

    /// Submit and drive the task to a terminal state.
    pub async fn run(&mut self, request: ConversionRequest) -> Result<TaskOutcome, LauncherError> {
        self.submit(Some(request)).await?;
        while let Some(transition) = self.next_transition().await {
            match transition {
                Transition::Completed => {
                    return self.outcome.clone().ok_or_else(|| {
                        LauncherError::Internal("completed without an outcome".into())
                    })
                }
                Transition::Failed(message) => return Err(LauncherError::Stream { message }),
                Transition::Progressed(_) | Transition::Ignored => {}
            }
        }
        Err(LauncherError::ConnectionLost)
    }

    /// Fetch the finished artifact of the current task.
    ///
    /// GIF results were already downloaded on completion and are returned
    /// from memory.
    pub async fn download(&self) -> Result<Artifact, LauncherError> {
        let id = match (&self.task.id, self.task.state) {
            (Some(id), TaskState::Completed) => id,
            _ => {
                return Err(LauncherError::Download {
                    message: format!("no completed task (state: {})", self.task.state),
                })
            }
        };
        if let Some(artifact) = self.outcome.as_ref().and_then(TaskOutcome::artifact) {
            return Ok(artifact.clone());
        }
        self.api.download(self.tool, id).await
    }

    /// Abandon the current task and return to an empty `Created` state.
    pub fn reset(&mut self) {
        self.detach_stream();
        self.task = Task::default();
        self.outcome = None;
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn fetch_result(&mut self) {
        let Some(task_id) = self.task.id.clone() else {
            return;
        };
        debug!("Fetching result for {}", task_id);
        let fetched = match self.tool {
            Tool::Vid2Gif => self
                .api
                .download(self.tool, &task_id)
                .await
                .map(TaskResult::Artifact),
            Tool::Pdf2Md | Tool::ImgSizer => self
                .api
                .fetch_summary(self.tool, &task_id)
                .await
                .map(TaskResult::Summary),
        };

        let (result, result_error) = match fetched {
            Ok(r) => (Some(r), None),
            Err(e) => {
                warn!("Result fetch for {} failed: {}", task_id, e);
                self.observer.on_error(&e.to_string());
                (None, Some(e.to_string()))
            }
        };
        let outcome = TaskOutcome {
            task_id,
            done: self.task.done.clone().unwrap_or_default(),
            result,
            result_error,
        };
        self.observer.on_complete(&outcome);
        self.outcome = Some(outcome);
    }

    fn fail(&mut self, message: String) {
        self.observer.on_error(&message);
        self.task.error = Some(message);
        self.set_state(TaskState::Failed);
    }

    fn set_state(&mut self, to: TaskState) {
        let from = self.task.state;
        self.task.state = to;
        if from != to {
            debug!("{} task {:?}: {} -> {}", self.tool, self.task.id, from, to);
        }
        self.observer.on_state_change(self.task.id.as_ref(), from, to);
    }

    fn detach_stream(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stream.detach(&handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{GifOptions, SizeField};
    use crate::source::SourceFile;
    use crate::testing::ScriptedApi;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<TaskState>>,
        errors: Mutex<Vec<String>>,
    }

    impl crate::progress::TaskObserver for Recorder {
        fn on_state_change(&self, _id: Option<&TaskId>, _from: TaskState, to: TaskState) {
            self.states.lock().unwrap().push(to);
        }
        fn on_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    fn pdf() -> ConversionRequest {
        ConversionRequest::document(SourceFile::from_bytes("paper.pdf", b"%PDF-1.7".to_vec()))
    }

    fn progress(step: u64, total: u64) -> ProgressEvent {
        ProgressEvent::Progress(Progress {
            step: Some(step),
            total: Some(total),
            status: Some(format!("Page {step}/{total}")),
        })
    }

    fn controller(api: &Arc<ScriptedApi>, tool: Tool) -> (TaskController, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let api: Arc<dyn ToolApi> = api.clone();
        let ctl = TaskController::with_api(api, tool).with_observer(recorder.clone());
        (ctl, recorder)
    }

    #[tokio::test]
    async fn lifecycle_reaches_completed_with_one_fetch() {
        let api = Arc::new(ScriptedApi::default());
        api.script_events(
            "task-1",
            vec![
                Ok(progress(1, 2)),
                Ok(progress(2, 2)),
                Ok(ProgressEvent::Done(DoneSummary {
                    size_mb: None,
                    output_size: Some(800_000),
                })),
            ],
        );
        let (mut ctl, rec) = controller(&api, Tool::Pdf2Md);

        let outcome = ctl.run(pdf()).await.unwrap();

        assert_eq!(
            *rec.states.lock().unwrap(),
            vec![
                TaskState::Created,
                TaskState::Uploading,
                TaskState::Streaming,
                TaskState::Streaming,
                TaskState::Streaming,
                TaskState::Completed,
            ]
        );
        assert_eq!(ctl.state(), TaskState::Completed);
        assert_eq!(api.summaries.load(Ordering::SeqCst), 1);
        assert_eq!(api.downloads.load(Ordering::SeqCst), 0);
        assert_eq!(
            outcome.summary().unwrap().output_size,
            SizeField::Bytes(800_000)
        );
        assert_eq!(ctl.task().last_progress.as_ref().unwrap().percent(), Some(100));
        assert!(ctl.next_transition().await.is_none());
        assert_eq!(api.summaries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_after_progress_fails_and_freezes() {
        let api = Arc::new(ScriptedApi::default());
        api.script_events(
            "task-1",
            vec![
                Ok(progress(1, 3)),
                Ok(ProgressEvent::Error {
                    message: "Page 2 could not be parsed".into(),
                }),
                Ok(progress(2, 3)),
                Ok(ProgressEvent::Done(DoneSummary::default())),
            ],
        );
        let (mut ctl, rec) = controller(&api, Tool::Pdf2Md);

        let err = ctl.run(pdf()).await.unwrap_err();
        assert_eq!(err.to_string(), "Page 2 could not be parsed");
        assert_eq!(ctl.state(), TaskState::Failed);
        assert_eq!(ctl.task().last_progress.as_ref().unwrap().step, Some(1));

        // Late messages for the same id change nothing.
        let id = ctl.task().id.clone().unwrap();
        let late = ctl.apply_event(TaggedEvent {
            task_id: id,
            event: ProgressEvent::Done(DoneSummary::default()),
        });
        assert_eq!(late, Transition::Ignored);
        assert_eq!(ctl.state(), TaskState::Failed);
        assert_eq!(api.summaries.load(Ordering::SeqCst), 0);
        assert_eq!(
            rec.states.lock().unwrap().last(),
            Some(&TaskState::Failed)
        );
    }

    #[tokio::test]
    async fn dropped_connection_fails_with_fixed_message() {
        let api = Arc::new(ScriptedApi::default());
        api.script_events("task-1", vec![Ok(progress(1, 2))]);
        let (mut ctl, rec) = controller(&api, Tool::Pdf2Md);

        let err = ctl.run(pdf()).await.unwrap_err();
        assert_eq!(err.to_string(), crate::error::CONNECTION_LOST);
        assert_eq!(
            rec.errors.lock().unwrap().as_slice(),
            [crate::error::CONNECTION_LOST.to_string()]
        );
    }

    #[tokio::test]
    async fn missing_file_creates_no_task() {
        let api = Arc::new(ScriptedApi::default());
        let (mut ctl, rec) = controller(&api, Tool::Pdf2Md);

        let err = ctl.submit(None).await.unwrap_err();
        assert!(matches!(err, LauncherError::NoFileSelected));
        assert_eq!(ctl.task(), &Task::default());
        assert_eq!(api.conversions.load(Ordering::SeqCst), 0);
        assert!(rec.states.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_upload_fails_without_stream() {
        let api = Arc::new(ScriptedApi::default());
        api.start_results.lock().unwrap().push_back(Err(LauncherError::Upload {
            message: "Unsupported file type".into(),
        }));
        let (mut ctl, _rec) = controller(&api, Tool::Pdf2Md);

        assert!(ctl.submit(Some(pdf())).await.is_err());
        assert_eq!(ctl.state(), TaskState::Failed);
        assert_eq!(ctl.task().id, None);
        assert_eq!(
            ctl.task().error.as_deref(),
            Some("Upload failed: Unsupported file type")
        );
        assert!(ctl.next_transition().await.is_none());
    }

    #[tokio::test]
    async fn resubmit_abandons_previous_task_events() {
        let api = Arc::new(ScriptedApi::default());
        let first = api.script_progress("task-1");
        api.script_events(
            "task-2",
            vec![Ok(ProgressEvent::Done(DoneSummary::default()))],
        );
        let (mut ctl, _rec) = controller(&api, Tool::Pdf2Md);

        ctl.submit(Some(pdf())).await.unwrap();
        let _ = first.send(Ok(progress(1, 5)));
        let t = ctl.next_transition().await.unwrap();
        assert!(matches!(t, Transition::Progressed(_)));

        let second = ctl.submit(Some(pdf())).await.unwrap();
        assert_eq!(second.as_str(), "task-2");
        assert_eq!(ctl.task().last_progress, None);

        let stale = ctl.apply_event(TaggedEvent {
            task_id: "task-1".into(),
            event: progress(5, 5),
        });
        assert_eq!(stale, Transition::Ignored);

        assert_eq!(ctl.next_transition().await, Some(Transition::Completed));
        assert_eq!(ctl.outcome().unwrap().task_id.as_str(), "task-2");
    }

    #[tokio::test]
    async fn gif_completion_downloads_artifact_once() {
        let api = Arc::new(ScriptedApi::default());
        api.script_events(
            "task-1",
            vec![
                Ok(ProgressEvent::Progress(Progress {
                    step: None,
                    total: None,
                    status: Some("Creating GIF...".into()),
                })),
                Ok(ProgressEvent::Done(DoneSummary {
                    size_mb: Some(1.8),
                    output_size: None,
                })),
            ],
        );
        let (mut ctl, _rec) = controller(&api, Tool::Vid2Gif);
        let request = ConversionRequest::gif(
            SourceFile::from_bytes("clip.mp4", vec![0; 16]),
            &GifOptions::default(),
        );

        let outcome = ctl.run(request).await.unwrap();
        assert_eq!(outcome.done.size_mb, Some(1.8));
        assert_eq!(outcome.artifact().unwrap().filename, "animation.gif");

        let again = ctl.download().await.unwrap();
        assert_eq!(again.bytes, b"GIF89a");
        assert_eq!(api.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(api.summaries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn result_fetch_failure_keeps_completed() {
        let api = Arc::new(ScriptedApi::default());
        *api.summary_result.lock().unwrap() = Some(Err(LauncherError::ResultFetch {
            message: "HTTP 500 Internal Server Error".into(),
        }));
        api.script_events(
            "task-1",
            vec![Ok(ProgressEvent::Done(DoneSummary::default()))],
        );
        let (mut ctl, _rec) = controller(&api, Tool::Pdf2Md);

        let outcome = ctl.run(pdf()).await.unwrap();
        assert_eq!(ctl.state(), TaskState::Completed);
        assert!(outcome.result.is_none());
        assert_eq!(
            outcome.result_error.as_deref(),
            Some("Could not load result: HTTP 500 Internal Server Error")
        );
    }

    #[tokio::test]
    async fn reset_returns_to_empty_task() {
        let api = Arc::new(ScriptedApi::default());
        let _tx = api.script_progress("task-1");
        let (mut ctl, _rec) = controller(&api, Tool::Pdf2Md);
        ctl.submit(Some(pdf())).await.unwrap();
        ctl.reset();
        assert_eq!(ctl.task(), &Task::default());
        assert!(ctl.download().await.is_err());
    }
}
