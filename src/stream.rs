//! Progress stream attachment.
//!
//! ## Why a channel?
//!
//! A conversion's progress arrives over a long-lived server-sent event
//! connection. Rather than invoking callbacks from inside the network code,
//! [`ProgressStream`] runs one pump task per attached task id and pushes
//! typed [`TaggedEvent`]s onto an `mpsc` channel. The
//! [`crate::task::TaskController`] owns the receiving end and applies each
//! event through a plain state-transition function, so the state machine can
//! be driven in tests by sending events directly.
//!
//! ## Closure rules
//!
//! * Keepalives are consumed here and never forwarded.
//! * `Done` and `Error` are forwarded, then the pump stops.
//! * A transport error, or the connection ending without a terminal event,
//!   is forwarded as `Error` with [`CONNECTION_LOST`]. There is no retry.
//! * After [`ProgressStream::detach`] nothing more is sent for that handle.

use crate::api::{TaskId, ToolApi};
use crate::config::Tool;
use crate::error::CONNECTION_LOST;
use crate::progress::ProgressEvent;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

/// A progress event labelled with the task it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub task_id: TaskId,
    pub event: ProgressEvent,
}

/// Handle to one attached stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    task_id: TaskId,
    closed: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl StreamHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// True once the stream delivered a terminal event or was detached.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn same_as(&self, other: &StreamHandle) -> bool {
        Arc::ptr_eq(&self.closed, &other.closed)
    }
}

/// Attaches progress streams for one tool and multiplexes their events.
pub struct ProgressStream {
    api: Arc<dyn ToolApi>,
    tool: Tool,
    tx: mpsc::UnboundedSender<TaggedEvent>,
    active: HashMap<TaskId, StreamHandle>,
}

impl ProgressStream {
    /// Create the stream multiplexer and the receiver its events arrive on.
    pub fn new(api: Arc<dyn ToolApi>, tool: Tool) -> (Self, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                api,
                tool,
                tx,
                active: HashMap::new(),
            },
            rx,
        )
    }

    /// Open the progress channel for `task_id`.
    ///
    /// An existing channel for the same id is detached first. Must be called
    /// from within a tokio runtime.
    pub fn attach(&mut self, task_id: TaskId) -> StreamHandle {
        if let Some(previous) = self.active.remove(&task_id) {
            debug!("Replacing progress stream for {}", task_id);
            close(&previous);
        }

        let closed = Arc::new(AtomicBool::new(false));
        let join = tokio::spawn(pump(
            Arc::clone(&self.api),
            self.tool,
            task_id.clone(),
            self.tx.clone(),
            Arc::clone(&closed),
        ));
        let handle = StreamHandle {
            task_id: task_id.clone(),
            closed,
            abort: join.abort_handle(),
        };
        self.active.insert(task_id, handle.clone());
        handle
    }

    /// Stop delivering events for `handle`. Safe to call more than once.
    pub fn detach(&mut self, handle: &StreamHandle) {
        if let Some(current) = self.active.get(&handle.task_id) {
            if current.same_as(handle) {
                self.active.remove(&handle.task_id);
            }
        }
        close(handle);
    }

    /// Number of streams still delivering events.
    pub fn active_count(&self) -> usize {
        self.active.values().filter(|h| !h.is_closed()).count()
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        for handle in self.active.values() {
            close(handle);
        }
    }
}

fn close(handle: &StreamHandle) {
    if !handle.closed.swap(true, Ordering::SeqCst) {
        trace!("Detached progress stream for {}", handle.task_id);
        handle.abort.abort();
    }
}

async fn pump(
    api: Arc<dyn ToolApi>,
    tool: Tool,
    task_id: TaskId,
    tx: mpsc::UnboundedSender<TaggedEvent>,
    closed: Arc<AtomicBool>,
) {
    let send = |event: ProgressEvent| {
        if closed.load(Ordering::SeqCst) {
            return false;
        }
        tx.send(TaggedEvent {
            task_id: task_id.clone(),
            event,
        })
        .is_ok()
    };

    let mut events = match api.open_progress(tool, &task_id).await {
        Ok(events) => events,
        Err(e) => {
            warn!("Could not open progress stream for {}: {}", task_id, e);
            send(ProgressEvent::Error {
                message: e.to_string(),
            });
            closed.store(true, Ordering::SeqCst);
            return;
        }
    };
    info!("Progress stream attached for {}", task_id);

    while let Some(item) = events.next().await {
        match item {
            Ok(ProgressEvent::Keepalive) => trace!("keepalive for {}", task_id),
            Ok(event) => {
                let terminal = event.is_terminal();
                if !send(event) {
                    return;
                }
                if terminal {
                    debug!("Progress stream for {} finished", task_id);
                    closed.store(true, Ordering::SeqCst);
                    return;
                }
            }
            Err(e) => {
                warn!("Progress stream for {} failed: {}", task_id, e);
                break;
            }
        }
    }

    send(ProgressEvent::Error {
        message: CONNECTION_LOST.to_string(),
    });
    closed.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LauncherError;
    use crate::progress::{DoneSummary, Progress};
    use crate::testing::ScriptedApi;

    fn progress(step: u64, total: u64) -> ProgressEvent {
        ProgressEvent::Progress(Progress {
            step: Some(step),
            total: Some(total),
            status: None,
        })
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<TaggedEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            let terminal = ev.event.is_terminal();
            out.push(ev.event);
            if terminal {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn keepalives_are_dropped_and_done_closes() {
        let api = Arc::new(ScriptedApi::default());
        api.script_events(
            "t1",
            vec![
                Ok(ProgressEvent::Keepalive),
                Ok(progress(1, 2)),
                Ok(ProgressEvent::Keepalive),
                Ok(ProgressEvent::Done(DoneSummary::default())),
                Ok(progress(2, 2)),
            ],
        );
        let (mut ps, mut rx) = ProgressStream::new(api, Tool::Pdf2Md);
        let handle = ps.attach("t1".into());

        let events = drain(&mut rx).await;
        assert_eq!(
            events,
            vec![progress(1, 2), ProgressEvent::Done(DoneSummary::default())]
        );
        tokio::task::yield_now().await;
        assert!(handle.is_closed());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn end_without_terminal_event_is_connection_lost() {
        let api = Arc::new(ScriptedApi::default());
        api.script_events("t1", vec![Ok(progress(1, 3))]);
        let (mut ps, mut rx) = ProgressStream::new(api, Tool::Pdf2Md);
        ps.attach("t1".into());

        let events = drain(&mut rx).await;
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Error {
                message: CONNECTION_LOST.to_string()
            })
        );
    }

    #[tokio::test]
    async fn transport_error_is_connection_lost() {
        let api = Arc::new(ScriptedApi::default());
        api.script_events(
            "t1",
            vec![Err(LauncherError::ConnectionLost), Ok(progress(1, 1))],
        );
        let (mut ps, mut rx) = ProgressStream::new(api, Tool::Vid2Gif);
        ps.attach("t1".into());

        let events = drain(&mut rx).await;
        assert_eq!(
            events,
            vec![ProgressEvent::Error {
                message: CONNECTION_LOST.to_string()
            }]
        );
    }

    #[tokio::test]
    async fn detach_is_idempotent_and_silences_the_stream() {
        let api = Arc::new(ScriptedApi::default());
        let sender = api.script_progress("t1");
        let (mut ps, mut rx) = ProgressStream::new(api, Tool::Pdf2Md);
        let handle = ps.attach("t1".into());

        sender.send(Ok(progress(1, 4))).unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, progress(1, 4));

        ps.detach(&handle);
        ps.detach(&handle);
        assert!(handle.is_closed());
        assert_eq!(ps.active_count(), 0);

        let _ = sender.send(Ok(progress(2, 4)));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reattach_replaces_previous_channel() {
        let api = Arc::new(ScriptedApi::default());
        let first = api.script_progress("t1");
        let second = api.script_progress("t1");
        let (mut ps, mut rx) = ProgressStream::new(api, Tool::Pdf2Md);

        let old = ps.attach("t1".into());
        tokio::task::yield_now().await;
        let new = ps.attach("t1".into());
        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert_eq!(ps.active_count(), 1);

        let _ = first.send(Ok(progress(1, 9)));
        second
            .send(Ok(ProgressEvent::Error {
                message: "boom".into(),
            }))
            .unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(
            ev.event,
            ProgressEvent::Error {
                message: "boom".into()
            }
        );
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
