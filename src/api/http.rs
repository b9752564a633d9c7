//! reqwest implementation of [`ToolApi`].
//!
//! ## Two clients
//!
//! Request/response calls share one client with an overall timeout. The
//! progress stream uses a second client that only bounds the connect phase:
//! a conversion may legitimately run for many minutes while the server sends
//! nothing but keepalives, and an overall timeout would cut it off.
//!
//! ## Error bodies
//!
//! The server signals failures with an `error` string in a JSON body,
//! sometimes alongside a non-success status and sometimes not. Every call
//! checks for that field first; only when it is absent does the HTTP status
//! decide, and a body that is not JSON at all gets a generic message.

use super::sse::SseParser;
use super::{
    AutoAdjustRequest, AutoAdjustment, ConversionRequest, EventSource, ExportRequest,
    ImageUpload, PreviewRequest, PreviewResponse, ResultSummary, TaskId, ToolApi,
};
use crate::config::{ClientConfig, Tool};
use crate::error::LauncherError;
use crate::progress::ProgressEvent;
use crate::source::{Artifact, SourceFile};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Message used when a JSON endpoint answers with something unparseable.
const UNEXPECTED_RESPONSE: &str = "Unexpected response from server";

static FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"filename="?(.+?)"?$"#).expect("filename regex is valid")
});

/// HTTP backend talking to the launcher server.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct StartedTask {
    task_id: TaskId,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Result<Self, LauncherError> {
        let connect = Duration::from_secs(config.connect_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(connect)
            .build()
            .map_err(|e| LauncherError::InvalidConfig(format!("HTTP client: {e}")))?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(connect)
            .build()
            .map_err(|e| LauncherError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            stream_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, tool: Tool, path: &str) -> String {
        format!("{}/api/{}/{}", self.base_url, tool.id(), path)
    }

    fn file_part(file: &SourceFile) -> Result<Part, String> {
        Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(file.mime_type())
            .map_err(|e| e.to_string())
    }

    /// Send a request whose success body is JSON and decode it.
    ///
    /// The `Err` string is ready for display.
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, String> {
        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        if let Some(message) = error_message(&body) {
            return Err(message);
        }
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        serde_json::from_slice(&body).map_err(|e| {
            debug!("Undecodable JSON body: {}", e);
            UNEXPECTED_RESPONSE.to_string()
        })
    }

    /// Send a request whose success body is a file.
    async fn send_artifact(
        &self,
        request: reqwest::RequestBuilder,
        fallback_filename: &str,
    ) -> Result<Artifact, String> {
        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(error_message(&body).unwrap_or_else(|| format!("HTTP {status}")));
        }
        Ok(Artifact {
            filename: filename_from_headers(&headers)
                .unwrap_or_else(|| fallback_filename.to_string()),
            content_type: header_str(&headers, CONTENT_TYPE.as_str()).map(str::to_string),
            bytes: body.to_vec(),
        })
    }
}

#[async_trait]
impl ToolApi for HttpApi {
    async fn upload_image(&self, file: &SourceFile) -> Result<ImageUpload, LauncherError> {
        info!("Uploading {} ({} bytes)", file.name, file.len());
        let part = Self::file_part(file).map_err(|message| LauncherError::Upload { message })?;
        let form = Form::new().part("file", part);
        let request = self
            .client
            .post(self.url(Tool::ImgSizer, Tool::ImgSizer.upload_endpoint()))
            .multipart(form);
        self.send_json(request)
            .await
            .map_err(|message| LauncherError::Upload { message })
    }

    async fn preview(&self, request: &PreviewRequest) -> Result<PreviewResponse, LauncherError> {
        trace!(
            "Preview {}x{} q{} {:?}",
            request.width,
            request.height,
            request.quality,
            request.mode
        );
        let response = self
            .client
            .post(self.url(Tool::ImgSizer, "preview"))
            .json(request)
            .send()
            .await
            .map_err(|e| LauncherError::PreviewTransient {
                detail: e.to_string(),
            })?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| LauncherError::PreviewTransient {
                detail: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(match error_message(&body) {
                Some(message) => LauncherError::PreviewRejected { message },
                None => LauncherError::PreviewTransient {
                    detail: format!("HTTP {status}"),
                },
            });
        }
        // A 200 carrying a JSON error is still a structured rejection.
        if is_json(&headers) {
            if let Some(message) = error_message(&body) {
                return Err(LauncherError::PreviewRejected { message });
            }
        }

        Ok(PreviewResponse {
            estimated_bytes: header_parse(&headers, "x-estimated-bytes").unwrap_or(0),
            width: header_parse(&headers, "x-width"),
            height: header_parse(&headers, "x-height"),
            bytes: body.to_vec(),
        })
    }

    async fn auto_adjust(
        &self,
        request: &AutoAdjustRequest,
    ) -> Result<AutoAdjustment, LauncherError> {
        debug!("Auto-adjust towards {} KB", request.target_kb);
        let builder = self
            .client
            .post(self.url(Tool::ImgSizer, "auto-adjust"))
            .json(request);
        self.send_json(builder)
            .await
            .map_err(|message| LauncherError::AutoAdjust { message })
    }

    async fn export(&self, request: &ExportRequest) -> Result<Artifact, LauncherError> {
        info!(
            "Exporting {}x{} q{} as {:?}",
            request.width, request.height, request.quality, request.format
        );
        let builder = self
            .client
            .post(self.url(Tool::ImgSizer, "export"))
            .json(request);
        self.send_artifact(builder, Tool::ImgSizer.fallback_filename())
            .await
            .map_err(|message| LauncherError::Export { message })
    }

    async fn start_conversion(
        &self,
        request: &ConversionRequest,
    ) -> Result<TaskId, LauncherError> {
        info!(
            "Submitting {} ({} bytes) to {}",
            request.file.name,
            request.file.len(),
            request.tool
        );
        let part =
            Self::file_part(&request.file).map_err(|message| LauncherError::Upload { message })?;
        let form = request
            .fields
            .iter()
            .fold(Form::new().part("file", part), |form, (k, v)| {
                form.text(k.clone(), v.clone())
            });
        let builder = self
            .client
            .post(self.url(request.tool, request.tool.upload_endpoint()))
            .multipart(form);
        let started: StartedTask = self
            .send_json(builder)
            .await
            .map_err(|message| LauncherError::Upload { message })?;
        Ok(started.task_id)
    }

    async fn open_progress(
        &self,
        tool: Tool,
        task_id: &TaskId,
    ) -> Result<EventSource, LauncherError> {
        let url = self.url(tool, &format!("progress/{task_id}"));
        debug!("Opening progress stream {}", url);
        let response = self
            .stream_client
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                warn!("Progress stream connect failed: {}", e);
                LauncherError::ConnectionLost
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(LauncherError::Stream {
                message: error_message(&body).unwrap_or_else(|| format!("HTTP {status}")),
            });
        }

        struct State<S> {
            body: S,
            parser: SseParser,
            queue: VecDeque<ProgressEvent>,
            done: bool,
        }

        let state = State {
            body: Box::pin(response.bytes_stream()),
            parser: SseParser::default(),
            queue: VecDeque::new(),
            done: false,
        };

        let events = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(event) = st.queue.pop_front() {
                    return Some((Ok(event), st));
                }
                if st.done {
                    return None;
                }
                match st.body.next().await {
                    Some(Ok(chunk)) => {
                        for frame in st.parser.push(&chunk) {
                            queue_frame(&mut st.queue, &frame.data);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Progress stream transport error: {}", e);
                        st.done = true;
                        return Some((Err(LauncherError::ConnectionLost), st));
                    }
                    None => {
                        st.done = true;
                        if let Some(frame) = st.parser.finish() {
                            queue_frame(&mut st.queue, &frame.data);
                        }
                    }
                }
            }
        });
        Ok(Box::pin(events))
    }

    async fn fetch_summary(
        &self,
        tool: Tool,
        task_id: &TaskId,
    ) -> Result<ResultSummary, LauncherError> {
        let builder = self.client.get(self.url(tool, &format!("preview/{task_id}")));
        self.send_json(builder)
            .await
            .map_err(|message| LauncherError::ResultFetch { message })
    }

    async fn download(&self, tool: Tool, task_id: &TaskId) -> Result<Artifact, LauncherError> {
        let builder = self
            .client
            .get(self.url(tool, &format!("download/{task_id}")));
        self.send_artifact(builder, tool.fallback_filename())
            .await
            .map_err(|message| LauncherError::Download { message })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn queue_frame(queue: &mut VecDeque<ProgressEvent>, data: &str) {
    if data.trim().is_empty() {
        return;
    }
    match ProgressEvent::from_payload(data) {
        Some(event) => queue.push_back(event),
        None => warn!("Skipping unrecognised progress payload: {}", data),
    }
}

/// The `error` string of a JSON body, if it has one.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value.get("error")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    header_str(headers, CONTENT_TYPE.as_str())
        .map(|ct| ct.contains("json"))
        .unwrap_or(false)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_parse<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    header_str(headers, name).and_then(|v| v.trim().parse().ok())
}

fn filename_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = header_str(headers, CONTENT_DISPOSITION.as_str())?;
    parse_content_disposition(value)
}

/// Extract the filename from a `Content-Disposition` value.
pub fn parse_content_disposition(value: &str) -> Option<String> {
    FILENAME_RE
        .captures(value.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}
