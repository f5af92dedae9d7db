//! Terminal-state callback delivery.
//!
//! One attempt per job, made after the terminal status was written. A failed
//! delivery is logged and recorded on the job as a [`TransportError`]; it
//! never changes the job's status. Whatever happens, the output file is
//! disposed of afterwards according to the retention policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use tf_core::{CallbackStatus, JobId, JobStatus, TransportError};
use tf_db::JobRecord;

use crate::context::AppContext;

/// Content type used when the output extension is unknown.
const DEFAULT_CONTENT_TYPE: &str = "video/mp4";

/// JSON body posted for a failed job.
#[derive(Debug, Serialize)]
struct FailurePayload<'a> {
    task_id: JobId,
    status: JobStatus,
    error: &'a str,
}

/// HTTP client for callback endpoints.
///
/// Holds a shared [`reqwest::Client`] so connections are reused across
/// deliveries.
pub struct CallbackClient {
    client: Client,
}

impl CallbackClient {
    /// `timeout` bounds each request end to end; `None` leaves it unbounded.
    pub fn new(timeout: Option<Duration>) -> Self {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|e| {
            tracing::warn!("Failed to build callback HTTP client: {e}");
            Client::new()
        });

        Self { client }
    }

    /// POST the output file as multipart form data with `task_id` and
    /// `status` fields.
    pub async fn send_result(
        &self,
        url: &str,
        job_id: JobId,
        output: &Path,
    ) -> Result<(), TransportError> {
        let file_error = |source| TransportError::File {
            path: output.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(output).await.map_err(file_error)?;
        let len = file.metadata().await.map_err(file_error)?.len();

        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let content_type = guess_content_type(output);

        let part = Part::stream_with_length(
            reqwest::Body::wrap_stream(ReaderStream::new(file)),
            len,
        )
        .file_name(file_name)
        .mime_str(content_type)
        .map_err(|e| request_error(url, e))?;

        let form = Form::new()
            .text("task_id", job_id.to_string())
            .text("status", JobStatus::Completed.as_str())
            .part("file", part);

        tracing::info!(job_id = %job_id, url = %url, content_type, bytes = len, "Sending result callback");

        let response = self.client.post(url).multipart(form).send().await;
        check_response(url, response).await
    }

    /// POST a JSON failure notice; no file is attached.
    pub async fn send_failure(
        &self,
        url: &str,
        job_id: JobId,
        error: &str,
    ) -> Result<(), TransportError> {
        let payload = FailurePayload {
            task_id: job_id,
            status: JobStatus::Failed,
            error,
        };

        tracing::info!(job_id = %job_id, url = %url, "Sending failure callback");

        let response = self.client.post(url).json(&payload).send().await;
        check_response(url, response).await
    }
}

fn request_error(url: &str, e: reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        message: e.to_string(),
    }
}

async fn check_response(
    url: &str,
    response: reqwest::Result<Response>,
) -> Result<(), TransportError> {
    let response = response.map_err(|e| request_error(url, e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Content type for an output file, from its extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "ts" => "video/mp2t",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Notify `url` of the terminal state of `job`, record the attempt, then
/// dispose of the output.
pub async fn deliver(ctx: &AppContext, job: &JobRecord, url: &str) {
    let outcome = match job.status {
        JobStatus::Completed => {
            let output = job
                .result
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| job.output.clone());
            ctx.callbacks.send_result(url, job.id, &output).await
        }
        JobStatus::Failed => {
            let error = job.error.as_deref().unwrap_or("Unknown error");
            ctx.callbacks.send_failure(url, job.id, error).await
        }
        status => {
            tracing::warn!(job_id = %job.id, status = %status, "Not delivering callback for a non-terminal job");
            return;
        }
    };

    let (callback_status, callback_error) = match &outcome {
        Ok(()) => {
            tracing::info!(job_id = %job.id, url = %url, "Callback delivered");
            (CallbackStatus::Delivered, None)
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, status = %job.status, error = %e, "Callback delivery failed");
            (CallbackStatus::Failed, Some(e.to_string()))
        }
    };

    if let Err(e) = ctx
        .store
        .record_callback(job.id, callback_status, callback_error.as_deref())
    {
        tracing::error!(job_id = %job.id, "Failed to record callback outcome: {e}");
    }

    if let Err(e) = ctx.files.remove_output(&job.output) {
        tracing::warn!(job_id = %job.id, "Output cleanup failed: {e}");
    }
}
