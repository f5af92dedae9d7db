//! Job submission and the synchronous wait interface.
//!
//! [`Dispatcher::submit`] validates a request, names the output, and appends
//! the job to the durable pending queue that the workers claim from. Callers
//! without a callback target use [`Dispatcher::await_result`] and then
//! [`Dispatcher::release`] once they are done with the output.
//!
//! The output of such a job is disposed of exactly once. A consumer that
//! stops waiting marks the job abandoned and the worker disposes of the
//! output on completion; one that never releases is covered by the reaper
//! once the handoff window has passed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use tf_av::{ffmpeg, FileManager};
use tf_core::{Error, JobId, JobKind, JobStatus, Result};
use tf_db::{NewJob, StatusStore};

use crate::context::AppContext;

/// A transcoding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub kind: JobKind,
    /// Input files, already inside the temp root.
    pub inputs: Vec<PathBuf>,
    /// Output path; derived from the kind and first input when absent.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn StatusStore>,
    files: Arc<FileManager>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            files: Arc::clone(&ctx.files),
            poll_interval: ctx.config.workers.poll_interval(),
        }
    }

    /// Enqueue a job under a fresh id.
    pub fn submit(&self, req: SubmitRequest) -> Result<JobId> {
        self.submit_with_id(JobId::new(), req)
    }

    /// Enqueue a job under `id`, which must match any file names already
    /// staged for it.
    pub fn submit_with_id(&self, id: JobId, req: SubmitRequest) -> Result<JobId> {
        if req.inputs.is_empty() {
            return Err(Error::Validation("at least one input is required".into()));
        }

        let inputs = req
            .inputs
            .iter()
            .map(|p| self.files.resolve(p))
            .collect::<Result<Vec<_>>>()?;
        if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
            return Err(Error::Validation(format!(
                "input {} does not exist",
                missing.display()
            )));
        }

        let params = req
            .params
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        ffmpeg::validate(req.kind, &inputs, params.as_deref())?;

        let callback_url = req
            .callback_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        if let Some(url) = &callback_url {
            validate_callback_url(url)?;
        }

        let output = match &req.output {
            Some(p) => self.files.resolve(p)?,
            None => self
                .files
                .job_file_path(output_prefix(req.kind), id, &base_name(&inputs[0], id)),
        };
        if inputs.contains(&output) {
            return Err(Error::Validation("output must differ from every input".into()));
        }

        let job = self.store.enqueue(&NewJob {
            id,
            kind: req.kind,
            inputs,
            output,
            params,
            callback_url,
        })?;

        tracing::info!(
            job_id = %job.id,
            kind = %job.kind,
            callback = job.callback_url.is_some(),
            "Job queued"
        );
        Ok(job.id)
    }

    /// Copy `source` into the temp root as an input of job `id`.
    pub fn stage_input(&self, id: JobId, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                Error::Validation(format!("{} is not a file", source.display()))
            })?;
        self.files.ensure_root()?;
        let dest = self.files.job_file_path("input", id, &name);
        std::fs::copy(source, &dest)?;
        tracing::debug!(job_id = %id, "Staged {} as {}", source.display(), dest.display());
        Ok(dest)
    }

    /// Wait until the job reaches a terminal state.
    ///
    /// Returns the output path on success and [`Error::JobFailed`] with the
    /// recorded message on failure. `None` or a zero timeout waits
    /// indefinitely. On timeout the job is marked abandoned, so its output
    /// is disposed of when it completes instead of waiting for a release.
    pub async fn await_result(&self, id: JobId, timeout: Option<Duration>) -> Result<PathBuf> {
        let limit = timeout.filter(|t| !t.is_zero());
        let deadline = limit.map(|t| Instant::now() + t);

        loop {
            let job = self
                .store
                .get_task_info(id)?
                .ok_or_else(|| Error::not_found("job", id))?;

            match job.status {
                JobStatus::Completed => {
                    if job.output_released_at.is_some() {
                        return Err(Error::not_found("output of job", id));
                    }
                    let result = job.result.ok_or_else(|| {
                        Error::Internal(format!("job {id} completed without a result"))
                    })?;
                    return Ok(PathBuf::from(result));
                }
                JobStatus::Failed => {
                    return Err(Error::JobFailed(
                        job.error.unwrap_or_else(|| "Unknown error".into()),
                    ));
                }
                JobStatus::Queued | JobStatus::Processing => {}
            }

            if let (Some(deadline), Some(limit)) = (deadline, limit) {
                if Instant::now() >= deadline {
                    self.abandon(id)?;
                    return Err(Error::Timeout {
                        tool: format!("job {id}"),
                        timeout: limit,
                    });
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// The synchronous consumer gives up on job `id`.
    ///
    /// A job that already completed has its output disposed of here; one
    /// still running is disposed of by the worker that completes it.
    pub fn abandon(&self, id: JobId) -> Result<()> {
        let job = self.store.mark_abandoned(id)?;
        tracing::info!(job_id = %id, status = %job.status, "Consumer stopped waiting");
        if job.status == JobStatus::Completed {
            self.release(id)?;
        }
        Ok(())
    }

    /// The synchronous consumer is done with the output of a completed job.
    ///
    /// Only the first release of a completed job removes the output; later
    /// calls and jobs with a callback target are no-ops.
    pub fn release(&self, id: JobId) -> Result<()> {
        let job = self
            .store
            .get_task_info(id)?
            .ok_or_else(|| Error::not_found("job", id))?;

        if job.callback_url.is_some() {
            // Disposal belongs to callback delivery.
            return Ok(());
        }
        if !self.store.release_output(id)? {
            tracing::debug!(job_id = %id, status = %job.status, "Nothing to release");
            return Ok(());
        }

        if let Err(e) = self.files.remove_output(&job.output) {
            tracing::warn!(job_id = %id, "Output cleanup failed: {e}");
        }
        Ok(())
    }
}

fn output_prefix(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Normalize => "normalized",
        JobKind::Captionize => "captioned",
        JobKind::Custom => "output",
    }
}

/// File name of `input` without the `input_<id>_` prefix added by staging.
fn base_name(input: &Path, id: JobId) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let staged = format!("input_{id}_");
    name.strip_prefix(&staged)
        .map(str::to_string)
        .unwrap_or(name)
}

fn validate_callback_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::Validation(format!("invalid callback URL '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Validation(format!(
            "callback URL must use http or https, not '{other}'"
        ))),
    }
}
