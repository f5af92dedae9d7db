//! Worker pool and lease reaper.
//!
//! Each worker claims one job at a time from the pending queue, runs ffmpeg
//! under the supervisor while a heartbeat keeps its lease alive, removes the
//! inputs, writes the terminal status, and then hands off to callback
//! delivery or disposes of the output. The reaper fails jobs whose worker
//! stopped renewing its lease and disposes of outputs that no consumer
//! released within the handoff window.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tf_av::{ffmpeg, ToolCommand};
use tf_core::{Error, JobId, JobStatus};
use tf_db::JobRecord;

use crate::callback;
use crate::context::AppContext;

/// Error recorded on jobs whose worker stopped renewing its lease.
pub const LEASE_EXPIRED: &str = "worker lease expired";

/// Run `count` workers plus the reaper until `cancel` fires.
pub async fn run_worker_pool(ctx: AppContext, count: usize, cancel: CancellationToken) {
    tracing::info!(workers = count, "Starting worker pool");

    let mut handles: Vec<JoinHandle<()>> = (0..count)
        .map(|n| {
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let worker_id = format!("worker-{}-{n}", std::process::id());
            tokio::spawn(async move { run_worker(ctx, worker_id, cancel).await })
        })
        .collect();

    let reaper_ctx = ctx.clone();
    let reaper_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        run_reaper(reaper_ctx, reaper_cancel).await;
    }));

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Worker task panicked: {e}");
        }
    }

    tracing::info!("Worker pool stopped");
}

/// Claim-and-process loop of one worker.
///
/// A job already claimed is always carried through to its terminal state
/// before the cancellation token is checked again.
pub async fn run_worker(ctx: AppContext, worker_id: String, cancel: CancellationToken) {
    tracing::info!(worker = %worker_id, "Worker started");
    let poll = ctx.config.workers.poll_interval();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match process_next_job(&ctx, &worker_id).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => tracing::error!(worker = %worker_id, "Worker error: {e}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!(worker = %worker_id, "Worker stopped");
}

/// Claim and run the oldest pending job.
///
/// Returns `Ok(true)` if a job was processed, `Ok(false)` if the queue was
/// empty.
pub async fn process_next_job(ctx: &AppContext, worker_id: &str) -> tf_core::Result<bool> {
    let lease = ctx.config.workers.lease();
    let Some(job) = ctx.store.claim_next(worker_id, lease)? else {
        return Ok(false);
    };

    tracing::info!(job_id = %job.id, worker = %worker_id, kind = %job.kind, "Processing job");

    let heartbeat = Heartbeat::start(ctx, job.id, worker_id, lease);
    // Dropping the run kills the tool's process group.
    let outcome = tokio::select! {
        outcome = execute_job(ctx, &job) => outcome,
        _ = heartbeat.lost.cancelled() => Err(Error::Internal("worker lease lost".into())),
    };
    heartbeat.stop().await;

    if let Err(errors) = ctx.files.remove_inputs(&job.inputs) {
        for e in errors {
            tracing::error!(job_id = %job.id, "Input cleanup failed: {e}");
        }
    }

    let written = match &outcome {
        Ok(output) => {
            let result = output.to_string_lossy();
            ctx.store
                .update_status(job.id, JobStatus::Completed, Some(&*result), None)
        }
        Err(e) => {
            let message = e.to_string();
            tracing::error!(job_id = %job.id, error = %message, "Job failed");
            ctx.store
                .update_status(job.id, JobStatus::Failed, None, Some(message.as_str()))
        }
    };

    match written {
        Ok(record) => {
            if record.status == JobStatus::Completed {
                tracing::info!(job_id = %record.id, "Job completed");
            }
            finish(ctx, &record).await;
        }
        Err(Error::InvalidTransition { from, .. }) => {
            // Someone else already decided this job and notified for it.
            tracing::warn!(
                job_id = %job.id,
                status = %from,
                "Job was finalized elsewhere; skipping callback"
            );
            dispose_all(ctx, &job);
        }
        Err(e) => return Err(e),
    }

    Ok(true)
}

/// Build the command line and run it under the supervisor.
async fn execute_job(ctx: &AppContext, job: &JobRecord) -> tf_core::Result<std::path::PathBuf> {
    let exec = &ctx.config.execution;
    let ffmpeg_path = ctx.tools.ffmpeg()?;
    let args = ffmpeg::build_args(
        job.kind,
        &job.inputs,
        &job.output,
        job.params.as_deref(),
        &exec.threads,
    )?;

    ToolCommand::new(ffmpeg_path.to_path_buf())
        .args(args)
        .timeout(exec.timeout())
        .grace_period(exec.grace_period())
        .execute()
        .await?;

    Ok(job.output.clone())
}

/// Post-terminal handling: callback delivery, or disposal when nobody is
/// waiting for the output.
///
/// `job` must be the record read back after the terminal write, so a consumer
/// that gave up before it is seen here and one that gives up after it sees
/// the completed status itself.
async fn finish(ctx: &AppContext, job: &JobRecord) {
    match (&job.callback_url, job.status) {
        (Some(url), _) => callback::deliver(ctx, job, url).await,
        (None, JobStatus::Completed) if job.consumer_abandoned => {
            tracing::info!(job_id = %job.id, "Consumer stopped waiting; disposing of output");
            release_output(ctx, job);
        }
        (None, JobStatus::Completed) => {
            tracing::debug!(job_id = %job.id, "Output kept for the synchronous consumer");
        }
        (None, _) => dispose_all(ctx, job),
    }
}

/// Remove the output of a completed job if nobody released it yet.
fn release_output(ctx: &AppContext, job: &JobRecord) -> bool {
    match ctx.store.release_output(job.id) {
        Ok(true) => {
            if let Err(e) = ctx.files.remove_output(&job.output) {
                tracing::error!(job_id = %job.id, "Output cleanup failed: {e}");
            }
            true
        }
        Ok(false) => false,
        Err(e) => {
            tracing::error!(job_id = %job.id, "Output release failed: {e}");
            false
        }
    }
}

fn dispose_all(ctx: &AppContext, job: &JobRecord) {
    if let Err(errors) = ctx.files.remove_all(&job.inputs, &job.output) {
        for e in errors {
            tracing::error!(job_id = %job.id, "Cleanup failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Renews a job's lease every third of the lease while the tool runs.
///
/// `lost` fires once the lease can no longer be renewed because the job was
/// finalized by someone else.
struct Heartbeat {
    cancel: CancellationToken,
    lost: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    fn start(ctx: &AppContext, job_id: JobId, worker_id: &str, lease: Duration) -> Self {
        let cancel = CancellationToken::new();
        let lost = CancellationToken::new();
        let token = cancel.clone();
        let lost_tx = lost.clone();
        let store = ctx.store.clone();
        let worker_id = worker_id.to_string();
        let every = (lease / 3).max(Duration::from_millis(100));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(every) => {}
                    _ = token.cancelled() => break,
                }
                match store.renew_lease(job_id, &worker_id, lease) {
                    Ok(true) => tracing::trace!(job_id = %job_id, "Lease renewed"),
                    Ok(false) => {
                        tracing::warn!(job_id = %job_id, worker = %worker_id, "Lease lost; job is no longer ours");
                        lost_tx.cancel();
                        break;
                    }
                    Err(e) => tracing::warn!(job_id = %job_id, "Lease renewal failed: {e}"),
                }
            }
        });

        Self {
            cancel,
            lost,
            handle,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

// ---------------------------------------------------------------------------
// Reaper
// ---------------------------------------------------------------------------

/// Periodically fail `processing` jobs whose lease ran out and dispose of
/// outputs left unreleased past the handoff window.
pub async fn run_reaper(ctx: AppContext, cancel: CancellationToken) {
    let every = (ctx.config.workers.lease() / 2).max(Duration::from_millis(100));
    tracing::debug!(interval_ms = every.as_millis() as u64, "Lease reaper started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = cancel.cancelled() => break,
        }

        match reap_expired(&ctx).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(jobs = n, "Failed jobs with expired leases"),
            Err(e) => tracing::error!("Lease reaper error: {e}"),
        }

        match reap_unreleased(&ctx) {
            Ok(0) => {}
            Ok(n) => tracing::warn!(jobs = n, "Disposed of outputs nobody released"),
            Err(e) => tracing::error!("Output sweep error: {e}"),
        }
    }

    tracing::debug!("Lease reaper stopped");
}

/// One reaper pass. Returns how many jobs this pass moved to `failed`.
pub async fn reap_expired(ctx: &AppContext) -> tf_core::Result<usize> {
    let mut reaped = 0;

    for job in ctx.store.expired_leases()? {
        match ctx
            .store
            .update_status(job.id, JobStatus::Failed, None, Some(LEASE_EXPIRED))
        {
            Ok(record) => {
                reaped += 1;
                tracing::warn!(
                    job_id = %record.id,
                    worker = record.worker_id.as_deref().unwrap_or("unknown"),
                    "Worker lease expired; job failed"
                );
                if let Err(errors) = ctx.files.remove_inputs(&record.inputs) {
                    for e in errors {
                        tracing::error!(job_id = %record.id, "Input cleanup failed: {e}");
                    }
                }
                finish(ctx, &record).await;
            }
            // Finished or reaped by someone else in the meantime.
            Err(Error::InvalidTransition { .. }) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(reaped)
}

/// Dispose of outputs of completed jobs without a callback that no consumer
/// released within `files.handoff_secs`. Returns how many were disposed of.
pub fn reap_unreleased(ctx: &AppContext) -> tf_core::Result<usize> {
    let stale = ctx.store.unreleased_outputs(ctx.config.files.handoff())?;
    let mut disposed = 0;
    for job in &stale {
        if release_output(ctx, job) {
            disposed += 1;
            tracing::warn!(job_id = %job.id, "Output was never released; disposed");
        }
    }
    Ok(disposed)
}
