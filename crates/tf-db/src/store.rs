//! The status store interface.
//!
//! Workers, the dispatcher and the monitoring routes only see
//! [`StatusStore`]. Each method is one atomic store operation; nothing in
//! the trait invites a read-modify-write of the shared queue collections
//! from the caller's side.

use std::time::Duration;

use tf_core::{CallbackStatus, JobId, JobStatus, Result};

use crate::models::{
    now_millis, JobRecord, NewJob, QueueStats, StatusFilter, TaskFileStatus, TaskSummary,
};
use crate::pool::{get_conn, DbPool};
use crate::queries::{jobs, stats};

/// Shared job state and queue-wide aggregates.
pub trait StatusStore: Send + Sync {
    /// Persist a new `queued` job and append it to the pending list.
    fn enqueue(&self, job: &NewJob) -> Result<JobRecord>;

    /// Claim the oldest pending job for `worker` (moves it to `processing`).
    fn claim_next(&self, worker: &str, lease: Duration) -> Result<Option<JobRecord>>;

    /// Extend the lease on a job the worker still holds.
    fn renew_lease(&self, id: JobId, worker: &str, lease: Duration) -> Result<bool>;

    /// Merge fields and move the id between aggregate collections.
    fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<JobRecord>;

    /// `processing` jobs whose lease has run out.
    fn expired_leases(&self) -> Result<Vec<JobRecord>>;

    /// Record the outcome of the single callback attempt.
    fn record_callback(
        &self,
        id: JobId,
        status: CallbackStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Claim disposal of a completed job's output; `true` for exactly one
    /// caller.
    fn release_output(&self, id: JobId) -> Result<bool>;

    /// Record that the synchronous consumer stopped waiting.
    fn mark_abandoned(&self, id: JobId) -> Result<JobRecord>;

    /// Completed jobs without a callback whose output has waited longer than
    /// `handoff` for a release.
    fn unreleased_outputs(&self, handoff: Duration) -> Result<Vec<JobRecord>>;

    fn get_task_info(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// A page of summaries; `limit` is clamped to 100.
    fn get_tasks(&self, filter: StatusFilter, limit: i64, offset: i64)
        -> Result<Vec<TaskSummary>>;

    fn get_queue_stats(&self) -> Result<QueueStats>;

    fn get_task_file_status(&self, id: JobId) -> Result<Option<TaskFileStatus>>;

    /// Whether the store answers at all.
    fn ping(&self) -> bool;
}

/// [`StatusStore`] backed by the SQLite pool.
#[derive(Clone)]
pub struct SqliteStatusStore {
    pool: DbPool,
}

impl SqliteStatusStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl StatusStore for SqliteStatusStore {
    fn enqueue(&self, job: &NewJob) -> Result<JobRecord> {
        let conn = get_conn(&self.pool)?;
        jobs::create_job(&conn, job)
    }

    fn claim_next(&self, worker: &str, lease: Duration) -> Result<Option<JobRecord>> {
        let conn = get_conn(&self.pool)?;
        jobs::claim_next(&conn, worker, lease)
    }

    fn renew_lease(&self, id: JobId, worker: &str, lease: Duration) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        jobs::renew_lease(&conn, id, worker, lease)
    }

    fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<JobRecord> {
        let conn = get_conn(&self.pool)?;
        let job = jobs::update_status(&conn, id, status, result, error)?;
        tracing::debug!(job_id = %id, status = %status, "Job status updated");
        Ok(job)
    }

    fn expired_leases(&self) -> Result<Vec<JobRecord>> {
        let conn = get_conn(&self.pool)?;
        jobs::expired_leases(&conn, now_millis())
    }

    fn record_callback(
        &self,
        id: JobId,
        status: CallbackStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        jobs::record_callback(&conn, id, status, error)?;
        Ok(())
    }

    fn release_output(&self, id: JobId) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        jobs::release_output(&conn, id)
    }

    fn mark_abandoned(&self, id: JobId) -> Result<JobRecord> {
        let conn = get_conn(&self.pool)?;
        jobs::mark_abandoned(&conn, id)
    }

    fn unreleased_outputs(&self, handoff: Duration) -> Result<Vec<JobRecord>> {
        let conn = get_conn(&self.pool)?;
        jobs::unreleased_outputs(&conn, now_millis() - handoff.as_millis() as i64)
    }

    fn get_task_info(&self, id: JobId) -> Result<Option<JobRecord>> {
        let conn = get_conn(&self.pool)?;
        jobs::get_job(&conn, id)
    }

    fn get_tasks(
        &self,
        filter: StatusFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskSummary>> {
        let conn = get_conn(&self.pool)?;
        let rows = jobs::list_jobs(&conn, filter, limit, offset)?;
        Ok(rows.iter().map(JobRecord::summary).collect())
    }

    fn get_queue_stats(&self) -> Result<QueueStats> {
        let conn = get_conn(&self.pool)?;
        stats::queue_stats(&conn, now_millis())
    }

    fn get_task_file_status(&self, id: JobId) -> Result<Option<TaskFileStatus>> {
        Ok(self.get_task_info(id)?.map(|job| job.file_status()))
    }

    fn ping(&self) -> bool {
        get_conn(&self.pool)
            .and_then(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map_err(|e| tf_core::Error::database(e.to_string()))
            })
            .is_ok()
    }
}
