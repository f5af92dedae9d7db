//! Job record and queue operations.
//!
//! Every status change moves the job id between the aggregate tables in the
//! same transaction as the record update. Writes go first in each
//! transaction so SQLite takes the write lock up front instead of upgrading a
//! read snapshot.

use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};
use tf_core::{CallbackStatus, Error, JobId, JobStatus, Result};

use crate::models::{now_millis, now_rfc3339, JobRecord, NewJob, StatusFilter, JOB_COLS};

/// Upper bound on any task listing page.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Create a new job in `queued` and append it to the pending list.
pub fn create_job(conn: &Connection, new: &NewJob) -> Result<JobRecord> {
    let id = new.id;
    let now = now_rfc3339();
    let inputs = serde_json::to_string(&new.inputs)
        .map_err(|e| Error::Internal(format!("failed to encode inputs: {e}")))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    tx.execute(
        "INSERT INTO jobs (id, kind, inputs, output, params, callback_url, status,
                           created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', ?7, ?7)",
        rusqlite::params![
            id.to_string(),
            new.kind.as_str(),
            inputs,
            new.output.to_string_lossy().into_owned(),
            new.params,
            new.callback_url,
            now,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    tx.execute(
        "INSERT INTO queue_pending (job_id) VALUES (?1)",
        [id.to_string()],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    get_job(conn, id)?.ok_or_else(|| Error::Internal(format!("job {id} missing after insert")))
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<JobRecord>> {
    let q = format!("SELECT {JOB_COLS} FROM jobs WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], JobRecord::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// List jobs, newest first, with an optional status filter.
///
/// `limit` is clamped to [`MAX_PAGE_SIZE`] whatever the caller asks for.
pub fn list_jobs(
    conn: &Connection,
    filter: StatusFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<JobRecord>> {
    let limit = limit.clamp(0, MAX_PAGE_SIZE);
    let offset = offset.max(0);

    let (q, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match filter {
        StatusFilter::Only(status) => (
            format!(
                "SELECT {JOB_COLS} FROM jobs WHERE status = ?1
                 ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3"
            ),
            vec![
                Box::new(status.as_str()),
                Box::new(limit),
                Box::new(offset),
            ],
        ),
        StatusFilter::All => (
            format!(
                "SELECT {JOB_COLS} FROM jobs
                 ORDER BY created_at DESC, id LIMIT ?1 OFFSET ?2"
            ),
            vec![Box::new(limit), Box::new(offset)],
        ),
    };

    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_refs.as_slice(), JobRecord::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Atomically claim the oldest pending job for `worker`.
///
/// Pops the head of the pending list, moves the job to `processing` with a
/// lease of `lease`, and adds it to the active set. Pending entries whose job
/// is no longer `queued` are dropped and the next one is tried.
pub fn claim_next(conn: &Connection, worker: &str, lease: Duration) -> Result<Option<JobRecord>> {
    let now = now_rfc3339();
    let lease_expires_at = now_millis() + lease.as_millis() as i64;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    loop {
        // SQLite RETURNING is supported since 3.35.
        let head: Option<String> = tx
            .query_row(
                "DELETE FROM queue_pending
                 WHERE position = (SELECT MIN(position) FROM queue_pending)
                 RETURNING job_id",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::database(e.to_string()))?;

        let Some(job_id) = head else {
            tx.commit().map_err(|e| Error::database(e.to_string()))?;
            return Ok(None);
        };

        let n = tx
            .execute(
                "UPDATE jobs SET status='processing', worker_id=?1, lease_expires_at=?2,
                    started_at=?3, updated_at=?3
                 WHERE id=?4 AND status='queued'",
                rusqlite::params![worker, lease_expires_at, now, job_id],
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if n == 0 {
            tracing::warn!(job_id = %job_id, "Dropping pending entry for a job that is not queued");
            continue;
        }

        tx.execute(
            "INSERT OR IGNORE INTO queue_active (job_id) VALUES (?1)",
            [&job_id],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        let q = format!("SELECT {JOB_COLS} FROM jobs WHERE id = ?1");
        let job = tx
            .query_row(&q, [&job_id], JobRecord::from_row)
            .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        return Ok(Some(job));
    }
}

/// Transition a job and move it between the aggregate collections.
///
/// Only `queued -> processing`, `processing -> completed` and
/// `processing -> failed` are accepted; anything else yields
/// [`Error::InvalidTransition`]. `completed` requires a result; `failed`
/// records `error` (or "Unknown error").
pub fn update_status(
    conn: &Connection,
    id: JobId,
    to: JobStatus,
    result: Option<&str>,
    error: Option<&str>,
) -> Result<JobRecord> {
    let Some(from) = to.predecessor() else {
        return Err(Error::Validation(
            "jobs enter 'queued' only at submission".into(),
        ));
    };

    let (result, error) = match to {
        JobStatus::Completed => {
            let result = result.ok_or_else(|| {
                Error::Validation("a completed job requires a result path".into())
            })?;
            (Some(result), None)
        }
        JobStatus::Failed => (None, Some(error.unwrap_or("Unknown error"))),
        JobStatus::Queued | JobStatus::Processing => (None, None),
    };

    let now = now_rfc3339();
    let id_str = id.to_string();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let n = tx
        .execute(
            "UPDATE jobs SET
                status = ?1,
                updated_at = ?2,
                result = COALESCE(?3, result),
                error = COALESCE(?4, error),
                started_at = CASE WHEN ?1 = 'processing' THEN ?2 ELSE started_at END,
                completed_at = CASE WHEN ?1 IN ('completed', 'failed') THEN ?2 ELSE completed_at END,
                lease_expires_at = CASE WHEN ?1 IN ('completed', 'failed') THEN NULL
                                        ELSE lease_expires_at END
             WHERE id = ?5 AND status = ?6",
            rusqlite::params![to.as_str(), now, result, error, id_str, from.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if n == 0 {
        let current: Option<String> = tx
            .query_row("SELECT status FROM jobs WHERE id = ?1", [&id_str], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| Error::database(e.to_string()))?;

        return match current {
            None => Err(Error::not_found("job", id)),
            Some(s) => Err(Error::InvalidTransition {
                id: id_str,
                from: s.parse()?,
                to,
            }),
        };
    }

    match to {
        JobStatus::Processing => {
            tx.execute("DELETE FROM queue_pending WHERE job_id = ?1", [&id_str])
                .map_err(|e| Error::database(e.to_string()))?;
            tx.execute(
                "INSERT OR IGNORE INTO queue_active (job_id) VALUES (?1)",
                [&id_str],
            )
            .map_err(|e| Error::database(e.to_string()))?;
        }
        JobStatus::Completed => {
            tx.execute("DELETE FROM queue_active WHERE job_id = ?1", [&id_str])
                .map_err(|e| Error::database(e.to_string()))?;
            tx.execute(
                "INSERT OR REPLACE INTO queue_completed (job_id, completed_at) VALUES (?1, ?2)",
                rusqlite::params![id_str, now_millis()],
            )
            .map_err(|e| Error::database(e.to_string()))?;
        }
        JobStatus::Failed => {
            tx.execute("DELETE FROM queue_active WHERE job_id = ?1", [&id_str])
                .map_err(|e| Error::database(e.to_string()))?;
            tx.execute(
                "INSERT OR REPLACE INTO queue_failed (job_id, error) VALUES (?1, ?2)",
                rusqlite::params![id_str, error],
            )
            .map_err(|e| Error::database(e.to_string()))?;
        }
        JobStatus::Queued => {}
    }

    let q = format!("SELECT {JOB_COLS} FROM jobs WHERE id = ?1");
    let job = tx
        .query_row(&q, [&id_str], JobRecord::from_row)
        .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(job)
}

/// Extend the claim lease of a job still held by `worker`.
///
/// Returns `false` when the job is no longer `processing` under that worker.
pub fn renew_lease(conn: &Connection, id: JobId, worker: &str, lease: Duration) -> Result<bool> {
    let expires = now_millis() + lease.as_millis() as i64;
    let n = conn
        .execute(
            "UPDATE jobs SET lease_expires_at = ?1
             WHERE id = ?2 AND worker_id = ?3 AND status = 'processing'",
            rusqlite::params![expires, id.to_string(), worker],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// `processing` jobs whose lease ran out before `now_ms`.
pub fn expired_leases(conn: &Connection, now_ms: i64) -> Result<Vec<JobRecord>> {
    let q = format!(
        "SELECT {JOB_COLS} FROM jobs
         WHERE status = 'processing' AND lease_expires_at IS NOT NULL AND lease_expires_at < ?1
         ORDER BY lease_expires_at ASC"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([now_ms], JobRecord::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Record the outcome of the callback delivery attempt. Leaves `status`
/// and `updated_at` untouched.
pub fn record_callback(
    conn: &Connection,
    id: JobId,
    status: CallbackStatus,
    error: Option<&str>,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE jobs SET callback_status = ?1, callback_at = ?2, callback_error = ?3
             WHERE id = ?4",
            rusqlite::params![status.as_str(), now_rfc3339(), error, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Claim the disposal of a completed job's output.
///
/// Returns `true` for exactly one caller per job; later callers (a late
/// `release`, the hand-off sweep) get `false` and must leave the file alone.
pub fn release_output(conn: &Connection, id: JobId) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE jobs SET output_released_at = ?1
             WHERE id = ?2 AND status = 'completed' AND output_released_at IS NULL",
            rusqlite::params![now_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark that the synchronous consumer of a job stopped waiting, and return
/// the record as it stands after the mark.
pub fn mark_abandoned(conn: &Connection, id: JobId) -> Result<JobRecord> {
    conn.execute(
        "UPDATE jobs SET consumer_abandoned = 1 WHERE id = ?1",
        [id.to_string()],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    get_job(conn, id)?.ok_or_else(|| Error::not_found("job", id))
}

/// Completed jobs without a callback whose output is still unreleased and
/// which completed at or before `cutoff_ms`.
pub fn unreleased_outputs(conn: &Connection, cutoff_ms: i64) -> Result<Vec<JobRecord>> {
    let q = format!(
        "SELECT {JOB_COLS} FROM jobs
         WHERE status = 'completed' AND callback_url IS NULL AND output_released_at IS NULL
           AND id IN (SELECT job_id FROM queue_completed WHERE completed_at <= ?1)"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([cutoff_ms], JobRecord::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use std::path::PathBuf;
    use tf_core::JobKind;

    fn new_job(name: &str) -> NewJob {
        NewJob {
            id: JobId::new(),
            kind: JobKind::Normalize,
            inputs: vec![PathBuf::from(format!("/tmp/ffmpeg_api/input_{name}.mp4"))],
            output: PathBuf::from(format!("/tmp/ffmpeg_api/normalized_{name}.mp4")),
            params: None,
            callback_url: None,
        }
    }

    fn count(conn: &Connection, table: &str, id: JobId) -> i64 {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE job_id = ?1"),
            [id.to_string()],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn create_and_get() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("a")).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.kind, JobKind::Normalize);
        assert!(job.result.is_none() && job.error.is_none());
        assert_eq!(count(&conn, "queue_pending", job.id), 1);

        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(found.inputs, vec![PathBuf::from("/tmp/ffmpeg_api/input_a.mp4")]);
        assert!(get_job(&conn, JobId::new()).unwrap().is_none());
    }

    #[test]
    fn duplicate_id_leaves_no_pending_entry() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let new = new_job("dup");
        create_job(&conn, &new).unwrap();
        assert!(create_job(&conn, &new).is_err());
        let pending: i64 = conn
            .query_row("SELECT COUNT(*) FROM queue_pending", [], |r| r.get(0))
            .unwrap();
        assert_eq!(pending, 1);
    }

    #[test]
    fn claim_is_fifo_and_moves_to_active() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let first = create_job(&conn, &new_job("1")).unwrap();
        let second = create_job(&conn, &new_job("2")).unwrap();

        let claimed = claim_next(&conn, "w1", Duration::from_secs(60))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
        assert!(claimed.lease_expires_at.unwrap() > now_millis());
        assert!(claimed.started_at.is_some());
        assert_eq!(count(&conn, "queue_pending", first.id), 0);
        assert_eq!(count(&conn, "queue_active", first.id), 1);

        let next = claim_next(&conn, "w2", Duration::from_secs(60))
            .unwrap()
            .unwrap();
        assert_eq!(next.id, second.id);
        assert!(claim_next(&conn, "w1", Duration::from_secs(60))
            .unwrap()
            .is_none());
    }

    #[test]
    fn claim_skips_stale_pending_entries() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let stale = create_job(&conn, &new_job("stale")).unwrap();
        let live = create_job(&conn, &new_job("live")).unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'failed' WHERE id = ?1",
            [stale.id.to_string()],
        )
        .unwrap();

        let claimed = claim_next(&conn, "w1", Duration::from_secs(60))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, live.id);
    }

    #[test]
    fn complete_moves_to_completed_collection() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("c")).unwrap();
        claim_next(&conn, "w1", Duration::from_secs(60)).unwrap();

        let done = update_status(
            &conn,
            job.id,
            JobStatus::Completed,
            Some("/tmp/ffmpeg_api/normalized_c.mp4"),
            None,
        )
        .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("/tmp/ffmpeg_api/normalized_c.mp4"));
        assert!(done.error.is_none());
        assert!(done.completed_at.is_some());
        assert!(done.lease_expires_at.is_none());
        assert_eq!(count(&conn, "queue_active", job.id), 0);
        assert_eq!(count(&conn, "queue_completed", job.id), 1);
    }

    #[test]
    fn fail_records_error_in_failed_mapping() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("f")).unwrap();
        update_status(&conn, job.id, JobStatus::Processing, None, None).unwrap();
        assert_eq!(count(&conn, "queue_pending", job.id), 0);

        let failed = update_status(&conn, job.id, JobStatus::Failed, None, Some("bad codec")).unwrap();
        assert_eq!(failed.error.as_deref(), Some("bad codec"));
        assert!(failed.result.is_none());

        let recorded: String = conn
            .query_row(
                "SELECT error FROM queue_failed WHERE job_id = ?1",
                [job.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(recorded, "bad codec");
        assert_eq!(count(&conn, "queue_active", job.id), 0);
    }

    #[test]
    fn failure_without_message_is_unknown_error() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("u")).unwrap();
        update_status(&conn, job.id, JobStatus::Processing, None, None).unwrap();
        let failed = update_status(&conn, job.id, JobStatus::Failed, None, None).unwrap();
        assert_eq!(failed.error.as_deref(), Some("Unknown error"));
    }

    #[test]
    fn terminal_states_are_not_reentered() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("t")).unwrap();
        update_status(&conn, job.id, JobStatus::Processing, None, None).unwrap();
        update_status(&conn, job.id, JobStatus::Completed, Some("/out"), None).unwrap();

        let err = update_status(&conn, job.id, JobStatus::Failed, None, Some("late")).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Failed,
                ..
            }
        ));

        let err = update_status(&conn, job.id, JobStatus::Completed, Some("/out"), None).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        // The record and collections are untouched by the rejected writes.
        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert!(found.error.is_none());
        assert_eq!(count(&conn, "queue_failed", job.id), 0);
    }

    #[test]
    fn processing_cannot_be_skipped() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("s")).unwrap();
        let err = update_status(&conn, job.id, JobStatus::Completed, Some("/out"), None).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: JobStatus::Queued,
                ..
            }
        ));

        let err = update_status(&conn, job.id, JobStatus::Queued, None, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn completed_requires_result() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("r")).unwrap();
        update_status(&conn, job.id, JobStatus::Processing, None, None).unwrap();
        let err = update_status(&conn, job.id, JobStatus::Completed, None, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unknown_job_is_not_found() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let err = update_status(&conn, JobId::new(), JobStatus::Processing, None, None).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn list_is_capped_at_max_page_size() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        for i in 0..(MAX_PAGE_SIZE + 20) {
            create_job(&conn, &new_job(&i.to_string())).unwrap();
        }

        let page = list_jobs(&conn, StatusFilter::All, 500, 0).unwrap();
        assert_eq!(page.len() as i64, MAX_PAGE_SIZE);

        let tail = list_jobs(&conn, StatusFilter::All, 500, MAX_PAGE_SIZE).unwrap();
        assert_eq!(tail.len(), 20);
    }

    #[test]
    fn list_with_filter() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        create_job(&conn, &new_job("a")).unwrap();
        create_job(&conn, &new_job("b")).unwrap();
        claim_next(&conn, "w1", Duration::from_secs(60)).unwrap();

        let queued = list_jobs(&conn, StatusFilter::Only(JobStatus::Queued), 20, 0).unwrap();
        assert_eq!(queued.len(), 1);
        let processing =
            list_jobs(&conn, StatusFilter::Only(JobStatus::Processing), 20, 0).unwrap();
        assert_eq!(processing.len(), 1);
        assert!(list_jobs(&conn, StatusFilter::Only(JobStatus::Failed), 20, 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn lease_renewal_and_expiry() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("l")).unwrap();
        claim_next(&conn, "w1", Duration::from_millis(0)).unwrap();

        let expired = expired_leases(&conn, now_millis() + 1).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, job.id);

        assert!(!renew_lease(&conn, job.id, "w2", Duration::from_secs(60)).unwrap());
        assert!(renew_lease(&conn, job.id, "w1", Duration::from_secs(60)).unwrap());
        assert!(expired_leases(&conn, now_millis()).unwrap().is_empty());

        update_status(&conn, job.id, JobStatus::Failed, None, Some("x")).unwrap();
        assert!(!renew_lease(&conn, job.id, "w1", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn callback_bookkeeping_leaves_status_alone() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("cb")).unwrap();
        update_status(&conn, job.id, JobStatus::Processing, None, None).unwrap();
        let failed = update_status(&conn, job.id, JobStatus::Failed, None, Some("boom")).unwrap();

        assert!(record_callback(&conn, job.id, CallbackStatus::Failed, Some("503")).unwrap());
        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Failed);
        assert_eq!(found.updated_at, failed.updated_at);
        assert_eq!(found.callback_status, Some(CallbackStatus::Failed));
        assert_eq!(found.callback_error.as_deref(), Some("503"));
        assert!(found.callback_at.is_some());
    }

    #[test]
    fn output_is_released_once() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("rel")).unwrap();
        assert!(!release_output(&conn, job.id).unwrap(), "not completed yet");

        claim_next(&conn, "w1", Duration::from_secs(60)).unwrap();
        update_status(&conn, job.id, JobStatus::Completed, Some("/out"), None).unwrap();

        assert!(release_output(&conn, job.id).unwrap());
        assert!(!release_output(&conn, job.id).unwrap());
        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert!(found.output_released_at.is_some());
        assert!(!found.consumer_abandoned);
    }

    #[test]
    fn unreleased_outputs_respect_cutoff_and_release() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let kept = create_job(&conn, &new_job("kept")).unwrap();
        let mut with_hook = new_job("hook");
        with_hook.callback_url = Some("http://example.invalid/hook".into());
        let hooked = create_job(&conn, &with_hook).unwrap();
        for job in [&kept, &hooked] {
            claim_next(&conn, "w1", Duration::from_secs(60)).unwrap();
            update_status(&conn, job.id, JobStatus::Completed, Some("/out"), None).unwrap();
        }

        assert!(unreleased_outputs(&conn, now_millis() - 60_000)
            .unwrap()
            .is_empty());
        let due = unreleased_outputs(&conn, now_millis() + 1).unwrap();
        assert_eq!(due.len(), 1, "jobs with a callback are disposed by delivery");
        assert_eq!(due[0].id, kept.id);

        release_output(&conn, kept.id).unwrap();
        assert!(unreleased_outputs(&conn, now_millis() + 1).unwrap().is_empty());
    }

    #[test]
    fn abandonment_is_recorded() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &new_job("gone")).unwrap();
        let marked = mark_abandoned(&conn, job.id).unwrap();
        assert!(marked.consumer_abandoned);
        assert_eq!(marked.status, JobStatus::Queued);
        assert!(matches!(
            mark_abandoned(&conn, JobId::new()).unwrap_err(),
            Error::NotFound { .. }
        ));
    }
}
