//! Queue-wide aggregate counts.

use rusqlite::Connection;
use tf_core::{Error, Result};

use crate::models::QueueStats;

/// Window for the "recent completions" counter.
pub const RECENT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<i64> {
    conn.query_row(sql, params, |row| row.get(0))
        .map_err(|e| Error::database(e.to_string()))
}

/// Counts of active and pending jobs, completions within the 24 hours before
/// `now_ms`, and all recorded failures.
pub fn queue_stats(conn: &Connection, now_ms: i64) -> Result<QueueStats> {
    Ok(QueueStats {
        active_tasks: count(conn, "SELECT COUNT(*) FROM queue_active", [])?,
        pending_tasks: count(conn, "SELECT COUNT(*) FROM queue_pending", [])?,
        recent_completions: count(
            conn,
            "SELECT COUNT(*) FROM queue_completed WHERE completed_at BETWEEN ?1 AND ?2",
            [now_ms - RECENT_WINDOW_MS, now_ms],
        )?,
        recent_failures: count(conn, "SELECT COUNT(*) FROM queue_failed", [])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_millis, NewJob};
    use crate::pool::init_memory_pool;
    use crate::queries::jobs;
    use std::path::PathBuf;
    use std::time::Duration;
    use tf_core::{JobId, JobKind, JobStatus};

    fn enqueue(conn: &Connection, n: usize) {
        for i in 0..n {
            jobs::create_job(
                conn,
                &NewJob {
                    id: JobId::new(),
                    kind: JobKind::Custom,
                    inputs: vec![PathBuf::from(format!("/tmp/in_{i}"))],
                    output: PathBuf::from(format!("/tmp/out_{i}")),
                    params: Some("-c copy".into()),
                    callback_url: None,
                },
            )
            .unwrap();
        }
    }

    #[test]
    fn empty_store_has_zero_counts() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let stats = queue_stats(&conn, now_millis()).unwrap();
        assert_eq!(
            stats,
            QueueStats {
                active_tasks: 0,
                pending_tasks: 0,
                recent_completions: 0,
                recent_failures: 0,
            }
        );
    }

    #[test]
    fn counts_follow_transitions() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        enqueue(&conn, 4);

        let lease = Duration::from_secs(60);
        let a = jobs::claim_next(&conn, "w", lease).unwrap().unwrap();
        let b = jobs::claim_next(&conn, "w", lease).unwrap().unwrap();
        jobs::claim_next(&conn, "w", lease).unwrap().unwrap();

        jobs::update_status(&conn, a.id, JobStatus::Completed, Some("/tmp/out_0"), None).unwrap();
        jobs::update_status(&conn, b.id, JobStatus::Failed, None, Some("exit 1")).unwrap();

        let stats = queue_stats(&conn, now_millis()).unwrap();
        assert_eq!(stats.pending_tasks, 1);
        assert_eq!(stats.active_tasks, 1);
        assert_eq!(stats.recent_completions, 1);
        assert_eq!(stats.recent_failures, 1);
    }

    #[test]
    fn old_completions_fall_out_of_window() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        enqueue(&conn, 1);
        let job = jobs::claim_next(&conn, "w", Duration::from_secs(60))
            .unwrap()
            .unwrap();
        jobs::update_status(&conn, job.id, JobStatus::Completed, Some("/tmp/out_0"), None)
            .unwrap();

        let two_days_later = now_millis() + 2 * RECENT_WINDOW_MS;
        let stats = queue_stats(&conn, two_days_later).unwrap();
        assert_eq!(stats.recent_completions, 0);
    }
}
