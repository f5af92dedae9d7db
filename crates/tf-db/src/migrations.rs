//! Schema migrations, embedded as SQL constants and applied in order.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tf_core::{Error, Result};

/// V1: job records and the queue-wide aggregate collections.
///
/// `queue_pending` is the FIFO the workers claim from; `queue_completed`
/// carries a completion time in unix milliseconds for windowed counts.
const V1_INITIAL: &str = r#"
CREATE TABLE jobs (
    id               TEXT PRIMARY KEY,
    kind             TEXT NOT NULL,
    inputs           TEXT NOT NULL,
    output           TEXT NOT NULL,
    params           TEXT,
    callback_url     TEXT,
    status           TEXT NOT NULL DEFAULT 'queued',
    result           TEXT,
    error            TEXT,
    worker_id        TEXT,
    lease_expires_at INTEGER,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    started_at       TEXT,
    completed_at     TEXT
);

CREATE TABLE queue_pending (
    position INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id   TEXT NOT NULL UNIQUE REFERENCES jobs(id) ON DELETE CASCADE
);

CREATE TABLE queue_active (
    job_id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE
);

CREATE TABLE queue_completed (
    job_id       TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    completed_at INTEGER NOT NULL
);

CREATE TABLE queue_failed (
    job_id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    error  TEXT NOT NULL
);

CREATE INDEX idx_jobs_status          ON jobs(status);
CREATE INDEX idx_jobs_created         ON jobs(created_at);
CREATE INDEX idx_jobs_lease           ON jobs(status, lease_expires_at);
CREATE INDEX idx_queue_completed_time ON queue_completed(completed_at);
"#;

/// V2: callback delivery bookkeeping.
const V2_CALLBACK_STATUS: &str = r#"
ALTER TABLE jobs ADD COLUMN callback_status TEXT;
ALTER TABLE jobs ADD COLUMN callback_at TEXT;
ALTER TABLE jobs ADD COLUMN callback_error TEXT;
"#;

/// V3: hand-off of outputs to synchronous consumers.
///
/// `output_released_at` is set exactly once when a completed job's output is
/// handed back for disposal; `consumer_abandoned` marks jobs whose waiting
/// consumer gave up before the job finished.
const V3_OUTPUT_HANDOFF: &str = r#"
ALTER TABLE jobs ADD COLUMN output_released_at TEXT;
ALTER TABLE jobs ADD COLUMN consumer_abandoned INTEGER NOT NULL DEFAULT 0;
"#;

/// Schema steps in order; step `n` brings `user_version` from `n` to `n + 1`.
const MIGRATIONS: &[&str] = &[V1_INITIAL, V2_CALLBACK_STATUS, V3_OUTPUT_HANDOFF];

fn schema_version(conn: &Connection) -> rusqlite::Result<usize> {
    conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
        .map(|v| v.max(0) as usize)
}

/// Bring the schema up to date.
///
/// The applied version lives in SQLite's `user_version` header field. Each
/// step commits together with its version bump, so a crash between steps
/// leaves a consistent schema. Concurrent callers on one file serialize on
/// the immediate transaction and re-check the version inside it.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    loop {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
            .map_err(Error::database)?;

        let current = schema_version(&tx).map_err(Error::database)?;
        let Some(sql) = MIGRATIONS.get(current) else {
            return Ok(());
        };
        let next = current + 1;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{next} failed: {e}")))?;
        tx.pragma_update(None, "user_version", next as i64)
            .map_err(Error::database)?;
        tx.commit().map_err(Error::database)?;

        tracing::debug!(version = next, "Applied migration");
    }
}
