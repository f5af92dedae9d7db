//! Rust structs mapping to database tables and query results.
//!
//! Each table model implements `from_row` for constructing itself from a
//! `rusqlite::Row`.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tf_core::{CallbackStatus, Error, JobId, JobKind, JobStatus};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Current time as a fixed-width RFC 3339 string, so text ordering matches
/// time ordering.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_id(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<JobId> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map(JobId::from)
        .map_err(|e| conversion_failure(idx, e))
}

fn parse_text<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_failure(idx, e))
}

fn parse_opt_text<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = Error>,
{
    let s: Option<String> = row.get(idx)?;
    s.map(|v| v.parse().map_err(|e| conversion_failure(idx, e)))
        .transpose()
}

// ---------------------------------------------------------------------------
// NewJob
// ---------------------------------------------------------------------------

/// Everything needed to enqueue a job. Paths are already resolved under the
/// temp root, and the id is picked by the submitter so file names can embed
/// it before the record exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub id: JobId,
    pub kind: JobKind,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub params: Option<String>,
    pub callback_url: Option<String>,
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// Column list matching [`JobRecord::from_row`].
pub const JOB_COLS: &str = "id, kind, inputs, output, params, callback_url, status, result,
    error, worker_id, lease_expires_at, callback_status, callback_at, callback_error,
    created_at, updated_at, started_at, completed_at, output_released_at, consumer_abandoned";

/// The full persisted record of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub params: Option<String>,
    pub callback_url: Option<String>,
    pub status: JobStatus,
    /// Output path; set only once `completed`.
    pub result: Option<String>,
    /// Failure message; set only once `failed`.
    pub error: Option<String>,
    pub worker_id: Option<String>,
    /// Unix milliseconds after which a `processing` claim counts as expired.
    pub lease_expires_at: Option<i64>,
    pub callback_status: Option<CallbackStatus>,
    pub callback_at: Option<String>,
    pub callback_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    /// When the output of a completed job without a callback was handed
    /// back for disposal.
    pub output_released_at: Option<String>,
    /// The synchronous consumer stopped waiting before the job finished.
    pub consumer_abandoned: bool,
}

impl JobRecord {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let inputs_json: String = row.get(2)?;
        let output: String = row.get(3)?;
        Ok(Self {
            id: parse_id(row, 0)?,
            kind: parse_text(row, 1)?,
            inputs: serde_json::from_str(&inputs_json).map_err(|e| conversion_failure(2, e))?,
            output: PathBuf::from(output),
            params: row.get(4)?,
            callback_url: row.get(5)?,
            status: parse_text(row, 6)?,
            result: row.get(7)?,
            error: row.get(8)?,
            worker_id: row.get(9)?,
            lease_expires_at: row.get(10)?,
            callback_status: parse_opt_text(row, 11)?,
            callback_at: row.get(12)?,
            callback_error: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
            started_at: row.get(16)?,
            completed_at: row.get(17)?,
            output_released_at: row.get(18)?,
            consumer_abandoned: row.get(19)?,
        })
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            kind: self.kind,
            status: self.status,
            error: self.error.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }

    pub fn file_status(&self) -> TaskFileStatus {
        TaskFileStatus {
            id: self.id,
            status: self.status,
            result: self.result.clone(),
            callback_status: self.callback_status,
            callback_at: self.callback_at.clone(),
            error: self.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// Page entry returned by task listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Delivery-oriented view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFileStatus {
    pub id: JobId,
    pub status: JobStatus,
    pub result: Option<String>,
    pub callback_status: Option<CallbackStatus>,
    pub callback_at: Option<String>,
    pub error: Option<String>,
}

/// Queue-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub active_tasks: i64,
    pub pending_tasks: i64,
    /// Completions within the last 24 hours.
    pub recent_completions: i64,
    /// All recorded failures.
    pub recent_failures: i64,
}

/// Status filter for task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(JobStatus),
}

impl FromStr for StatusFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(StatusFilter::All),
            other => other.parse().map(StatusFilter::Only),
        }
    }
}

impl From<Option<JobStatus>> for StatusFilter {
    fn from(status: Option<JobStatus>) -> Self {
        status.map_or(StatusFilter::All, StatusFilter::Only)
    }
}
