//! Error types for the transforge job system.
//!
//! [`Error`] covers every failure that decides a job's outcome or a caller's
//! request: tool exits, timeouts, store failures, invalid transitions. It
//! carries enough context for API handlers to derive an HTTP status code via
//! [`Error::http_status`].
//!
//! [`CleanupError`] and [`TransportError`] are reports from best-effort
//! operations (file disposal and callback delivery). They deliberately have
//! no conversion into [`Error`], so they cannot be `?`-propagated into a job
//! result; callers log them and move on.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::JobStatus;

/// Number of trailing stderr lines kept in the display of [`Error::Execution`].
const STDERR_TAIL_LINES: usize = 20;

/// Unified error type covering all propagating failure modes in transforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A store operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The external tool could not be spawned or communicated with.
    #[error("Tool error [{tool}]: {message}")]
    Spawn {
        /// Name of the tool.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The external tool exited with a non-zero status.
    #[error("Tool error [{tool}]: {}", describe_exit(*.code, .stderr))]
    Execution {
        /// Name of the tool that failed.
        tool: String,
        /// Exit code, `None` when the process was terminated by a signal.
        code: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The external tool exceeded its wall-clock bound.
    #[error("Tool error [{tool}]: timed out after {}", describe_duration(.timeout))]
    Timeout {
        /// Name of the tool that was killed.
        tool: String,
        /// The configured bound.
        timeout: Duration,
    },

    /// A status write would violate the job state machine.
    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        /// Job identifier.
        id: String,
        /// Status currently persisted.
        from: JobStatus,
        /// Status that was requested.
        to: JobStatus,
    },

    /// A job that a caller was waiting on ended in `failed`.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::InvalidTransition { .. } => 409,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Spawn { .. } => 502,
            Error::Execution { .. } => 502,
            Error::Timeout { .. } => 504,
            Error::JobFailed(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Spawn`].
    pub fn spawn(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Spawn {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

fn describe_exit(code: Option<i32>, stderr: &str) -> String {
    let head = match code {
        Some(c) => format!("exited with code {c}"),
        None => "terminated by signal".to_string(),
    };
    let tail = stderr_tail(stderr);
    if tail.is_empty() {
        head
    } else {
        format!("{head}: {tail}")
    }
}

/// The last few non-empty lines of a captured stderr stream.
///
/// ffmpeg prints its banner and stream mapping before the actual failure, so
/// the tail is where the useful message lives.
pub fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Render a duration the way operators configure it: whole seconds when
/// possible.
pub fn describe_duration(d: &Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{} seconds", d.as_secs())
    } else {
        format!("{} ms", d.as_millis())
    }
}

// ---------------------------------------------------------------------------
// Best-effort reports
// ---------------------------------------------------------------------------

/// A file disposal that did not succeed. Logged, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// Removing the file failed for a reason other than it being absent.
    #[error("failed to remove {}: {source}", .path.display())]
    Remove {
        /// Path that could not be removed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The reference resolved outside the scoped temp root.
    #[error("refusing to touch {} outside the temp root", .path.display())]
    OutsideRoot {
        /// The offending path.
        path: PathBuf,
    },
}

/// A callback delivery that did not succeed. Logged, never retried, never
/// fatal to the job's persisted status.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or no response arrived.
    #[error("callback to {url} failed: {message}")]
    Request {
        /// Callback target.
        url: String,
        /// Transport error description.
        message: String,
    },

    /// The endpoint answered with a non-success status.
    #[error("callback to {url} returned {status}: {body}")]
    Status {
        /// Callback target.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body (may be empty).
        body: String,
    },

    /// The output file could not be opened for upload.
    #[error("could not read {} for callback: {source}", .path.display())]
    File {
        /// Output path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
