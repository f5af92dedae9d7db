//! Job lifecycle enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// Operation profile of a job. Selects the default command template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Loudness normalisation of the audio track, video copied.
    Normalize,
    /// Burn an ASS subtitle file (second input) into the video.
    Captionize,
    /// Caller-supplied parameters only.
    Custom,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Normalize => "normalize",
            JobKind::Captionize => "captionize",
            JobKind::Custom => "custom",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normalize" => Ok(JobKind::Normalize),
            "captionize" => Ok(JobKind::Captionize),
            "custom" => Ok(JobKind::Custom),
            other => Err(Error::Validation(format!("unknown job kind '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
///
/// `Queued -> Processing -> Completed | Failed`. Terminal states accept no
/// further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transitions are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// The only status a job must be in before moving to `self`.
    pub fn predecessor(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Queued => None,
            JobStatus::Processing => Some(JobStatus::Queued),
            JobStatus::Completed | JobStatus::Failed => Some(JobStatus::Processing),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown job status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// CallbackStatus
// ---------------------------------------------------------------------------

/// Outcome of the single callback delivery attempt for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    /// The endpoint answered with a 2xx status.
    Delivered,
    /// Transport failure or non-2xx answer.
    Failed,
}

impl CallbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackStatus::Delivered => "delivered",
            CallbackStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "delivered" => Ok(CallbackStatus::Delivered),
            "failed" => Ok(CallbackStatus::Failed),
            other => Err(Error::Validation(format!("unknown callback status '{other}'"))),
        }
    }
}
