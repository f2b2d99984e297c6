// crates/core/src/job/types.rs
//! Types for the job progress model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Shown when a job fails without a server-provided message.
pub const GENERIC_JOB_ERROR: &str = "Video generation failed";

const MAX_JOB_ID_LEN: usize = 128;

/// Identifier of a server-side generation job.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted so the id can be placed
/// in a URL path segment without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = raw.as_ref();
        if raw.is_empty() {
            return Err(ValidationError::EmptyJobId);
        }
        let well_formed = raw.len() <= MAX_JOB_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !well_formed {
            return Err(ValidationError::MalformedJobId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a job.
///
/// The aliases cover the vocabulary used by older server builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[serde(alias = "pending")]
    Queued,
    Processing,
    #[serde(alias = "completed")]
    Done,
    #[serde(alias = "failed")]
    Error,
}

impl JobStatus {
    /// Position in the Queued → Processing → (Done | Error) order.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Done | JobStatus::Error => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible snapshot of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Advisory progress, nominally 0.0–1.0. Passed through as reported.
    pub progress: Option<f64>,
    /// Current processing stage label, e.g. "generating_audio".
    pub stage: Option<String>,
    /// Location of the finished video once `status` is `Done`.
    pub result_uri: Option<String>,
    /// Failure detail once `status` is `Error`.
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    /// State of a job the server has just accepted.
    pub fn queued(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            progress: None,
            stage: None,
            result_uri: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A raw update from either transport, not yet reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub stage: Option<String>,
    pub result_uri: Option<String>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn new(job_id: JobId, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            progress: None,
            stage: None,
            result_uri: None,
            error: None,
        }
    }

    /// Terminal failure synthesized on the client (e.g. polling gave up).
    pub fn failed(job_id: JobId, message: impl Into<String>) -> Self {
        Self::new(job_id, JobStatus::Error).with_error(message)
    }

    pub fn with_progress(mut self, fraction: f64) -> Self {
        self.progress = Some(fraction);
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_result(mut self, uri: impl Into<String>) -> Self {
        self.result_uri = Some(uri.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}
