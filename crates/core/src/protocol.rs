// crates/core/src/protocol.rs
//! Wire types for the job endpoints and the push channel.
//!
//! Push frames are JSON objects tagged by a `type` field. Inbound frames are
//! decoded into the closed [`ServerEvent`] enum at the transport boundary;
//! tags outside that set are rejected with [`ProtocolError::UnknownEvent`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::job::{JobId, JobStatus, JobUpdate};

// ── Job submission ──────────────────────────────────────────────────────

/// POST /video-job/generate-video
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateVideoRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

/// POST /video-job/generate-video/text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateTextRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

/// Multipart upload for POST /video-job/generate-video/file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateFileRequest {
    pub file_name: String,
    pub contents: Vec<u8>,
    pub voice: Option<String>,
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVideoResponse {
    /// Kept as a raw string so a malformed id surfaces as a validation error.
    pub job_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

// ── Job status ──────────────────────────────────────────────────────────

/// Progress as reported by the server: either a detail object or a bare
/// percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireProgress {
    Detailed {
        #[serde(default, alias = "currentStep")]
        step: Option<String>,
        #[serde(default)]
        percentage: Option<f64>,
    },
    Percentage(f64),
}

impl WireProgress {
    /// Percentage converted to a 0.0–1.0 fraction, unclamped.
    pub fn fraction(&self) -> Option<f64> {
        match self {
            WireProgress::Detailed { percentage, .. } => percentage.map(|p| p / 100.0),
            WireProgress::Percentage(p) => Some(p / 100.0),
        }
    }

    pub fn step(&self) -> Option<&str> {
        match self {
            WireProgress::Detailed { step, .. } => step.as_deref(),
            WireProgress::Percentage(_) => None,
        }
    }
}

/// One job report, shared by GET /video-job/status/{id} and the
/// `jobProgress` push frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<WireProgress>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
}

impl JobReport {
    /// Convert into a state machine update. Reports that omit `jobId` are
    /// attributed to `expected`.
    pub fn into_update(self, expected: &JobId) -> JobUpdate {
        let job_id = self.job_id.unwrap_or_else(|| expected.clone());
        let stage = self
            .stage
            .or_else(|| self.progress.as_ref().and_then(|p| p.step().map(str::to_string)));
        JobUpdate {
            job_id,
            status: self.status,
            progress: self.progress.as_ref().and_then(WireProgress::fraction),
            stage,
            result_uri: self.video_url,
            error: self.error,
        }
    }
}

// ── Push channel frames ─────────────────────────────────────────────────

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join the room for a job. Idempotent on the server.
    JoinJob {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    LeaveJob {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        // Serializing a two-field tagged enum cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    JobProgress(JobReport),
    AuthError { message: Option<String> },
}

impl ServerEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing `type` tag".into()))?
            .to_string();

        match tag.as_str() {
            "jobProgress" => serde_json::from_value::<JobReport>(value)
                .map(ServerEvent::JobProgress)
                .map_err(|e| ProtocolError::Malformed(format!("jobProgress: {e}"))),
            "authError" => Ok(ServerEvent::AuthError {
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            _ => Err(ProtocolError::UnknownEvent(tag)),
        }
    }
}
