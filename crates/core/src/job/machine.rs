// crates/core/src/job/machine.rs
//! Reconciles raw transport updates into canonical job state.
//!
//! Rules, in order:
//! 1. Updates for another job id are ignored.
//! 2. Once Done or Error is reached, every later update is ignored. Duplicate
//!    and late deliveries are expected around a push → poll failover, so this
//!    is not an error.
//! 3. A status ranking below the current one is stale and ignored.
//! 4. Otherwise the update is applied. Progress is taken verbatim, including
//!    values lower than previously observed.

use chrono::Utc;

use super::types::{JobId, JobState, JobStatus, JobUpdate, GENERIC_JOB_ERROR};

/// Why an update did not change state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    AlreadyTerminal(JobStatus),
    StaleStatus {
        current: JobStatus,
        received: JobStatus,
    },
    ForeignJob(JobId),
}

/// Outcome of applying one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// State changed and the job is still running.
    Applied,
    /// State changed and the job just reached Done or Error.
    Terminal,
    Ignored(IgnoreReason),
}

/// Single authority over one job's state.
#[derive(Debug, Clone)]
pub struct JobStateMachine {
    state: JobState,
}

impl JobStateMachine {
    /// Start tracking a freshly accepted job in the Queued state.
    pub fn new(job_id: JobId) -> Self {
        Self {
            state: JobState::queued(job_id),
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn job_id(&self) -> &JobId {
        &self.state.job_id
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn apply(&mut self, update: JobUpdate) -> Transition {
        if update.job_id != self.state.job_id {
            return Transition::Ignored(IgnoreReason::ForeignJob(update.job_id));
        }
        if self.state.is_terminal() {
            return Transition::Ignored(IgnoreReason::AlreadyTerminal(self.state.status));
        }
        if update.status.rank() < self.state.status.rank() {
            return Transition::Ignored(IgnoreReason::StaleStatus {
                current: self.state.status,
                received: update.status,
            });
        }

        let state = &mut self.state;
        state.status = update.status;
        if let Some(progress) = update.progress {
            state.progress = Some(progress);
        }
        if let Some(stage) = update.stage {
            state.stage = Some(stage);
        }
        match update.status {
            JobStatus::Done => {
                if update.result_uri.is_some() {
                    state.result_uri = update.result_uri;
                }
            }
            JobStatus::Error => {
                let detail = update
                    .error
                    .filter(|msg| !msg.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_JOB_ERROR.to_string());
                state.error = Some(detail);
            }
            JobStatus::Queued | JobStatus::Processing => {}
        }
        state.updated_at = Utc::now();

        if state.is_terminal() {
            Transition::Terminal
        } else {
            Transition::Applied
        }
    }
}
