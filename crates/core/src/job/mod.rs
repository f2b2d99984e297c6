// crates/core/src/job/mod.rs
//! Canonical job state for video generation requests.
//!
//! Provides:
//! - `JobId`: validated identifier accepted by the status endpoint
//! - `JobState`: the externally visible snapshot of one job
//! - `JobUpdate`: a raw update from either transport, before reconciliation
//! - `JobStateMachine`: the single authority applying updates monotonically

pub mod machine;
pub mod types;

pub use machine::{IgnoreReason, JobStateMachine, Transition};
pub use types::{JobId, JobState, JobStatus, JobUpdate, GENERIC_JOB_ERROR};
