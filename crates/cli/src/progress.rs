// crates/cli/src/progress.rs
//! Terminal rendering of a job's state stream.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;

use explainer_core::{JobState, JobStatus};

const BAR_TEMPLATE: &str = "  {spinner} [{bar:40.cyan/blue}] {pos:>3}% {msg}";

/// Render `state` until the job is terminal or the channel closes. Returns the
/// last state seen.
pub async fn follow(mut state: watch::Receiver<JobState>) -> JobState {
    let pb = ProgressBar::new(100);
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(120));

    let last = loop {
        let snapshot = state.borrow_and_update().clone();
        pb.set_position(percent(&snapshot));
        pb.set_message(message(&snapshot));
        if snapshot.is_terminal() {
            break snapshot;
        }
        if state.changed().await.is_err() {
            break state.borrow().clone();
        }
    };

    pb.finish_and_clear();
    last
}

pub fn percent(state: &JobState) -> u64 {
    if state.status == JobStatus::Done {
        return 100;
    }
    state
        .progress
        .map(|p| (p * 100.0).round().clamp(0.0, 100.0) as u64)
        .unwrap_or(0)
}

pub fn message(state: &JobState) -> String {
    match state.stage.as_deref() {
        Some(stage) if !stage.is_empty() => format!("{} · {}", state.status.as_str(), stage),
        _ => state.status.as_str().to_string(),
    }
}
