// crates/client/tests/channel.rs
//
// End-to-end job channel scenarios: push delivery, push → poll failover, and
// poll failure. Transports talk to in-memory fakes on tokio's paused clock.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use explainer_client::{
    ApiError, JobApi, JobChannel, MemoryStore, PollTransport, PushConnector, Session,
    TransportMode, TransportSet,
};
use explainer_core::{ClientMessage, JobStatus, PollConfig, PushConfig, REFRESH_MARGIN};

use common::{job_id, login, report, ConnectOutcome, FakeAuth, FakeConnector, FakeJobs};

async fn signed_in_session() -> Session {
    signed_in_with(&FakeAuth::new()).await
}

async fn signed_in_with(auth: &Arc<FakeAuth>) -> Session {
    let session = Session::new(auth.clone(), Arc::new(MemoryStore::new()), REFRESH_MARGIN);
    session.login(&login()).await.unwrap();
    session
}

fn open_socket() -> ConnectOutcome {
    ConnectOutcome::Accept {
        frames: Vec::new(),
        keep_open: true,
    }
}

fn joins(connector: &FakeConnector) -> usize {
    connector
        .sent()
        .into_iter()
        .filter(|m| matches!(m, ClientMessage::JoinJob { .. }))
        .count()
}

async fn anonymous_session() -> Session {
    let session = Session::new(FakeAuth::new(), Arc::new(MemoryStore::new()), REFRESH_MARGIN);
    session.initialize().await;
    session
}

fn transports(jobs: &Arc<FakeJobs>, connector: &Arc<FakeConnector>) -> TransportSet {
    TransportSet {
        jobs: jobs.clone() as Arc<dyn JobApi>,
        connector: connector.clone() as Arc<dyn PushConnector>,
        push: PushConfig::default(),
        poll: PollConfig::default(),
    }
}

fn frame(value: serde_json::Value) -> String {
    value.to_string()
}

#[tokio::test(start_paused = true)]
async fn test_push_delivers_progress_then_done() {
    let session = signed_in_session().await;
    let jobs = FakeJobs::new("abc123");
    let connector = FakeConnector::new(vec![ConnectOutcome::Accept {
        frames: vec![
            frame(json!({
                "type": "jobProgress",
                "jobId": "abc123",
                "status": "processing",
                "progress": { "percentage": 40 },
            })),
            frame(json!({
                "type": "jobProgress",
                "jobId": "abc123",
                "status": "done",
                "videoUrl": "https://x/y.mp4",
            })),
        ],
        keep_open: true,
    }]);

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    let state = channel.wait_closed().await;

    assert_eq!(state.status, JobStatus::Done);
    assert_eq!(state.result_uri.as_deref(), Some("https://x/y.mp4"));
    assert_eq!(state.progress, Some(0.4));
    assert_eq!(channel.mode(), TransportMode::Closed);
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        connector.sent(),
        vec![
            ClientMessage::JoinJob { job_id: job_id("abc123") },
            ClientMessage::LeaveJob { job_id: job_id("abc123") },
        ]
    );
    channel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_push_never_connects_falls_back_to_polling() {
    let session = signed_in_session().await;
    let jobs = FakeJobs::new("abc123");
    jobs.script(vec![
        Ok(report(json!({ "jobId": "abc123", "status": "queued" }))),
        Ok(report(json!({ "jobId": "abc123", "status": "processing", "progress": 55 }))),
        Ok(report(json!({
            "jobId": "abc123",
            "status": "done",
            "videoUrl": "https://x/y.mp4",
        }))),
    ]);
    let connector = FakeConnector::new(Vec::new());

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    let state = channel.wait_closed().await;

    // Initial connect plus five reconnects, 1s..5s apart.
    let attempts = connector.attempts.lock().unwrap().clone();
    let gaps: Vec<u64> = attempts
        .windows(2)
        .map(|w| (w[1] - w[0]).as_secs())
        .collect();
    assert_eq!(gaps, vec![1, 2, 3, 4, 5]);

    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 3);
    assert_eq!(state.status, JobStatus::Done);
    assert_eq!(state.result_uri.as_deref(), Some("https://x/y.mp4"));
    assert_eq!(state.progress, Some(0.55));
    channel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_fails_over_without_retry() {
    let session = signed_in_session().await;
    let token = session.current_token();
    let jobs = FakeJobs::new("abc123");
    jobs.script(vec![Ok(report(json!({
        "jobId": "abc123",
        "status": "failed",
        "error": "Could not fetch URL",
    })))]);
    let connector = FakeConnector::new(vec![ConnectOutcome::Reject]);

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    let state = channel.wait_closed().await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.status, JobStatus::Error);
    assert_eq!(state.error.as_deref(), Some("Could not fetch URL"));
    assert_eq!(jobs.status_tokens.lock().unwrap().clone(), vec![token]);
    channel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_auth_error_frame_fails_over_to_polling() {
    let session = signed_in_session().await;
    let jobs = FakeJobs::new("abc123");
    jobs.script(vec![Ok(report(json!({ "jobId": "abc123", "status": "done" })))]);
    let connector = FakeConnector::new(vec![ConnectOutcome::Accept {
        frames: vec![frame(json!({ "type": "authError", "message": "jwt expired" }))],
        keep_open: true,
    }]);

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    let state = channel.wait_closed().await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(state.status, JobStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_push_frames_are_dropped() {
    let session = signed_in_session().await;
    let jobs = FakeJobs::new("abc123");
    let connector = FakeConnector::new(vec![ConnectOutcome::Accept {
        frames: vec![
            frame(json!({ "type": "serverMaintenance", "at": "soon" })),
            "{not json".to_string(),
            frame(json!({ "type": "jobProgress", "jobId": "abc123", "status": "completed" })),
        ],
        keep_open: true,
    }]);

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    let state = channel.wait_closed().await;

    assert_eq!(state.status, JobStatus::Done);
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_push_connection_reconnects_and_rejoins() {
    let session = signed_in_session().await;
    let jobs = FakeJobs::new("abc123");
    let connector = FakeConnector::new(vec![
        ConnectOutcome::Accept {
            frames: vec![frame(json!({
                "type": "jobProgress",
                "jobId": "abc123",
                "status": "processing",
            }))],
            keep_open: false,
        },
        ConnectOutcome::Accept {
            frames: vec![frame(json!({
                "type": "jobProgress",
                "jobId": "abc123",
                "status": "done",
                "videoUrl": "https://x/y.mp4",
            }))],
            keep_open: true,
        },
    ]);

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    let state = channel.wait_closed().await;

    assert_eq!(state.status, JobStatus::Done);
    assert_eq!(connector.attempt_count(), 2);
    assert_eq!(joins(&connector), 2);
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_failure_becomes_terminal_error() {
    let session = anonymous_session().await;
    let jobs = FakeJobs::new("abc123");
    jobs.script(vec![Err(ApiError::Status {
        status: 500,
        message: "Internal error".into(),
    })]);
    let connector = FakeConnector::new(Vec::new());

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    let state = channel.wait_closed().await;

    assert_eq!(connector.attempt_count(), 0);
    assert_eq!(state.status, JobStatus::Error);
    assert_eq!(state.error.as_deref(), Some("Status request failed: Internal error"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_deadline_ends_with_timeout_error() {
    let session = anonymous_session().await;
    let jobs = FakeJobs::new("abc123");
    let connector = FakeConnector::new(Vec::new());

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    let state = channel.wait_closed().await;

    assert_eq!(state.status, JobStatus::Error);
    assert_eq!(state.error.as_deref(), Some("Job polling timeout exceeded"));
    // 5 minutes at a 2s interval, first request immediate.
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 150);
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_polling() {
    let session = anonymous_session().await;
    let jobs = FakeJobs::new("abc123");
    let connector = FakeConnector::new(Vec::new());

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(channel.mode(), TransportMode::Poll);
    channel.close().await;

    let calls = jobs.status_calls.load(Ordering::SeqCst);
    assert_eq!(calls, 2);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test(start_paused = true)]
async fn test_token_change_reconnects_push_with_new_token() {
    let auth = FakeAuth::new();
    let session = signed_in_with(&auth).await;
    let jobs = FakeJobs::new("abc123");
    let connector = FakeConnector::new(vec![open_socket(), open_socket()]);

    let channel = JobChannel::open(job_id("abc123"), session.clone(), transports(&jobs, &connector));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(connector.attempt_count(), 1);

    // Different lifetime, so the refreshed JWT differs from the first.
    auth.token_ttl_secs.store(12 * 3600, Ordering::SeqCst);
    let refreshed = session.refresh().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(connector.attempt_count(), 2);
    assert_eq!(
        connector.tokens.lock().unwrap().last(),
        Some(&refreshed.access_token)
    );
    assert_eq!(joins(&connector), 2);
    assert_eq!(channel.mode(), TransportMode::Push);
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 0);
    channel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_logout_during_push_fails_over_to_polling() {
    let session = signed_in_session().await;
    let jobs = FakeJobs::new("abc123");
    jobs.script(vec![Ok(report(json!({
        "jobId": "abc123",
        "status": "done",
        "videoUrl": "https://x/y.mp4",
    })))]);
    let connector = FakeConnector::new(vec![open_socket()]);

    let channel = JobChannel::open(job_id("abc123"), session.clone(), transports(&jobs, &connector));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(channel.mode(), TransportMode::Push);

    session.logout().await;
    let state = channel.wait_closed().await;

    assert_eq!(state.status, JobStatus::Done);
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(jobs.status_tokens.lock().unwrap().clone(), vec![None]);
}

#[tokio::test(start_paused = true)]
async fn test_close_on_connected_push_does_not_reconnect() {
    let session = signed_in_session().await;
    let jobs = FakeJobs::new("abc123");
    let connector = FakeConnector::new(vec![open_socket()]);

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(channel.mode(), TransportMode::Push);

    channel.close().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(
        connector.sent(),
        vec![
            ClientMessage::JoinJob { job_id: job_id("abc123") },
            ClientMessage::LeaveJob { job_id: job_id("abc123") },
        ]
    );
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_channel_stops_polling() {
    let session = anonymous_session().await;
    let jobs = FakeJobs::new("abc123");
    let connector = FakeConnector::new(Vec::new());

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 1);

    drop(channel);
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_channel_stops_push_reconnects() {
    let session = signed_in_session().await;
    let jobs = FakeJobs::new("abc123");
    let connector = FakeConnector::new(Vec::new());

    let channel = JobChannel::open(job_id("abc123"), session, transports(&jobs, &connector));
    // Attempts at 0s and 1s; the next would come at 3s.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(connector.attempt_count(), 2);

    drop(channel);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.attempt_count(), 2);
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_stops_when_listener_is_gone() {
    let session = anonymous_session().await;
    let jobs = FakeJobs::new("abc123");

    let (poll, events) =
        PollTransport::spawn(jobs.clone(), session, job_id("abc123"), PollConfig::default());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 1);

    drop(events);
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(jobs.status_calls.load(Ordering::SeqCst), 1);
    poll.stop().await;
}
