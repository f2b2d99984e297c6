// crates/client/src/poll.rs
//! Poll transport: periodic status requests for one job.
//!
//! First request fires immediately, then one per `interval` until the job is
//! terminal, the transport is stopped, a request fails, or the deadline
//! passes. A failed request is never retried.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use explainer_core::{JobId, JobReport, PollConfig, TransportError};

use crate::api::JobApi;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Update(JobReport),
    /// Polling has stopped for good.
    Failed(TransportError),
}

pub struct PollTransport {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollTransport {
    pub fn spawn(
        api: Arc<dyn JobApi>,
        session: Session,
        job_id: JobId,
        config: PollConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(api, session, job_id, config, tx, cancel.clone()));
        (Self { cancel, task }, rx)
    }

    /// Stop polling and wait until no request is in flight.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "poll task ended abnormally");
        }
    }
}

async fn poll_loop(
    api: Arc<dyn JobApi>,
    session: Session,
    job_id: JobId,
    config: PollConfig,
    tx: mpsc::UnboundedSender<PollEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let deadline = config.deadline.map(|d| Instant::now() + d);
    let expired = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expired);

    let mut requests: u32 = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tx.closed() => {
                debug!(job_id = %job_id, "poll listener gone; stopping");
                break;
            }
            _ = &mut expired => {
                warn!(job_id = %job_id, requests, "job polling deadline exceeded");
                let _ = tx.send(PollEvent::Failed(TransportError::PollDeadline));
                break;
            }
            _ = ticker.tick() => {}
        }

        let token = session.access_token().await;
        requests += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = api.job_status(token.as_deref(), &job_id) => result,
        };

        match result {
            Ok(report) => {
                let terminal = report.status.is_terminal();
                debug!(job_id = %job_id, status = report.status.as_str(), "poll response");
                if tx.send(PollEvent::Update(report)).is_err() || terminal {
                    break;
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "status request failed; polling stopped");
                let _ = tx.send(PollEvent::Failed(TransportError::Poll(e.to_string())));
                break;
            }
        }
    }
}
