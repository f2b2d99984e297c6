// crates/client/src/channel.rs
//! Per-job channel: picks a transport, fails over, and publishes state.
//!
//! A coordinator task owns the job's `JobStateMachine` and exactly one
//! transport at a time. Push is tried first; when push is rejected or runs
//! out of reconnect attempts the coordinator tears it down and only then
//! starts polling. Poll never hands back to push.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use explainer_core::{
    JobId, JobReport, JobState, JobStateMachine, JobUpdate, PollConfig, PushConfig, Transition,
};

use crate::api::JobApi;
use crate::poll::{PollEvent, PollTransport};
use crate::push::{PushConnector, PushEvent, PushTransport};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Push,
    Poll,
    /// Terminal state reached, or the channel was closed.
    Closed,
}

/// An open subscription: which job, over which transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: JobId,
    pub mode: TransportMode,
}

/// Everything a channel needs to build its transports.
#[derive(Clone)]
pub struct TransportSet {
    pub jobs: Arc<dyn JobApi>,
    pub connector: Arc<dyn PushConnector>,
    pub push: PushConfig,
    pub poll: PollConfig,
}

pub struct JobChannel {
    job_id: JobId,
    state: watch::Receiver<JobState>,
    mode: watch::Receiver<TransportMode>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl JobChannel {
    pub fn open(job_id: JobId, session: Session, transports: TransportSet) -> Self {
        let machine = JobStateMachine::new(job_id.clone());
        let (state_tx, state_rx) = watch::channel(machine.state().clone());
        let initial_mode = if session.current_token().is_some() {
            TransportMode::Push
        } else {
            TransportMode::Poll
        };
        let (mode_tx, mode_rx) = watch::channel(initial_mode);
        let cancel = CancellationToken::new();

        let coordinator = Coordinator {
            job_id: job_id.clone(),
            session,
            transports,
            machine,
            state_tx,
            mode_tx,
        };
        let task = tokio::spawn(coordinator.run(cancel.clone()));

        Self {
            job_id,
            state: state_rx,
            mode: mode_rx,
            cancel,
            task: Some(task),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    pub fn mode(&self) -> TransportMode {
        *self.mode.borrow()
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            job_id: self.job_id.clone(),
            mode: self.mode(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    pub fn watch_mode(&self) -> watch::Receiver<TransportMode> {
        self.mode.clone()
    }

    /// Resolve once the channel has closed itself, returning the final state.
    pub async fn wait_closed(&self) -> JobState {
        let mut mode = self.mode.clone();
        let _ = mode.wait_for(|m| *m == TransportMode::Closed).await;
        self.state()
    }

    /// Stop the active transport and wait until every timer and connection
    /// belonging to this channel is gone.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(job_id = %self.job_id, error = %e, "job channel task ended abnormally");
            }
        }
    }
}

impl Drop for JobChannel {
    /// The coordinator still tears its transports down, just unobserved.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Active {
    Push(PushTransport, mpsc::UnboundedReceiver<PushEvent>),
    Poll(PollTransport, mpsc::UnboundedReceiver<PollEvent>),
}

enum Step {
    Cancelled,
    Push(Option<PushEvent>),
    Poll(Option<PollEvent>),
}

struct Coordinator {
    job_id: JobId,
    session: Session,
    transports: TransportSet,
    machine: JobStateMachine,
    state_tx: watch::Sender<JobState>,
    mode_tx: watch::Sender<TransportMode>,
}

impl Coordinator {
    async fn run(mut self, cancel: CancellationToken) {
        let mut active = if self.session.access_token().await.is_some() {
            self.start_push()
        } else {
            info!(job_id = %self.job_id, "no access token; polling instead of push");
            self.start_poll()
        };

        loop {
            let step = match &mut active {
                Active::Push(_, events) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Cancelled,
                    event = events.recv() => Step::Push(event),
                },
                Active::Poll(_, events) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Cancelled,
                    event = events.recv() => Step::Poll(event),
                },
            };

            match step {
                Step::Cancelled => {
                    debug!(job_id = %self.job_id, "job channel cancelled");
                    break;
                }
                Step::Push(Some(PushEvent::Progress(report))) => {
                    if self.apply_report(report) {
                        break;
                    }
                }
                Step::Push(Some(PushEvent::Connected)) => {
                    debug!(job_id = %self.job_id, "push connected");
                }
                Step::Push(Some(PushEvent::Disconnected { reason })) => {
                    debug!(job_id = %self.job_id, %reason, "push reconnecting");
                }
                Step::Push(Some(PushEvent::AuthRejected)) => {
                    active = self.fail_over(active, "push authentication rejected").await;
                }
                Step::Push(Some(PushEvent::Exhausted(e))) => {
                    active = self.fail_over(active, &e.to_string()).await;
                }
                Step::Push(None) => {
                    active = self.fail_over(active, "push transport stopped").await;
                }
                Step::Poll(Some(PollEvent::Update(report))) => {
                    if self.apply_report(report) {
                        break;
                    }
                }
                Step::Poll(Some(PollEvent::Failed(e))) => {
                    self.apply(JobUpdate::failed(self.job_id.clone(), e.to_string()));
                    break;
                }
                Step::Poll(None) => {
                    // Poller ended on a report the machine did not accept as
                    // terminal for this job.
                    if !self.machine.is_terminal() {
                        self.apply(JobUpdate::failed(
                            self.job_id.clone(),
                            "Status polling stopped",
                        ));
                    }
                    break;
                }
            }
        }

        self.tear_down(active).await;
        self.mode_tx.send_replace(TransportMode::Closed);
        info!(
            job_id = %self.job_id,
            status = self.machine.state().status.as_str(),
            "job channel closed"
        );
    }

    fn start_push(&self) -> Active {
        let (push, events) = PushTransport::spawn(
            Arc::clone(&self.transports.connector),
            self.session.clone(),
            self.transports.push.clone(),
        );
        push.subscribe(self.job_id.clone());
        self.mode_tx.send_replace(TransportMode::Push);
        Active::Push(push, events)
    }

    fn start_poll(&self) -> Active {
        let (poll, events) = PollTransport::spawn(
            Arc::clone(&self.transports.jobs),
            self.session.clone(),
            self.job_id.clone(),
            self.transports.poll.clone(),
        );
        self.mode_tx.send_replace(TransportMode::Poll);
        Active::Poll(poll, events)
    }

    /// Stop push completely, then start polling.
    async fn fail_over(&self, active: Active, reason: &str) -> Active {
        info!(job_id = %self.job_id, %reason, "falling back to polling");
        self.tear_down(active).await;
        self.start_poll()
    }

    async fn tear_down(&self, active: Active) {
        match active {
            Active::Push(push, _) => {
                push.unsubscribe(self.job_id.clone());
                push.disconnect().await;
            }
            Active::Poll(poll, _) => poll.stop().await,
        }
    }

    fn apply_report(&mut self, report: JobReport) -> bool {
        let update = report.into_update(&self.job_id);
        self.apply(update)
    }

    /// Returns `true` once the job is terminal.
    fn apply(&mut self, update: JobUpdate) -> bool {
        match self.machine.apply(update) {
            Transition::Applied => {
                self.state_tx.send_replace(self.machine.state().clone());
                false
            }
            Transition::Terminal => {
                let state = self.machine.state().clone();
                info!(
                    job_id = %self.job_id,
                    status = state.status.as_str(),
                    error = state.error.as_deref().unwrap_or(""),
                    "job reached terminal state"
                );
                self.state_tx.send_replace(state);
                true
            }
            Transition::Ignored(reason) => {
                debug!(job_id = %self.job_id, ?reason, "update ignored");
                false
            }
        }
    }
}
