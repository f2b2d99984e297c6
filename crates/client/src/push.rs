// crates/client/src/push.rs
//! Push transport: one WebSocket carrying progress frames for subscribed jobs.
//!
//! The transport runs as a background task that owns the connection and
//! reports to its owner over an mpsc channel. Lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//!                     ^                           |
//!                     +------ backoff (n * base) -+
//! ```
//!
//! Authentication rejection is never retried here; it is reported as
//! [`PushEvent::AuthRejected`] so the owner can fall back to polling.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use explainer_core::{ClientMessage, JobId, JobReport, ProtocolError, PushConfig, ServerEvent, TransportError};

use crate::session::Session;

// ── Connection seam ─────────────────────────────────────────────────────

/// An open push connection.
#[async_trait]
pub trait PushConnection: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError>;

    /// Next text frame, or `None` once the server has closed the connection.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

/// Opens push connections authenticated with a bearer token.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// `Err(TransportError::AuthRejected)` when the server refuses the token.
    async fn connect(&self, token: &str) -> Result<Box<dyn PushConnection>, TransportError>;
}

/// WebSocket connector. The token travels in the upgrade request's
/// `Authorization` header.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, token: &str) -> Result<Box<dyn PushConnection>, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid push URL: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::Connect(format!("invalid token header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        match connect_async(request).await {
            Ok((stream, _)) => Ok(Box::new(WsConnection { stream })),
            Err(tungstenite::Error::Http(response))
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                Err(TransportError::AuthRejected)
            }
            Err(e) => Err(TransportError::Connect(e.to_string())),
        }
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(message.to_json().into()))
            .await
            .map_err(|e| TransportError::Connect(format!("send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite on the next read.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Connect(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "push close handshake failed");
        }
    }
}

// ── Transport ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connected,
    Progress(JobReport),
    /// An established connection dropped; a reconnect follows.
    Disconnected { reason: String },
    /// The server refused the credential. The task has stopped.
    AuthRejected,
    /// The reconnect budget ran out. The task has stopped.
    Exhausted(TransportError),
}

#[derive(Debug)]
enum Command {
    Subscribe(JobId),
    Unsubscribe(JobId),
    Disconnect,
}

/// Handle to a running push task.
pub struct PushTransport {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PushState>,
    task: JoinHandle<()>,
}

impl PushTransport {
    pub fn spawn(
        connector: Arc<dyn PushConnector>,
        session: Session,
        config: PushConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PushEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PushState::Disconnected);

        let worker = PushWorker {
            connector,
            session,
            config,
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            subscriptions: Vec::new(),
        };
        let task = tokio::spawn(worker.run());

        (
            Self {
                commands: command_tx,
                state: state_rx,
                task,
            },
            event_rx,
        )
    }

    /// Join `job_id`'s room now (if connected) and after every reconnect.
    pub fn subscribe(&self, job_id: JobId) {
        let _ = self.commands.send(Command::Subscribe(job_id));
    }

    pub fn unsubscribe(&self, job_id: JobId) {
        let _ = self.commands.send(Command::Unsubscribe(job_id));
    }

    pub fn state(&self) -> PushState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PushState> {
        self.state.clone()
    }

    /// Close the connection without reconnecting and wait for the task.
    pub async fn disconnect(self) {
        let _ = self.commands.send(Command::Disconnect);
        if let Err(e) = self.task.await {
            warn!(error = %e, "push task ended abnormally");
        }
    }
}

/// Why a served connection ended.
enum Outcome {
    Dropped(String),
    TokenChanged,
    AuthRejected,
    Stop,
}

enum Step {
    Frame(Option<Result<String, TransportError>>),
    Command(Option<Command>),
    TokenChanged(bool),
}

struct PushWorker {
    connector: Arc<dyn PushConnector>,
    session: Session,
    config: PushConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<PushEvent>,
    state: watch::Sender<PushState>,
    subscriptions: Vec<JobId>,
}

impl PushWorker {
    async fn run(mut self) {
        let mut token_rx = self.session.watch_token();
        // Failures since the last successful connect.
        let mut failures: u32 = 0;

        loop {
            let token = token_rx.borrow_and_update().clone();
            let Some(token) = token else {
                info!("no access token; push unavailable");
                self.emit(PushEvent::AuthRejected);
                break;
            };

            self.state.send_replace(PushState::Connecting);
            let Some(result) = self.connect(&token).await else {
                break;
            };

            let mut connection = match result {
                Ok(connection) => connection,
                Err(TransportError::AuthRejected) => {
                    warn!("push authentication rejected");
                    self.emit(PushEvent::AuthRejected);
                    break;
                }
                Err(e) => {
                    failures += 1;
                    if !self.back_off(failures, &e.to_string(), &mut token_rx).await {
                        break;
                    }
                    continue;
                }
            };

            failures = 0;
            self.state.send_replace(PushState::Connected);
            info!(subscriptions = self.subscriptions.len(), "push connected");
            self.emit(PushEvent::Connected);

            let outcome = self.serve(connection.as_mut(), &token, &mut token_rx).await;
            self.state.send_replace(PushState::Disconnected);
            match outcome {
                Outcome::Stop => break,
                Outcome::AuthRejected => {
                    warn!("push authentication rejected by server");
                    connection.close().await;
                    self.emit(PushEvent::AuthRejected);
                    break;
                }
                Outcome::TokenChanged => {
                    info!("access token changed; reconnecting push");
                }
                Outcome::Dropped(reason) => {
                    warn!(%reason, "push connection dropped");
                    self.emit(PushEvent::Disconnected {
                        reason: reason.clone(),
                    });
                    failures = 1;
                    if !self.back_off(failures, &reason, &mut token_rx).await {
                        break;
                    }
                }
            }
        }

        self.state.send_replace(PushState::Disconnected);
    }

    fn emit(&self, event: PushEvent) {
        let _ = self.events.send(event);
    }

    /// Returns `false` if the worker should stop.
    fn handle_command(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Subscribe(job_id)) => {
                if !self.subscriptions.contains(&job_id) {
                    self.subscriptions.push(job_id);
                }
                true
            }
            Some(Command::Unsubscribe(job_id)) => {
                self.subscriptions.retain(|id| *id != job_id);
                true
            }
            Some(Command::Disconnect) | None => false,
        }
    }

    /// One bounded connect attempt. `None` if told to stop meanwhile.
    async fn connect(
        &mut self,
        token: &str,
    ) -> Option<Result<Box<dyn PushConnection>, TransportError>> {
        let connector = Arc::clone(&self.connector);
        let attempt = tokio::time::timeout(self.config.connect_timeout, connector.connect(token));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    if !self.handle_command(command) {
                        return None;
                    }
                }
                result = &mut attempt => {
                    return Some(result.unwrap_or_else(|_| {
                        Err(TransportError::Connect("connect timed out".into()))
                    }));
                }
            }
        }
    }

    /// Sleep before reconnect attempt `failures`. Returns `false` when the
    /// budget is spent or the worker was told to stop.
    async fn back_off(
        &mut self,
        failures: u32,
        reason: &str,
        token_rx: &mut watch::Receiver<Option<String>>,
    ) -> bool {
        let max = self.config.max_reconnect_attempts;
        if failures > max {
            warn!(attempts = max, %reason, "push reconnect budget exhausted");
            self.emit(PushEvent::Exhausted(TransportError::ReconnectExhausted {
                attempts: max,
            }));
            return false;
        }

        let delay = self.config.backoff(failures);
        warn!(
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "push connect failed; retrying"
        );
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => {
                    if !self.handle_command(command) {
                        return false;
                    }
                }
                // A new credential is worth trying right away.
                changed = token_rx.changed() => return changed.is_ok(),
            }
        }
    }

    async fn serve(
        &mut self,
        connection: &mut dyn PushConnection,
        token: &str,
        token_rx: &mut watch::Receiver<Option<String>>,
    ) -> Outcome {
        for job_id in self.subscriptions.clone() {
            if let Err(e) = connection.send(&ClientMessage::JoinJob { job_id }).await {
                return Outcome::Dropped(e.to_string());
            }
        }

        loop {
            let step = tokio::select! {
                biased;
                command = self.commands.recv() => Step::Command(command),
                changed = token_rx.changed() => Step::TokenChanged(changed.is_ok()),
                frame = connection.recv() => Step::Frame(frame),
            };

            match step {
                Step::Frame(None) => return Outcome::Dropped("connection closed by server".into()),
                Step::Frame(Some(Err(e))) => return Outcome::Dropped(e.to_string()),
                Step::Frame(Some(Ok(text))) => {
                    if let Some(outcome) = self.handle_frame(&text) {
                        return outcome;
                    }
                }
                Step::Command(Some(Command::Subscribe(job_id))) => {
                    if self.subscriptions.contains(&job_id) {
                        continue;
                    }
                    self.subscriptions.push(job_id.clone());
                    if let Err(e) = connection.send(&ClientMessage::JoinJob { job_id }).await {
                        return Outcome::Dropped(e.to_string());
                    }
                }
                Step::Command(Some(Command::Unsubscribe(job_id))) => {
                    if !self.subscriptions.contains(&job_id) {
                        continue;
                    }
                    self.subscriptions.retain(|id| *id != job_id);
                    if let Err(e) = connection.send(&ClientMessage::LeaveJob { job_id }).await {
                        return Outcome::Dropped(e.to_string());
                    }
                }
                Step::Command(Some(Command::Disconnect) | None) | Step::TokenChanged(false) => {
                    connection.close().await;
                    return Outcome::Stop;
                }
                Step::TokenChanged(true) => {
                    let current = token_rx.borrow_and_update().clone();
                    match current {
                        Some(ref t) if t == token => continue,
                        Some(_) => {
                            connection.close().await;
                            return Outcome::TokenChanged;
                        }
                        None => return Outcome::AuthRejected,
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) -> Option<Outcome> {
        match ServerEvent::decode(text) {
            Ok(ServerEvent::JobProgress(report)) => {
                let subscribed = report
                    .job_id
                    .as_ref()
                    .map_or(true, |id| self.subscriptions.contains(id));
                if subscribed {
                    self.emit(PushEvent::Progress(report));
                } else {
                    debug!(job_id = ?report.job_id, "progress for unsubscribed job dropped");
                }
                None
            }
            Ok(ServerEvent::AuthError { message }) => {
                debug!(message = message.as_deref().unwrap_or(""), "server sent authError");
                Some(Outcome::AuthRejected)
            }
            Err(ProtocolError::UnknownEvent(tag)) => {
                warn!(%tag, "unknown push event dropped");
                None
            }
            Err(e) => {
                warn!(error = %e, "malformed push frame dropped");
                None
            }
        }
    }
}
