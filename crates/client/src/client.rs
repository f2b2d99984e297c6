// crates/client/src/client.rs
//! `ExplainerClient`: the surface UI collaborators drive.
//!
//! Wraps the session, the job endpoints and at most one open `JobChannel`.
//! Starting a new generation or watching another job first closes the
//! previous channel and waits for its transports to stop.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::info;

use explainer_core::{
    ClientConfig, GenerateFileRequest, GenerateTextRequest, GenerateVideoRequest,
    GenerateVideoResponse, JobId, JobState, LoginCredentials, RegisterCredentials, User,
    ValidationError,
};

use crate::api::{ApiClient, AuthApi, JobApi};
use crate::channel::{JobChannel, JobHandle, TransportMode, TransportSet};
use crate::error::ClientError;
use crate::push::{PushConnector, WsConnector};
use crate::session::{Session, SessionSnapshot};
use crate::store::{CredentialStore, FileStore, MemoryStore};

/// Optional presentation knobs forwarded with every generation request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOptions {
    pub voice: Option<String>,
    pub style: Option<String>,
}

#[derive(Default)]
struct JobSlot {
    channel: Option<JobChannel>,
    /// Last state of a channel closed by `stop()`.
    stopped: Option<JobState>,
}

pub struct ExplainerClient {
    session: Session,
    jobs: Arc<dyn JobApi>,
    transports: TransportSet,
    slot: Mutex<JobSlot>,
}

impl ExplainerClient {
    /// Wire the production stack: `reqwest` API client, WebSocket push,
    /// and a file store (or memory when `store_path` is `None`).
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let api = Arc::new(ApiClient::new(&config)?);
        let store: Arc<dyn CredentialStore> = match &config.store_path {
            Some(path) => Arc::new(FileStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        };
        let connector = Arc::new(WsConnector::new(config.push_url.clone()));
        Ok(Self::from_parts(&config, api.clone(), api, store, connector))
    }

    pub fn from_parts(
        config: &ClientConfig,
        auth: Arc<dyn AuthApi>,
        jobs: Arc<dyn JobApi>,
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn PushConnector>,
    ) -> Self {
        let session = Session::new(auth, store, config.refresh_margin);
        let transports = TransportSet {
            jobs: Arc::clone(&jobs),
            connector,
            push: config.push.clone(),
            poll: config.poll.clone(),
        };
        Self {
            session,
            jobs,
            transports,
            slot: Mutex::new(JobSlot::default()),
        }
    }

    // ── Session ─────────────────────────────────────────────────────────

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn initialize(&self) {
        self.session.initialize().await;
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.session.user()
    }

    pub fn watch_session(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let credentials = LoginCredentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        Ok(self.session.login(&credentials).await?)
    }

    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<User, ClientError> {
        let credentials = RegisterCredentials {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
        };
        Ok(self.session.register(&credentials).await?)
    }

    pub async fn check_auth_status(&self) -> Result<User, ClientError> {
        Ok(self.session.check_auth_status().await?)
    }

    /// Close any open job channel, then end the session.
    pub async fn logout(&self) {
        self.reset().await;
        self.session.logout().await;
    }

    // ── Generation ──────────────────────────────────────────────────────

    pub async fn generate_video(
        &self,
        url: &str,
        options: GenerationOptions,
    ) -> Result<JobHandle, ClientError> {
        let url = validate_url(url)?;
        let request = GenerateVideoRequest {
            url,
            voice: options.voice,
            style: options.style,
        };
        self.reset().await;
        let token = self.session.access_token().await;
        let response = self.jobs.generate_video(token.as_deref(), &request).await?;
        self.accept(response).await
    }

    pub async fn generate_video_from_file(
        &self,
        path: &Path,
        options: GenerationOptions,
    ) -> Result<JobHandle, ClientError> {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|_| ValidationError::unreadable(path))?;
        if contents.is_empty() {
            return Err(ValidationError::EmptyFile {
                path: path.to_path_buf(),
            }
            .into());
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ValidationError::unreadable(path))?;
        let request = GenerateFileRequest {
            file_name,
            contents,
            voice: options.voice,
            style: options.style,
        };
        self.reset().await;
        let token = self.session.access_token().await;
        let response = self
            .jobs
            .generate_video_from_file(token.as_deref(), request)
            .await?;
        self.accept(response).await
    }

    pub async fn generate_video_from_text(
        &self,
        text: &str,
        options: GenerationOptions,
    ) -> Result<JobHandle, ClientError> {
        if text.trim().is_empty() {
            return Err(ValidationError::MissingText.into());
        }
        let request = GenerateTextRequest {
            text: text.to_string(),
            voice: options.voice,
            style: options.style,
        };
        self.reset().await;
        let token = self.session.access_token().await;
        let response = self
            .jobs
            .generate_video_from_text(token.as_deref(), &request)
            .await?;
        self.accept(response).await
    }

    async fn accept(&self, response: GenerateVideoResponse) -> Result<JobHandle, ClientError> {
        let job_id = JobId::parse(&response.job_id)?;
        info!(job_id = %job_id, "generation accepted");
        Ok(self.watch_job(job_id).await)
    }

    // ── Job channel ─────────────────────────────────────────────────────

    /// Open a channel for `job_id`, replacing whatever was open before.
    pub async fn watch_job(&self, job_id: JobId) -> JobHandle {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.channel.take() {
            previous.close().await;
        }
        slot.stopped = None;
        let channel = JobChannel::open(job_id, self.session.clone(), self.transports.clone());
        let handle = channel.handle();
        slot.channel = Some(channel);
        handle
    }

    /// Close the open channel and forget its state.
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(channel) = slot.channel.take() {
            channel.close().await;
        }
        slot.stopped = None;
    }

    /// Close the open channel but keep its last state readable.
    pub async fn stop(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(channel) = slot.channel.take() {
            let last = channel.state();
            channel.close().await;
            slot.stopped = Some(last);
        }
    }

    pub async fn job_handle(&self) -> Option<JobHandle> {
        let slot = self.slot.lock().await;
        slot.channel.as_ref().map(JobChannel::handle)
    }

    pub async fn job_state(&self) -> Option<JobState> {
        let slot = self.slot.lock().await;
        match &slot.channel {
            Some(channel) => Some(channel.state()),
            None => slot.stopped.clone(),
        }
    }

    /// Receiver for the open channel's state. Its sender is dropped when the
    /// channel closes.
    pub async fn subscribe_job(&self) -> Option<watch::Receiver<JobState>> {
        let slot = self.slot.lock().await;
        slot.channel.as_ref().map(JobChannel::subscribe)
    }

    pub async fn watch_mode(&self) -> Option<watch::Receiver<TransportMode>> {
        let slot = self.slot.lock().await;
        slot.channel.as_ref().map(JobChannel::watch_mode)
    }
}

fn validate_url(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingUrl);
    }
    let parsed =
        reqwest::Url::parse(trimmed).map_err(|_| ValidationError::InvalidUrl(trimmed.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidUrl(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}
