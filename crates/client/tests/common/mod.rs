// crates/client/tests/common/mod.rs
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use tokio::time::Instant;

use explainer_client::{ApiError, AuthApi, JobApi, PushConnection, PushConnector};
use explainer_core::{
    AuthResponse, ClientMessage, GenerateFileRequest, GenerateTextRequest, GenerateVideoRequest,
    GenerateVideoResponse, JobId, JobReport, LoginCredentials, RegisterCredentials,
    TransportError, User, VerifyResponse,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Unsigned JWT whose `exp` is `ttl_secs` from now (negative = already past).
pub fn jwt_expiring_in(ttl_secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + ttl_secs;
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

pub fn user() -> User {
    User {
        id: "u1".into(),
        email: "ada@example.com".into(),
        name: "Ada".into(),
    }
}

pub fn report(value: serde_json::Value) -> JobReport {
    serde_json::from_value(value).unwrap()
}

pub fn job_id(raw: &str) -> JobId {
    JobId::parse(raw).unwrap()
}

pub fn login() -> LoginCredentials {
    LoginCredentials {
        email: "ada@example.com".into(),
        password: "hunter22".into(),
    }
}

// ---------------------------------------------------------------------------
// Auth API
// ---------------------------------------------------------------------------

pub struct FakeAuth {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    /// Lifetime of tokens issued by login, register and refresh.
    pub token_ttl_secs: AtomicI64,
    pub refresh_delay: Mutex<Duration>,
    pub verify_delay: Mutex<Duration>,
    pub fail_login: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub fail_logout: AtomicBool,
    pub fail_verify: AtomicBool,
    issued: AtomicUsize,
}

impl FakeAuth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            token_ttl_secs: AtomicI64::new(24 * 3600),
            refresh_delay: Mutex::new(Duration::ZERO),
            verify_delay: Mutex::new(Duration::ZERO),
            fail_login: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
            fail_logout: AtomicBool::new(false),
            fail_verify: AtomicBool::new(false),
            issued: AtomicUsize::new(0),
        })
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn set_verify_delay(&self, delay: Duration) {
        *self.verify_delay.lock().unwrap() = delay;
    }

    fn issue(&self) -> AuthResponse {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        AuthResponse {
            user: user(),
            token: jwt_expiring_in(self.token_ttl_secs.load(Ordering::SeqCst)),
            refresh_token: format!("refresh-{n}"),
        }
    }
}

fn unauthorized(message: &str) -> ApiError {
    ApiError::Status {
        status: 401,
        message: message.into(),
    }
}

#[async_trait]
impl AuthApi for FakeAuth {
    async fn login(&self, _credentials: &LoginCredentials) -> Result<AuthResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(unauthorized("Invalid email or password"));
        }
        Ok(self.issue())
    }

    async fn register(&self, _credentials: &RegisterCredentials) -> Result<AuthResponse, ApiError> {
        Ok(self.issue())
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<AuthResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(unauthorized("Invalid refresh token"));
        }
        Ok(self.issue())
    }

    async fn logout(&self, _access_token: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(ApiError::Network("Unable to connect to server".into()));
        }
        Ok(())
    }

    async fn verify(&self, _access_token: &str) -> Result<VerifyResponse, ApiError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.verify_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(unauthorized("Token expired"));
        }
        Ok(VerifyResponse { user: user() })
    }
}

// ---------------------------------------------------------------------------
// Job API
// ---------------------------------------------------------------------------

pub struct FakeJobs {
    pub job_id: String,
    pub generate_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub status_tokens: Mutex<Vec<Option<String>>>,
    statuses: Mutex<VecDeque<Result<JobReport, ApiError>>>,
}

impl FakeJobs {
    pub fn new(job_id: &str) -> Arc<Self> {
        Arc::new(Self {
            job_id: job_id.into(),
            generate_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            status_tokens: Mutex::new(Vec::new()),
            statuses: Mutex::new(VecDeque::new()),
        })
    }

    /// Queue the responses of successive status requests. Once the queue is
    /// empty every request reports `processing`.
    pub fn script(&self, responses: Vec<Result<JobReport, ApiError>>) {
        self.statuses.lock().unwrap().extend(responses);
    }

    fn accepted(&self) -> GenerateVideoResponse {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        GenerateVideoResponse {
            job_id: self.job_id.clone(),
            message: Some("Video generation started".into()),
        }
    }
}

#[async_trait]
impl JobApi for FakeJobs {
    async fn generate_video(
        &self,
        _token: Option<&str>,
        _request: &GenerateVideoRequest,
    ) -> Result<GenerateVideoResponse, ApiError> {
        Ok(self.accepted())
    }

    async fn generate_video_from_file(
        &self,
        _token: Option<&str>,
        _request: GenerateFileRequest,
    ) -> Result<GenerateVideoResponse, ApiError> {
        Ok(self.accepted())
    }

    async fn generate_video_from_text(
        &self,
        _token: Option<&str>,
        _request: &GenerateTextRequest,
    ) -> Result<GenerateVideoResponse, ApiError> {
        Ok(self.accepted())
    }

    async fn job_status(&self, token: Option<&str>, job_id: &JobId) -> Result<JobReport, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_tokens
            .lock()
            .unwrap()
            .push(token.map(str::to_string));
        let next = self.statuses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(report(serde_json::json!({
                "jobId": job_id.as_str(),
                "status": "processing",
            })))
        })
    }
}

// ---------------------------------------------------------------------------
// Push connector
// ---------------------------------------------------------------------------

pub enum ConnectOutcome {
    Fail,
    Reject,
    /// Deliver `frames`, then stay open (`true`) or close (`false`).
    Accept { frames: Vec<String>, keep_open: bool },
}

pub struct FakeConnector {
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    pub attempts: Mutex<Vec<Instant>>,
    pub tokens: Mutex<Vec<String>>,
    pub sent: Arc<Mutex<Vec<ClientMessage>>>,
}

impl FakeConnector {
    /// Connects play out `outcomes` in order, then fail forever.
    pub fn new(outcomes: Vec<ConnectOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            attempts: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self, token: &str) -> Result<Box<dyn PushConnection>, TransportError> {
        self.attempts.lock().unwrap().push(Instant::now());
        self.tokens.lock().unwrap().push(token.to_string());
        let outcome = self.outcomes.lock().unwrap().pop_front();
        match outcome.unwrap_or(ConnectOutcome::Fail) {
            ConnectOutcome::Fail => Err(TransportError::Connect("connection refused".into())),
            ConnectOutcome::Reject => Err(TransportError::AuthRejected),
            ConnectOutcome::Accept { frames, keep_open } => Ok(Box::new(FakeConnection {
                frames: frames.into(),
                keep_open,
                sent: Arc::clone(&self.sent),
            })),
        }
    }
}

struct FakeConnection {
    frames: VecDeque<String>,
    keep_open: bool,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
}

#[async_trait]
impl PushConnection for FakeConnection {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        if let Some(frame) = self.frames.pop_front() {
            return Some(Ok(frame));
        }
        if self.keep_open {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {}
}
