// crates/client/src/api.rs
//! Typed HTTP client for the Explainer REST API.
//!
//! `AuthApi` and `JobApi` are the seams the session and the transports
//! depend on; `ApiClient` implements both over `reqwest`.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use explainer_core::{
    AuthResponse, ClientConfig, GenerateFileRequest, GenerateTextRequest, GenerateVideoRequest,
    GenerateVideoResponse, JobId, JobReport, LoginCredentials, RegisterCredentials,
    VerifyResponse,
};

use crate::error::ApiError;

/// Session endpoints under `/auth`.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ApiError>;

    async fn register(&self, credentials: &RegisterCredentials) -> Result<AuthResponse, ApiError>;

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, ApiError>;

    async fn logout(&self, access_token: &str) -> Result<(), ApiError>;

    async fn verify(&self, access_token: &str) -> Result<VerifyResponse, ApiError>;
}

/// Job endpoints under `/video-job`. `token` is the bearer read at send time.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn generate_video(
        &self,
        token: Option<&str>,
        request: &GenerateVideoRequest,
    ) -> Result<GenerateVideoResponse, ApiError>;

    async fn generate_video_from_file(
        &self,
        token: Option<&str>,
        request: GenerateFileRequest,
    ) -> Result<GenerateVideoResponse, ApiError>;

    async fn generate_video_from_text(
        &self,
        token: Option<&str>,
        request: &GenerateTextRequest,
    ) -> Result<GenerateVideoResponse, ApiError>;

    async fn job_status(&self, token: Option<&str>, job_id: &JobId) -> Result<JobReport, ApiError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// `reqwest`-backed implementation of [`AuthApi`] and [`JobApi`].
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn with_bearer(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Map a non-2xx response to `ApiError::Status`, preferring the body's
/// `message` field over the generic status line.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let fallback = format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or(fallback);
    tracing::debug!(status = status.as_u16(), %message, "API request failed");
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ApiError> {
        self.send(self.client.post(self.url("/auth/login")).json(credentials))
            .await
    }

    async fn register(&self, credentials: &RegisterCredentials) -> Result<AuthResponse, ApiError> {
        self.send(self.client.post(self.url("/auth/register")).json(credentials))
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        let body = serde_json::json!({ "refreshToken": refresh_token });
        self.send(self.client.post(self.url("/auth/refresh")).json(&body))
            .await
    }

    async fn logout(&self, access_token: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        check_status(response).await.map(|_| ())
    }

    async fn verify(&self, access_token: &str) -> Result<VerifyResponse, ApiError> {
        self.send(self.client.get(self.url("/auth/verify")).bearer_auth(access_token))
            .await
    }
}

#[async_trait]
impl JobApi for ApiClient {
    async fn generate_video(
        &self,
        token: Option<&str>,
        request: &GenerateVideoRequest,
    ) -> Result<GenerateVideoResponse, ApiError> {
        let builder = self.client.post(self.url("/video-job/generate-video")).json(request);
        self.send(with_bearer(builder, token)).await
    }

    async fn generate_video_from_file(
        &self,
        token: Option<&str>,
        request: GenerateFileRequest,
    ) -> Result<GenerateVideoResponse, ApiError> {
        let mut form = Form::new().part(
            "file",
            Part::bytes(request.contents).file_name(request.file_name),
        );
        if let Some(voice) = request.voice {
            form = form.text("voice", voice);
        }
        if let Some(style) = request.style {
            form = form.text("style", style);
        }
        let builder = self
            .client
            .post(self.url("/video-job/generate-video/file"))
            .multipart(form);
        self.send(with_bearer(builder, token)).await
    }

    async fn generate_video_from_text(
        &self,
        token: Option<&str>,
        request: &GenerateTextRequest,
    ) -> Result<GenerateVideoResponse, ApiError> {
        let builder = self
            .client
            .post(self.url("/video-job/generate-video/text"))
            .json(request);
        self.send(with_bearer(builder, token)).await
    }

    async fn job_status(&self, token: Option<&str>, job_id: &JobId) -> Result<JobReport, ApiError> {
        let builder = self
            .client
            .get(self.url(&format!("/video-job/status/{job_id}")));
        self.send(with_bearer(builder, token)).await
    }
}
