// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the session lifecycle (login, refresh, verification).
///
/// Every variant ends the session locally; none are retried beyond the single
/// refresh attempt. `Clone` because concurrent `refresh()` callers share one
/// in-flight result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Refresh token rejected: {0}")]
    RefreshRejected(String),

    #[error("Token verification failed: {0}")]
    VerificationFailed(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session ended while the request was in flight")]
    SessionEnded,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

/// Errors raised by the push and poll transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Push authentication rejected")]
    AuthRejected,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Failed to connect after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Status request failed: {0}")]
    Poll(String),

    #[error("Job polling timeout exceeded")]
    PollDeadline,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Wire-level decoding failures on the push channel or status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unrecognized event tag: {0}")]
    UnknownEvent(String),

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Input rejected before any network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Job ID is required")]
    EmptyJobId,

    #[error("Malformed job ID: {0}")]
    MalformedJobId(String),

    #[error("URL is required")]
    MissingUrl,

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("Text content is required")]
    MissingText,

    #[error("File not readable: {path}")]
    UnreadableFile { path: PathBuf },

    #[error("File is empty: {path}")]
    EmptyFile { path: PathBuf },
}

impl ValidationError {
    pub fn unreadable(path: impl Into<PathBuf>) -> Self {
        Self::UnreadableFile { path: path.into() }
    }
}
