// crates/client/src/error.rs
use std::path::PathBuf;

use explainer_core::{AuthError, TransportError, ValidationError};
use thiserror::Error;

/// Failure talking to the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 401 or 403 from the server.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if err.is_connect() {
            ApiError::Network("Unable to connect to server".into())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Failure reading or writing persisted credential entries.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on credential store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt credential store {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

/// Errors surfaced by the `ExplainerClient` facade.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to start video generation: {0}")]
    Api(#[from] ApiError),
}

impl ClientError {
    /// Whether the host should route the user to sign-in.
    pub fn requires_sign_in(&self) -> bool {
        match self {
            ClientError::Auth(_) => true,
            ClientError::Api(api) => api.is_unauthorized(),
            _ => false,
        }
    }
}
