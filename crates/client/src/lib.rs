// crates/client/src/lib.rs
//! Client-side job progress sync and session lifecycle for Explainer.
//!
//! - [`Session`] keeps one fresh bearer credential for every request.
//! - [`JobChannel`] delivers canonical `JobState` for one job, over push
//!   with failover to polling.
//! - [`ExplainerClient`] ties both to the REST API for UI collaborators.

pub mod api;
pub mod channel;
pub mod client;
pub mod error;
pub mod poll;
pub mod push;
pub mod session;
pub mod store;

pub use api::{ApiClient, AuthApi, JobApi};
pub use channel::{JobChannel, JobHandle, TransportMode, TransportSet};
pub use client::{ExplainerClient, GenerationOptions};
pub use error::{ApiError, ClientError, StoreError};
pub use poll::{PollEvent, PollTransport};
pub use push::{PushConnection, PushConnector, PushEvent, PushState, PushTransport, WsConnector};
pub use session::{Session, SessionSnapshot, SessionStatus};
pub use store::{CredentialStore, FileStore, MemoryStore};
