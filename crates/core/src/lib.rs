// crates/core/src/lib.rs
pub mod config;
pub mod credential;
pub mod error;
pub mod job;
pub mod protocol;

pub use config::*;
pub use credential::*;
pub use error::*;
pub use job::*;
pub use protocol::*;
