pub mod metadata;
pub mod publish;
pub mod remote;
pub mod scheduler;
pub mod status;
pub mod uploader;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;
use crate::walker::WalkError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("walk error: {0}")]
    Walk(#[from] WalkError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("portal error: {0}")]
    Portal(#[from] portal_core::PortalError),
    #[error("token request failed: {0}")]
    Auth(#[from] portal_core::OAuthError),
    #[error("metadata encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("timestamp formatting failed: {0}")]
    Time(#[from] time::error::Format),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
