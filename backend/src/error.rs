use axum::http::StatusCode;

use browserkube_common::caps::CapsError;
use browserkube_common::wdproto::ProtoError;

use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("browser creation failed: {0}")]
    Creation(String),
    #[error("timed out waiting for browser {0}")]
    ProvisionTimeout(String),
    #[error("browser {0} was deleted before it became ready")]
    Deleted(String),
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error(transparent)]
    Caps(#[from] CapsError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("watch stream failed: {0}")]
    Watch(String),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("upstream returned status {0}")]
    UpstreamStatus(StatusCode),
    #[error("no engine resolved for session")]
    NoEngine,
}
