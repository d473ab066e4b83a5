//! BrowserKube operator: reconciles Browser custom resources into browser
//! pods and tracks their lifecycle through the session phase machine.

pub mod config;
pub mod controller;
pub mod image;
pub mod logging;
pub mod pod;

pub use config::ControllerOpts;

#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("unsupported browser image: {0}")]
    UnsupportedImage(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("browser has no namespace")]
    MissingNamespace,
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<OperatorError>>),
}
