//! BrowserKube backend: the public entry point for browser sessions.
//!
//! The backend fronts every browser pod in the cluster. It provisions
//! Browser custom resources on session creation, proxies WebDriver and
//! Playwright traffic to the per-pod sidecar, and exposes a small REST
//! surface over the live session directory.

pub mod api;
pub mod config;
pub mod error;
pub mod k8s;
pub mod logging;
pub mod playwright;
pub mod plugins;
pub mod proxy;
pub mod session;
pub mod storage;

pub use config::BackendOpts;
pub use error::BackendError;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::k8s::{Provisioner, ResultsRepository};
use crate::proxy::HookChain;
use crate::session::SessionRepository;
use crate::storage::SessionStorage;

/// Everything the request handlers share.
pub struct AppState {
    pub repo: Arc<dyn SessionRepository>,
    pub provisioner: Arc<dyn Provisioner>,
    pub results: Arc<dyn ResultsRepository>,
    pub storage: Arc<dyn SessionStorage>,
    pub chain: HookChain,
    pub http: reqwest::Client,
    pub events_window: std::time::Duration,
}

/// Builds the full backend router: WebDriver proxy, Playwright proxy and
/// the REST/event surface, wrapped in CORS and request tracing.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(proxy::router())
        .merge(playwright::router())
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
