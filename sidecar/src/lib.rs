//! Per-pod sidecar proxy.
//!
//! Exactly one browser session lives behind each sidecar. It forwards the
//! WebDriver protocol to the engine in the same pod, remembers the engine's
//! session ID and its local WebSocket endpoints, serves downloads and
//! videos from the browser's home directory, and shuts the pod down when
//! the session idles out or exceeds its lifetime.

pub mod config;
pub mod logging;
pub mod proxy;
pub mod timer;

pub use config::SidecarOpts;

use std::path::Path;
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, OnceLock};

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::timer::IdleTimer;

/// Engine-local WebSocket endpoints captured from the session create
/// response.
#[derive(Debug, Default)]
pub struct BidiUrls {
    pub bidi: Option<String>,
    pub cdp: Option<String>,
}

pub struct SidecarState {
    pub opts: SidecarOpts,
    pub http: reqwest::Client,
    /// Session ID assigned by the engine. Write-once.
    pub session: OnceLock<String>,
    pub bidi: OnceLock<BidiUrls>,
    pub counter: AtomicI64,
    pub idle: IdleTimer,
}

impl SidecarState {
    pub fn new(opts: SidecarOpts, idle: IdleTimer) -> Self {
        Self {
            opts,
            http: reqwest::Client::new(),
            session: OnceLock::new(),
            bidi: OnceLock::new(),
            counter: AtomicI64::new(0),
            idle,
        }
    }
}

pub fn app(state: Arc<SidecarState>) -> Router {
    let home = Path::new(&state.opts.browser_home_dir);
    Router::new()
        .route("/wd/hub/session", post(proxy::start_session))
        .route("/wd/hub/session/*rest", any(proxy::proxy_command))
        .route("/wd/hub/bidi/:session_id", any(proxy::bidi))
        .route("/wd/hub/cdp/:session_id", any(proxy::cdp))
        .route("/wd/hub/status", get(proxy::engine_status))
        .route("/recorder/stop", any(proxy::recorder_stop))
        .nest_service("/downloads", ServeDir::new(home.join("Downloads")))
        .nest_service("/videos", ServeDir::new(home.join("videos")))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
