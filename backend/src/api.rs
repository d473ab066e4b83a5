//! REST surface over the session directory.
//!
//! - `GET /api/sessions` lists live sessions, newest first
//! - `GET /api/status` reports the session quota
//! - `GET /api/events` streams session change batches over a WebSocket

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use browserkube_common::broadcast;

use crate::session::Session;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub state: &'static str,
    pub browser_name: String,
    pub browser_version: String,
    #[serde(rename = "type")]
    pub session_type: String,
    #[serde(rename = "enableVNC")]
    pub enable_vnc: bool,
    pub manual: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            state: session.state,
            browser_name: session.browser.spec.browser_name.clone(),
            browser_version: session.browser.spec.browser_version.clone(),
            session_type: session.browser.spec.session_type.clone(),
            enable_vnc: session.browser.spec.enable_vnc,
            manual: session.caps.browserkube_opts.manual,
            created_at: session
                .browser
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuotaView {
    pub used: i64,
    pub hard: i64,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sessions", get(sessions_handler))
        .route("/api/status", get(status_handler))
        .route("/api/events", get(events_handler))
}

async fn sessions_handler(State(state): State<Arc<AppState>>) -> Json<Vec<SessionView>> {
    let mut sessions = state.repo.find_all();
    sessions.sort_by(|a, b| {
        let ts = |s: &Session| s.browser.metadata.creation_timestamp.as_ref().map(|t| t.0);
        ts(b).cmp(&ts(a))
    });
    Json(sessions.iter().map(SessionView::from).collect())
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<QuotaView> {
    let (used, hard) = state.repo.quota();
    Json(QuotaView { used, hard })
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    /// Optional batch window override, e.g. `2s`.
    batch: Option<String>,
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let window = match query.batch.as_deref() {
        Some(raw) => match humantime::parse_duration(raw) {
            Ok(window) if !window.is_zero() => window,
            _ => {
                return (StatusCode::BAD_REQUEST, "incorrect batch interval").into_response()
            }
        },
        None => state.events_window,
    };
    ws.on_upgrade(move |socket| stream_events(state, socket, window))
}

async fn stream_events(state: Arc<AppState>, socket: WebSocket, window: std::time::Duration) {
    let changes = state.repo.watch().await;
    let mut batches = broadcast::batch(changes, window);
    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            batch = batches.recv() => {
                let Some(batch) = batch else { break };
                let views: Vec<SessionView> = batch.iter().map(SessionView::from).collect();
                let text = match serde_json::to_string(&views) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::error!(error = %err, "unable to encode event batch");
                        continue;
                    }
                };
                if tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = rx.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            }
        }
    }
}
