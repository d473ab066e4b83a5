//! Playwright session proxy.
//!
//! `GET /playwright/{browser}` provisions a PLAYWRIGHT browser and relays
//! the client's WebSocket straight to the Playwright server in the pod.
//! Every frame is appended to a message log; when the connection ends the
//! log is persisted, a SessionResult is recorded and the browser deleted.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, RawQuery, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use serde::Deserialize;

use browserkube_common::caps::Capabilities;
use browserkube_common::crd::TYPE_PLAYWRIGHT;
use browserkube_common::revuuid;
use browserkube_common::wdproto::bad_gateway;
use browserkube_common::wsproxy::{OnMessage, Verdict, WsMessage, WsProxy};

use crate::error::BackendError;
use crate::plugins::session_result::SessionResultPlugin;
use crate::proxy::trace_annotations;
use crate::session::Session;
use crate::storage::{BlobFile, MESSAGE_LOG_FILE_NAME};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PlaywrightQuery {
    #[serde(default, rename = "enableVNC")]
    pub enable_vnc: bool,
    #[serde(default, rename = "enableVideo")]
    pub enable_video: bool,
    #[serde(default, rename = "screenResolution")]
    pub screen_resolution: String,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/playwright/:browser", any(start_handler))
}

async fn start_handler(
    State(state): State<Arc<AppState>>,
    Path(browser_name): Path<String>,
    Query(opts): Query<PlaywrightQuery>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if browser_name.is_empty() {
        return bad_gateway(BackendError::Creation("browser must be provided".into()));
    }

    let id = revuuid::new_v7_reverse().to_string();
    let mut caps = Capabilities {
        platform: "linux".into(),
        browser_name: browser_name.clone(),
        ..Default::default()
    };
    caps.browserkube_opts.session_type = TYPE_PLAYWRIGHT.to_owned();
    caps.browserkube_opts.enable_vnc = opts.enable_vnc;
    caps.browserkube_opts.enable_video = opts.enable_video;
    caps.browserkube_opts.screen_resolution = opts.screen_resolution.clone();

    let annotations = trace_annotations(&headers);
    let browser = match state.provisioner.provision(&id, &caps, &annotations).await {
        Ok(browser) => browser,
        Err(err) => return bad_gateway(err),
    };
    let Some(status) = browser.status.clone() else {
        return bad_gateway(BackendError::NoEngine);
    };

    let mut url = format!("ws://{}:{}", status.host, status.port_config.browser);
    if let Some(query) = raw_query {
        url.push('?');
        url.push_str(&query);
    }
    tracing::debug!(session = %id, url = %url, "proxying playwright session");

    let log = Arc::new(Mutex::new(Vec::<u8>::new()));
    let record_in = record_middleware(log.clone());
    let record_out = record_middleware(log.clone());

    let teardown = teardown(state.clone(), id.clone(), browser, log);
    WsProxy::new(url)
        .on_incoming(record_in)
        .on_outgoing(record_out)
        .on_done(teardown)
        .serve(ws)
        .await
}

/// Appends every protocol frame to the session's message log.
fn record_middleware(log: Arc<Mutex<Vec<u8>>>) -> OnMessage {
    Arc::new(move |msg: &mut WsMessage| {
        if let Ok(mut line) = serde_json::to_vec(msg) {
            line.push(b'\n');
            // A panic elsewhere must not lose the frames recorded so far.
            let mut buf = log.lock().unwrap_or_else(|err| err.into_inner());
            buf.extend_from_slice(&line);
        }
        Verdict::Forward
    })
}

async fn teardown(
    state: Arc<AppState>,
    id: String,
    browser: browserkube_common::crd::Browser,
    log: Arc<Mutex<Vec<u8>>>,
) {
    let content = log.lock().unwrap_or_else(|err| err.into_inner()).clone();
    if !content.is_empty() {
        let save = state
            .storage
            .save_file(
                &id,
                "",
                BlobFile {
                    file_name: MESSAGE_LOG_FILE_NAME.into(),
                    content_type: "text/plain".into(),
                    content,
                },
            )
            .await;
        if let Err(err) = save {
            tracing::error!(session = %id, error = %err, "unable to save message log");
        }
    }

    let session = Session::from_browser(browser);
    let results = SessionResultPlugin::opts(state.results.clone(), state.storage.clone()).hooks;
    if let Err(err) = results.on_quit(&session).await {
        tracing::error!(session = %id, error = %err, "unable to save session result");
    }

    if let Err(err) = state.provisioner.delete(&id).await {
        tracing::error!(session = %id, error = %err, "unable to delete browser");
    }
}
