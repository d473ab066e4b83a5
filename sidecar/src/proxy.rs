//! Request handlers for the sidecar proxy.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;

use browserkube_common::wdproto::{
    bad_gateway, replace_session, NewSessionRs, HEADER_COMMAND_ID, HEADER_SESSION_ID,
};
use browserkube_common::wsproxy::WsProxy;

use crate::SidecarState;

const WS_URL_FIELD: &str = "webSocketUrl";
const CDP_URL_FIELD: &str = "se:cdp";

/// Creates the one session this sidecar will ever serve. A second create
/// attempt is refused.
pub async fn start_session(
    State(state): State<Arc<SidecarState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.session.get().is_some() {
        return bad_gateway("only single session is supported");
    }

    let url = format!("{}/session", state.opts.engine_base());
    let rs = state
        .http
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.to_vec())
        .send()
        .await;
    let (status, text) = match rs {
        Ok(rs) => {
            let status = rs.status();
            match rs.text().await {
                Ok(text) => (status, text),
                Err(err) => return bad_gateway(err),
            }
        }
        Err(err) => return bad_gateway(err),
    };
    if status != StatusCode::OK {
        return passthrough(status, text.into_bytes());
    }

    let mut parsed: NewSessionRs = match serde_json::from_str(&text) {
        Ok(parsed) => parsed,
        Err(err) => return bad_gateway(err),
    };
    let engine_id = parsed.value.session_id.clone();
    let external_id = header_str(&headers, HEADER_SESSION_ID).unwrap_or(&engine_id);
    let host = header_str(&headers, header::HOST.as_str()).unwrap_or("localhost");
    let prefix = header_str(&headers, "x-forwarded-prefix").unwrap_or("");

    // The engine hands out localhost WebSocket URLs. Swap them for routable
    // paths and remember the originals for the bidi/cdp relays.
    let mut urls = crate::BidiUrls::default();
    urls.bidi = rewrite_ws_field(
        &mut parsed.value.capabilities,
        WS_URL_FIELD,
        host,
        prefix,
        external_id,
        "bidi",
    );
    urls.cdp = rewrite_ws_field(
        &mut parsed.value.capabilities,
        CDP_URL_FIELD,
        host,
        prefix,
        external_id,
        "cdp",
    );
    if urls.bidi.is_some() || urls.cdp.is_some() {
        let _ = state.bidi.set(urls);
    }

    let replaced = match serde_json::to_vec(&parsed) {
        Ok(replaced) => replaced,
        Err(err) => return bad_gateway(err),
    };
    let _ = state.session.set(engine_id.clone());
    tracing::info!(session = %engine_id, "session created");
    passthrough(StatusCode::OK, replaced)
}

/// Forwards one command, substituting the engine's session ID for whatever
/// ID the caller used and stamping the command counter on the response.
pub async fn proxy_command(
    State(state): State<Arc<SidecarState>>,
    method: Method,
    uri: Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(engine_id) = state.session.get() else {
        return bad_gateway("there is no active session");
    };
    state.idle.reset();

    let command_path = match replace_session(uri.path(), engine_id) {
        Ok(path) => path,
        Err(err) => return bad_gateway(err),
    };
    let mut url = format!("{}{}", state.opts.engine_base(), command_path);
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }

    // Drivers may accept local connections only.
    headers.remove(header::ORIGIN);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    tracing::debug!(method = %method, url = %url, "proxying command");
    let rs = state
        .http
        .request(method, &url)
        .headers(headers)
        .body(body.to_vec())
        .send()
        .await;
    let rs = match rs {
        Ok(rs) => rs,
        Err(err) => return bad_gateway(err),
    };

    let status = rs.status();
    let mut builder = Response::builder().status(status);
    for (name, value) in rs.headers().iter() {
        if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name, value);
    }
    let command_id = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
    builder = builder.header(HEADER_COMMAND_ID, command_id);

    match rs.bytes().await {
        Ok(body) => match builder.body(Body::from(body)) {
            Ok(rs) => rs,
            Err(err) => bad_gateway(err),
        },
        Err(err) => bad_gateway(err),
    }
}

pub async fn bidi(
    State(state): State<Arc<SidecarState>>,
    Path(_session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.bidi.get().and_then(|urls| urls.bidi.clone()) {
        Some(url) => WsProxy::new(url).serve(ws).await,
        None => bad_gateway("web socket url is empty"),
    }
}

pub async fn cdp(
    State(state): State<Arc<SidecarState>>,
    Path(_session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.bidi.get().and_then(|urls| urls.cdp.clone()) {
        Some(url) => WsProxy::new(url).serve(ws).await,
        None => bad_gateway("cdp websocket url is empty"),
    }
}

/// Readiness endpoint: relays the engine's own status answer.
pub async fn engine_status(State(state): State<Arc<SidecarState>>) -> Response {
    let url = format!("{}/status", state.opts.engine_base());
    relay_http(&state, state.http.get(&url)).await
}

pub async fn recorder_stop(State(state): State<Arc<SidecarState>>) -> Response {
    let url = format!(
        "{}/recorder/stop",
        state.opts.recorder_url.trim_end_matches('/')
    );
    relay_http(&state, state.http.post(&url)).await
}

async fn relay_http(_state: &SidecarState, rq: reqwest::RequestBuilder) -> Response {
    let rs = match rq.send().await {
        Ok(rs) => rs,
        Err(err) => return bad_gateway(err),
    };
    let status = rs.status();
    match rs.bytes().await {
        Ok(body) => passthrough(status, body.to_vec()),
        Err(err) => bad_gateway(err),
    }
}

fn passthrough(status: StatusCode, body: Vec<u8>) -> Response {
    match Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
    {
        Ok(rs) => rs,
        Err(err) => bad_gateway(err),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Replaces an engine-local WebSocket URL capability with a routable
/// `/wd/hub/{bidi|cdp}/<id>` path, returning the original engine URL.
fn rewrite_ws_field(
    caps: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
    host: &str,
    prefix: &str,
    external_id: &str,
    kind: &str,
) -> Option<String> {
    let engine_url = caps.get(key)?.as_str()?.to_owned();
    caps.insert(
        key.to_owned(),
        serde_json::Value::String(format!("ws://{host}{prefix}/wd/hub/{kind}/{external_id}")),
    );
    Some(engine_url)
}
