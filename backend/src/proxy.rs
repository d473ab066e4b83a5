//! WebDriver protocol proxy with a weighted plugin hook chain.
//!
//! Plugins contribute hooks for five lifecycle points. At startup the chain
//! is sorted by descending weight (ties keep registration order); pre-hooks
//! run heaviest first and post-hooks run in reverse, so a heavy plugin wraps
//! everything a lighter one does. Quit hooks run heaviest first: the
//! artifact collectors persist their files before the lifecycle plugins cut
//! the session record. A failing pre-hook aborts the request with a Bad
//! Gateway; failing post-hooks are logged and the chain continues.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, delete, post};
use axum::Router;
use bytes::Bytes;

use browserkube_common::caps::{Capabilities, NewSessionRq};
use browserkube_common::crd::Browser;
use browserkube_common::revuuid;
use browserkube_common::wdproto::{
    bad_gateway, parse_session_path, NewSessionRs, HEADER_SESSION_ID,
};
use browserkube_common::wsproxy::WsProxy;

use crate::error::BackendError;
use crate::session::Session;
use crate::AppState;

/// Mutable context of a session being created. The provisioning hook fills
/// in the engine URL and the Browser resource.
pub struct SessionCreation {
    pub id: String,
    pub caps: Capabilities,
    /// Request body to forward to the engine.
    pub body: Vec<u8>,
    /// Base URL the create request is forwarded to, e.g.
    /// `http://10.0.0.4:9999/wd/hub`. Empty until a hook resolves it.
    pub engine_url: String,
    pub browser: Option<Browser>,
    /// Annotations to stamp on the Browser resource, e.g. the trace
    /// context of the create request.
    pub annotations: BTreeMap<String, String>,
}

/// One WebDriver command about to be forwarded.
pub struct Command {
    pub method: Method,
    /// Command remainder after the session ID, e.g. `/url`. Empty for the
    /// session resource itself.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// The engine's answer to a forwarded command.
pub struct CommandOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Lifecycle hooks a plugin may implement. Every method defaults to a no-op.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    async fn before_session(&self, _ctx: &mut SessionCreation) -> Result<(), BackendError> {
        Ok(())
    }
    /// Runs after a successful session creation. `upstream_id` is the ID the
    /// engine assigned before it was rewritten.
    async fn after_session(
        &self,
        _session: &Session,
        _upstream_id: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }
    async fn before_command(
        &self,
        _cmd: &mut Command,
        _session: &Session,
    ) -> Result<(), BackendError> {
        Ok(())
    }
    async fn after_command(
        &self,
        _cmd: &Command,
        _outcome: &CommandOutcome,
        _session: &Session,
    ) -> Result<(), BackendError> {
        Ok(())
    }
    /// Runs exactly once when a session quits, including when the quit
    /// command itself failed in transit.
    async fn on_quit(&self, _session: &Session) -> Result<(), BackendError> {
        Ok(())
    }
}

/// A plugin's hooks plus its position in the chain.
pub struct PluginOpts {
    pub weight: u8,
    pub hooks: Arc<dyn SessionHooks>,
}

/// The composed hook chain.
pub struct HookChain {
    plugins: Vec<Arc<dyn SessionHooks>>,
}

impl HookChain {
    pub fn new(mut opts: Vec<PluginOpts>) -> Self {
        // The vendor upload-path fix always runs innermost.
        opts.push(PluginOpts {
            weight: 0,
            hooks: Arc::new(UploadPathPlugin),
        });
        // Stable sort: plugins of equal weight keep registration order.
        opts.sort_by(|a, b| b.weight.cmp(&a.weight));
        Self {
            plugins: opts.into_iter().map(|o| o.hooks).collect(),
        }
    }

    pub async fn before_session(&self, ctx: &mut SessionCreation) -> Result<(), BackendError> {
        for plugin in &self.plugins {
            plugin.before_session(ctx).await?;
        }
        Ok(())
    }

    pub async fn after_session(&self, session: &Session, upstream_id: &str) {
        for plugin in self.plugins.iter().rev() {
            if let Err(err) = plugin.after_session(session, upstream_id).await {
                tracing::error!(session = %session.id, error = %err, "after-session hook failed");
            }
        }
    }

    pub async fn before_command(
        &self,
        cmd: &mut Command,
        session: &Session,
    ) -> Result<(), BackendError> {
        for plugin in &self.plugins {
            plugin.before_command(cmd, session).await?;
        }
        Ok(())
    }

    pub async fn after_command(
        &self,
        cmd: &Command,
        outcome: &CommandOutcome,
        session: &Session,
    ) {
        for plugin in self.plugins.iter().rev() {
            if let Err(err) = plugin.after_command(cmd, outcome, session).await {
                tracing::error!(session = %session.id, error = %err, "after-command hook failed");
            }
        }
    }

    pub async fn quit(&self, session: &Session) {
        // Heaviest first: collectors write their artifacts while the pod is
        // still around and before the session record is created.
        for plugin in &self.plugins {
            if let Err(err) = plugin.on_quit(session).await {
                tracing::error!(session = %session.id, error = %err, "quit hook failed");
            }
        }
    }
}

/// Rewrites the Selenium vendor upload path to the plain W3C one.
struct UploadPathPlugin;

#[async_trait]
impl SessionHooks for UploadPathPlugin {
    async fn before_command(
        &self,
        cmd: &mut Command,
        _session: &Session,
    ) -> Result<(), BackendError> {
        if let Some(prefix) = cmd.path.strip_suffix("/se/file") {
            cmd.path = format!("{prefix}/file");
        }
        Ok(())
    }
}

/// Removes the browser-origin headers a CORS-happy client attaches; the
/// engine rejects requests carrying them.
pub fn cleanup_origin_headers(headers: &mut HeaderMap) {
    headers.remove(header::ORIGIN);
    let cors: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("access-control"))
        .cloned()
        .collect();
    for name in cors {
        headers.remove(name);
    }
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::TRANSFER_ENCODING);
}

/// Lifts the W3C trace context headers into resource annotations so the
/// caller's trace survives the hop through the cluster.
pub fn trace_annotations(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    for name in ["traceparent", "tracestate"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            annotations.insert(name.to_owned(), value.to_owned());
        }
    }
    annotations
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/wd/hub/session", post(start_session_handler))
        .route("/wd/hub/session/*rest", any(session_command_handler))
        .route("/wd/hub/bidi/:session_id", any(bidi_handler))
        .route("/wd/hub/cdp/:session_id", any(cdp_handler))
        .route("/api/browsers", post(create_browser_handler))
        .route("/api/browsers/*rest", delete(delete_browser_handler))
}

async fn start_session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let rq: NewSessionRq = match serde_json::from_slice(&body) {
        Ok(rq) => rq,
        Err(err) => return bad_gateway(err),
    };
    create_session(&state, rq, headers).await
}

/// Shared session creation flow for the protocol endpoint and the manual
/// browser API.
pub async fn create_session(
    state: &Arc<AppState>,
    mut rq: NewSessionRq,
    mut headers: HeaderMap,
) -> Response {
    if let Err(err) = rq.adjust() {
        return bad_gateway(err);
    }

    // Reversed IDs make newest-first listings come for free from etcd.
    let id = revuuid::new_v7_reverse().to_string();
    let body = match serde_json::to_vec(&rq) {
        Ok(body) => body,
        Err(err) => return bad_gateway(err),
    };
    let mut ctx = SessionCreation {
        id: id.clone(),
        caps: rq.capabilities.clone(),
        body,
        engine_url: String::new(),
        browser: None,
        annotations: trace_annotations(&headers),
    };

    if let Err(err) = state.chain.before_session(&mut ctx).await {
        return bad_gateway(err);
    }
    if ctx.engine_url.is_empty() {
        return bad_gateway(BackendError::NoEngine);
    }

    cleanup_origin_headers(&mut headers);
    strip_hop_headers(&mut headers);
    let url = format!("{}/session", ctx.engine_url.trim_end_matches('/'));
    let rs = state
        .http
        .post(url)
        .headers(headers)
        .header(header::CONTENT_TYPE, "application/json")
        // The sidecar rewrites engine-local URLs to paths carrying this ID.
        .header(HEADER_SESSION_ID, &id)
        .body(ctx.body.clone())
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

    // A failed create carries the engine's own diagnostic, e.g. a W3C
    // "session not created" payload. Relay it untouched.
    if !status.is_success() {
        tracing::warn!(session = %id, status = %status, "engine rejected session create");
        return match Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(text))
        {
            Ok(rs) => rs,
            Err(err) => bad_gateway(err),
        };
    }

    let parsed: NewSessionRs = match serde_json::from_str(&text) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::error!(session = %id, "malformed session create response");
            return bad_gateway(err);
        }
    };
    let upstream_id = parsed.value.session_id;
    if upstream_id.is_empty() {
        return bad_gateway(BackendError::Creation(
            "engine returned an empty session id".into(),
        ));
    }

    // The engine ID appears in the sessionId field and in any engine-local
    // URLs the sidecar rewrote (webSocketUrl, se:cdp). Replace them all.
    let rewritten = text.replace(&upstream_id, &id);

    let browser = ctx
        .browser
        .clone()
        .unwrap_or_else(|| Browser::new(&id, Default::default()));
    let mut session = Session::from_browser(browser);
    session.id = id.clone();
    session.caps = ctx.caps.clone();
    state.chain.after_session(&session, &upstream_id).await;

    tracing::info!(session = %id, upstream = %upstream_id, "session created");
    match Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(rewritten))
    {
        Ok(rs) => rs,
        Err(err) => bad_gateway(err),
    }
}

async fn session_command_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (session_id, command) = match parse_session_path(uri.path()) {
        Ok(parsed) => parsed,
        Err(err) => return bad_gateway(err),
    };

    if let Some(rest) = command.strip_prefix("/browserkube/downloads") {
        return proxy_downloads(&state, session_id, rest, uri.query()).await;
    }

    cleanup_origin_headers(&mut headers);
    strip_hop_headers(&mut headers);
    let cmd = Command {
        method,
        path: command.to_owned(),
        headers,
        body: body.to_vec(),
    };
    proxy_command(&state, session_id, cmd, uri.query()).await
}

/// Forwards one command to the session's engine, running the hook chain
/// around it. DELETE on the bare session resource quits the session; the
/// quit hooks fire exactly once even when the forward itself fails.
pub async fn proxy_command(
    state: &Arc<AppState>,
    session_id: &str,
    mut cmd: Command,
    query: Option<&str>,
) -> Response {
    let Some(session) = state.repo.find_by_id(session_id) else {
        return bad_gateway(BackendError::SessionNotFound(session_id.to_owned()));
    };
    let Some(engine) = session.engine_url().map(str::to_owned) else {
        return bad_gateway(BackendError::NoEngine);
    };

    if let Err(err) = state.chain.before_command(&mut cmd, &session).await {
        return bad_gateway(err);
    }
    let is_quit = cmd.method == Method::DELETE && cmd.path.is_empty();

    let mut url = format!(
        "{}/session/{}{}",
        engine.trim_end_matches('/'),
        session.id,
        cmd.path
    );
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }

    let outcome = async {
        let rs = state
            .http
            .request(cmd.method.clone(), &url)
            .headers(cmd.headers.clone())
            .body(cmd.body.clone())
            .send()
            .await?;
        let status = rs.status();
        let headers = rs.headers().clone();
        let body = rs.bytes().await?;
        Ok::<_, reqwest::Error>(CommandOutcome {
            status,
            headers,
            body: body.to_vec(),
        })
    }
    .await;

    match outcome {
        Ok(outcome) => {
            state.chain.after_command(&cmd, &outcome, &session).await;
            if is_quit {
                state.chain.quit(&session).await;
                tracing::info!(session = %session.id, "session quit");
            }
            forward_response(outcome)
        }
        Err(err) => {
            if is_quit {
                // The engine may be gone already; the session is still over.
                state.chain.quit(&session).await;
                tracing::info!(session = %session.id, "session quit on transport error");
            }
            bad_gateway(err)
        }
    }
}

fn forward_response(outcome: CommandOutcome) -> Response {
    let mut builder = Response::builder().status(outcome.status);
    for (name, value) in outcome.headers.iter() {
        if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name, value);
    }
    match builder.body(Body::from(outcome.body)) {
        Ok(rs) => rs,
        Err(err) => bad_gateway(err),
    }
}

async fn proxy_downloads(
    state: &Arc<AppState>,
    session_id: &str,
    rest: &str,
    query: Option<&str>,
) -> Response {
    let Some(session) = state.repo.find_by_id(session_id) else {
        return bad_gateway(BackendError::SessionNotFound(session_id.to_owned()));
    };
    let Some(status) = session.browser.status.as_ref() else {
        return bad_gateway(BackendError::NoEngine);
    };
    let mut url = format!(
        "http://{}:{}/downloads{}",
        status.host, status.port_config.sidecar, rest
    );
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    let rs = match state.http.get(&url).send().await {
        Ok(rs) => rs,
        Err(err) => return bad_gateway(err),
    };
    let status = rs.status();
    let headers = rs.headers().clone();
    match rs.bytes().await {
        Ok(body) => forward_response(CommandOutcome {
            status,
            headers,
            body: body.to_vec(),
        }),
        Err(err) => bad_gateway(err),
    }
}

async fn bidi_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    relay_to_sidecar(&state, &session_id, "bidi", ws).await
}

async fn cdp_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    relay_to_sidecar(&state, &session_id, "cdp", ws).await
}

async fn relay_to_sidecar(
    state: &Arc<AppState>,
    session_id: &str,
    kind: &str,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(session) = state.repo.find_by_id(session_id) else {
        return bad_gateway(BackendError::SessionNotFound(session_id.to_owned()));
    };
    let Some(status) = session.browser.status.as_ref() else {
        return bad_gateway(BackendError::NoEngine);
    };
    let url = format!(
        "ws://{}:{}/wd/hub/{}/{}",
        status.host, status.port_config.sidecar, kind, session.id
    );
    let id_value = match HeaderValue::from_str(&session.id) {
        Ok(value) => value,
        Err(err) => return bad_gateway(err),
    };
    WsProxy::new(url)
        .dial_header(HeaderName::from_static(HEADER_SESSION_ID), id_value)
        .serve(ws)
        .await
}

/// Manual session creation: plain capabilities in the body, VNC switched on.
async fn create_browser_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut caps: Capabilities = match serde_json::from_slice(&body) {
        Ok(caps) => caps,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    caps.browserkube_opts.manual = true;
    caps.browserkube_opts.enable_vnc = true;
    let rq = NewSessionRq {
        capabilities: caps,
        ..Default::default()
    };
    create_session(&state, rq, headers).await
}

async fn delete_browser_handler(
    State(state): State<Arc<AppState>>,
    Path(rest): Path<String>,
) -> Response {
    let session_id = rest.trim_matches('/');
    if session_id.is_empty() || session_id.contains('/') {
        return (StatusCode::BAD_REQUEST, "session id must be provided").into_response();
    }
    let cmd = Command {
        method: Method::DELETE,
        path: String::new(),
        headers: HeaderMap::new(),
        body: Vec::new(),
    };
    proxy_command(&state, session_id, cmd, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SessionHooks for Recorder {
        async fn before_command(
            &self,
            _cmd: &mut Command,
            _session: &Session,
        ) -> Result<(), BackendError> {
            self.log.lock().unwrap().push(format!("before:{}", self.name));
            Ok(())
        }

        async fn after_command(
            &self,
            _cmd: &Command,
            _outcome: &CommandOutcome,
            _session: &Session,
        ) -> Result<(), BackendError> {
            self.log.lock().unwrap().push(format!("after:{}", self.name));
            Ok(())
        }

        async fn on_quit(&self, _session: &Session) -> Result<(), BackendError> {
            self.log.lock().unwrap().push(format!("quit:{}", self.name));
            Ok(())
        }
    }

    struct FailingBefore;

    #[async_trait]
    impl SessionHooks for FailingBefore {
        async fn before_command(
            &self,
            _cmd: &mut Command,
            _session: &Session,
        ) -> Result<(), BackendError> {
            Err(BackendError::NoEngine)
        }
    }

    fn test_session() -> Session {
        Session::from_browser(Browser::new("sess-1", Default::default()))
    }

    fn command(path: &str) -> Command {
        Command {
            method: Method::POST,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    fn chain_with(log: &Arc<Mutex<Vec<String>>>, weights: &[(&'static str, u8)]) -> HookChain {
        HookChain::new(
            weights
                .iter()
                .map(|(name, weight)| PluginOpts {
                    weight: *weight,
                    hooks: Arc::new(Recorder {
                        name,
                        log: log.clone(),
                    }) as Arc<dyn SessionHooks>,
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_hooks_run_by_descending_weight_with_inverted_post_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        // Registered out of order on purpose.
        let chain = chain_with(&log, &[("five", 5), ("ten", 10), ("one", 1)]);
        let session = test_session();

        let mut cmd = command("/url");
        chain.before_command(&mut cmd, &session).await.unwrap();
        let outcome = CommandOutcome {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        };
        chain.after_command(&cmd, &outcome, &session).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "before:ten",
                "before:five",
                "before:one",
                "after:one",
                "after:five",
                "after:ten"
            ]
        );
    }

    #[tokio::test]
    async fn test_quit_hooks_run_heaviest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain_with(&log, &[("one", 1), ("ten", 10), ("five", 5)]);

        chain.quit(&test_session()).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["quit:ten", "quit:five", "quit:one"]
        );
    }

    #[tokio::test]
    async fn test_equal_weights_keep_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain_with(&log, &[("first", 7), ("second", 7)]);
        let session = test_session();

        let mut cmd = command("/url");
        chain.before_command(&mut cmd, &session).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["before:first", "before:second"]);
    }

    #[tokio::test]
    async fn test_failing_before_hook_aborts_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChain::new(vec![
            PluginOpts {
                weight: 10,
                hooks: Arc::new(FailingBefore),
            },
            PluginOpts {
                weight: 1,
                hooks: Arc::new(Recorder {
                    name: "late",
                    log: log.clone(),
                }),
            },
        ]);
        let session = test_session();

        let mut cmd = command("/url");
        assert!(chain.before_command(&mut cmd, &session).await.is_err());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_path_is_normalized() {
        let chain = HookChain::new(Vec::new());
        let session = test_session();

        let mut cmd = command("/se/file");
        chain.before_command(&mut cmd, &session).await.unwrap();
        assert_eq!(cmd.path, "/file");

        let mut cmd = command("/element/abc/se/file");
        chain.before_command(&mut cmd, &session).await.unwrap();
        assert_eq!(cmd.path, "/element/abc/file");

        let mut cmd = command("/url");
        chain.before_command(&mut cmd, &session).await.unwrap();
        assert_eq!(cmd.path, "/url");
    }

    #[test]
    fn test_cleanup_origin_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static("http://evil"));
        headers.insert(
            HeaderName::from_static("access-control-request-method"),
            HeaderValue::from_static("POST"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        cleanup_origin_headers(&mut headers);

        assert!(headers.get(header::ORIGIN).is_none());
        assert!(headers
            .get(HeaderName::from_static("access-control-request-method"))
            .is_none());
        assert!(headers.get(header::ACCEPT).is_some());
    }

    #[test]
    fn test_trace_annotations_pick_trace_headers_only() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("traceparent"),
            HeaderValue::from_static("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let annotations = trace_annotations(&headers);

        assert_eq!(annotations.len(), 1);
        assert_eq!(
            annotations["traceparent"],
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        );
    }
}
