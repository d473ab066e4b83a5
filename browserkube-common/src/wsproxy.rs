//! Reverse proxy for WebSocket connections.
//!
//! The proxy dials the backend first, then upgrades the client connection and
//! runs two independent copy loops. Text frames can be inspected and rewritten
//! by per-direction middleware; a middleware may also veto a frame entirely.

use std::sync::Arc;

use axum::extract::ws::{Message as ClientMessage, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as BackendMessage;

/// Structured form of the JSON frames exchanged over BiDi/CDP/Playwright
/// connections. Unknown fields ride along in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Middleware decision for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    /// Drop the frame without forwarding it.
    Drop,
}

pub type OnMessage = Arc<dyn Fn(&mut WsMessage) -> Verdict + Send + Sync>;

/// WebSocket reverse proxy for a single upgrade request.
pub struct WsProxy {
    backend_url: String,
    dial_headers: Vec<(HeaderName, HeaderValue)>,
    on_incoming: Vec<OnMessage>,
    on_outgoing: Vec<OnMessage>,
    on_done: Option<futures_util::future::BoxFuture<'static, ()>>,
}

impl WsProxy {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            dial_headers: Vec::new(),
            on_incoming: Vec::new(),
            on_outgoing: Vec::new(),
            on_done: None,
        }
    }

    /// Adds a header to the backend dial request.
    pub fn dial_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.dial_headers.push((name, value));
        self
    }

    /// Middleware applied to frames travelling client -> backend.
    pub fn on_incoming(mut self, f: OnMessage) -> Self {
        self.on_incoming.push(f);
        self
    }

    /// Middleware applied to frames travelling backend -> client.
    pub fn on_outgoing(mut self, f: OnMessage) -> Self {
        self.on_outgoing.push(f);
        self
    }

    /// Future awaited once the relay has ended, after both copy loops are
    /// done. Used for per-connection teardown.
    pub fn on_done(mut self, fut: impl std::future::Future<Output = ()> + Send + 'static) -> Self {
        self.on_done = Some(Box::pin(fut));
        self
    }

    /// Dials the backend and upgrades the client connection.
    pub async fn serve(self, ws: WebSocketUpgrade) -> Response {
        let mut request = match self.backend_url.as_str().into_client_request() {
            Ok(rq) => rq,
            Err(err) => {
                tracing::error!(error = %err, url = %self.backend_url, "invalid backend url");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };
        for (name, value) in &self.dial_headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        let (backend, _) = match tokio_tungstenite::connect_async(request).await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!(error = %err, url = %self.backend_url, "backend dial failed");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        };

        let (incoming, outgoing) = (self.on_incoming, self.on_outgoing);
        let on_done = self.on_done;
        ws.on_upgrade(move |client| async move {
            relay(client, backend, incoming, outgoing).await;
            if let Some(done) = on_done {
                done.await;
            }
        })
    }
}

type BackendSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn relay(
    client: WebSocket,
    backend: BackendSocket,
    on_incoming: Vec<OnMessage>,
    on_outgoing: Vec<OnMessage>,
) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let client_to_backend = tokio::spawn(async move {
        while let Some(Ok(msg)) = client_rx.next().await {
            let forward = match msg {
                ClientMessage::Text(text) => match apply_middleware(&on_incoming, text) {
                    Some(text) => BackendMessage::Text(text),
                    None => continue,
                },
                ClientMessage::Binary(data) => BackendMessage::Binary(data),
                ClientMessage::Ping(data) => BackendMessage::Ping(data),
                ClientMessage::Pong(data) => BackendMessage::Pong(data),
                ClientMessage::Close(_) => break,
            };
            if backend_tx.send(forward).await.is_err() {
                break;
            }
        }
        let _ = backend_tx.send(BackendMessage::Close(None)).await;
    });

    let backend_to_client = tokio::spawn(async move {
        while let Some(Ok(msg)) = backend_rx.next().await {
            let forward = match msg {
                BackendMessage::Text(text) => match apply_middleware(&on_outgoing, text) {
                    Some(text) => ClientMessage::Text(text),
                    None => continue,
                },
                BackendMessage::Binary(data) => ClientMessage::Binary(data),
                BackendMessage::Ping(data) => ClientMessage::Ping(data),
                BackendMessage::Pong(data) => ClientMessage::Pong(data),
                BackendMessage::Close(_) => break,
                BackendMessage::Frame(_) => continue,
            };
            if client_tx.send(forward).await.is_err() {
                break;
            }
        }
        let _ = client_tx.send(ClientMessage::Close(None)).await;
    });

    // Whichever direction ends first, the close frame it sends tears the
    // other one down as well.
    let _ = tokio::join!(client_to_backend, backend_to_client);
}

/// Runs a text frame through the middleware stack. A frame that does not
/// parse as a protocol message is forwarded untouched.
fn apply_middleware(middleware: &[OnMessage], text: String) -> Option<String> {
    if middleware.is_empty() {
        return Some(text);
    }
    let mut msg: WsMessage = match serde_json::from_str(&text) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::debug!(error = %err, "non-protocol ws frame, passing through");
            return Some(text);
        }
    };
    for mw in middleware {
        if mw(&mut msg) == Verdict::Drop {
            return None;
        }
    }
    match serde_json::to_string(&msg) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::error!(error = %err, "unable to re-encode ws frame");
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middleware_can_rewrite() {
        let mw: OnMessage = Arc::new(|msg: &mut WsMessage| {
            msg.method = Some("rewritten".into());
            Verdict::Forward
        });
        let out = apply_middleware(
            &[mw],
            r#"{"id":1,"method":"Page.navigate","params":{"url":"x"}}"#.into(),
        )
        .unwrap();
        let parsed: WsMessage = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed.method.as_deref(), Some("rewritten"));
        assert_eq!(parsed.id, Some(serde_json::json!(1)));
    }

    #[test]
    fn test_middleware_can_drop() {
        let mw: OnMessage = Arc::new(|_: &mut WsMessage| Verdict::Drop);
        assert!(apply_middleware(&[mw], r#"{"id":1}"#.into()).is_none());
    }

    #[test]
    fn test_non_json_frames_pass_through() {
        let mw: OnMessage = Arc::new(|_: &mut WsMessage| Verdict::Drop);
        let out = apply_middleware(&[mw], "not json".into());
        assert_eq!(out.as_deref(), Some("not json"));
    }

    #[test]
    fn test_unknown_fields_survive_rewrite() {
        let mw: OnMessage = Arc::new(|_: &mut WsMessage| Verdict::Forward);
        let out = apply_middleware(
            &[mw],
            r#"{"guid":"browser@1","vendor:tag":{"a":1}}"#.into(),
        )
        .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["vendor:tag"]["a"], 1);
        assert_eq!(parsed["guid"], "browser@1");
    }
}
