//! WebDriver wire protocol helpers: session path parsing, the Bad-Gateway
//! error body, the new-session response shape, and a minimal WebDriver
//! client for the handful of commands this system issues itself.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Base path under which the WebDriver protocol is served.
pub const BASE_PATH: &str = "/wd/hub";

/// Request header carrying the externally visible session ID into the
/// sidecar, and onto relayed WebSocket dials.
pub const HEADER_SESSION_ID: &str = "sessionid";

/// Response header with the sidecar's per-session command counter.
pub const HEADER_COMMAND_ID: &str = "commandid";

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("unable to parse session id from url: {0}")]
    BadSessionPath(String),
    #[error("webdriver request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webdriver command returned status {0}")]
    CommandFailed(StatusCode),
    #[error("malformed webdriver response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("malformed screenshot payload: {0}")]
    BadScreenshot(#[from] base64::DecodeError),
}

/// Strips the WebDriver base path.
pub fn remove_base(path: &str) -> &str {
    path.strip_prefix(BASE_PATH).unwrap_or(path)
}

/// Splits `/wd/hub/session/<id>[/command...]` into the session ID and the
/// command remainder. The command is empty for the bare session resource.
pub fn parse_session_path(path: &str) -> Result<(&str, &str), ProtoError> {
    let trimmed = remove_base(path);
    let mut parts = trimmed.splitn(4, '/');
    let (_, kind, session_id) = (parts.next(), parts.next(), parts.next());
    match (kind, session_id) {
        (Some("session"), Some(id)) if !id.is_empty() => {
            Ok((id, parts.next().map_or("", |_| &trimmed[9 + id.len()..])))
        }
        _ => Err(ProtoError::BadSessionPath(path.to_owned())),
    }
}

/// Rebuilds a session path with a different session ID, keeping the command.
pub fn replace_session(path: &str, session_id: &str) -> Result<String, ProtoError> {
    let (_, command) = parse_session_path(path)?;
    Ok(format!("/session/{session_id}{command}"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionRs {
    pub value: NewSessionValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionValue {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorValue {
    pub error: String,
    pub message: String,
}

/// The protocol-level error body: `{"value": {"error": ..., "message": ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRs {
    pub value: ErrorValue,
}

/// Renders any upstream failure as a WebDriver Bad Gateway response.
pub fn bad_gateway(err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, "bad gateway");
    let body = ErrorRs {
        value: ErrorValue {
            error: err.to_string(),
            message: "something went wrong".to_owned(),
        },
    };
    (
        StatusCode::BAD_GATEWAY,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&body).unwrap_or_default(),
    )
        .into_response()
}

/// Minimal WebDriver client for commands issued by the system itself.
pub struct WebDriver {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

#[derive(Deserialize)]
struct ValueRs<T> {
    value: T,
}

impl WebDriver {
    pub fn new(base_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            session_id: session_id.into(),
        }
    }

    fn session_url(&self, suffix: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, suffix)
    }

    /// Deletes the session on the engine.
    pub async fn quit(&self) -> Result<(), ProtoError> {
        let rs = self
            .client
            .delete(self.session_url(""))
            .send()
            .await?;
        if rs.status() != StatusCode::OK {
            return Err(ProtoError::CommandFailed(rs.status()));
        }
        Ok(())
    }

    /// Fetches a PNG screenshot of the current window.
    pub async fn take_screenshot(&self) -> Result<Vec<u8>, ProtoError> {
        let rs = self
            .client
            .get(self.session_url("/screenshot"))
            .send()
            .await?;
        if !rs.status().is_success() {
            return Err(ProtoError::CommandFailed(rs.status()));
        }
        let body: ValueRs<String> = serde_json::from_slice(&rs.bytes().await?)?;
        Ok(base64::engine::general_purpose::STANDARD.decode(body.value)?)
    }

    pub async fn maximize(&self) -> Result<(), ProtoError> {
        let rs = self
            .client
            .post(self.session_url("/window/maximize"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !rs.status().is_success() {
            return Err(ProtoError::CommandFailed(rs.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_path_with_command() {
        let (id, command) = parse_session_path("/wd/hub/session/abc-123/url").unwrap();
        assert_eq!(id, "abc-123");
        assert_eq!(command, "/url");
    }

    #[test]
    fn test_parse_session_path_bare_session() {
        let (id, command) = parse_session_path("/wd/hub/session/abc-123").unwrap();
        assert_eq!(id, "abc-123");
        assert_eq!(command, "");
    }

    #[test]
    fn test_parse_session_path_nested_command() {
        let (id, command) =
            parse_session_path("/wd/hub/session/abc/element/xyz/click").unwrap();
        assert_eq!(id, "abc");
        assert_eq!(command, "/element/xyz/click");
    }

    #[test]
    fn test_parse_session_path_rejects_garbage() {
        assert!(parse_session_path("/wd/hub/status").is_err());
        assert!(parse_session_path("/wd/hub/session/").is_err());
        assert!(parse_session_path("/").is_err());
    }

    #[test]
    fn test_replace_session() {
        let p = replace_session("/wd/hub/session/old-id/url", "new-id").unwrap();
        assert_eq!(p, "/session/new-id/url");
        let p = replace_session("/wd/hub/session/old-id", "new-id").unwrap();
        assert_eq!(p, "/session/new-id");
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorRs {
            value: ErrorValue {
                error: "session not found".into(),
                message: "something went wrong".into(),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["value"]["error"], "session not found");
        assert_eq!(json["value"]["message"], "something went wrong");
    }
}
