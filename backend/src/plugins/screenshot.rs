//! Screenshot capture plugin.
//!
//! Two capture paths: screenshots the client requested itself are copied out
//! of the response, and any 404 answer (usually "no such element") triggers
//! a fresh screenshot from the engine so the failure is documented.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use base64::Engine;
use serde::Deserialize;

use browserkube_common::wdproto::WebDriver;

use crate::error::BackendError;
use crate::proxy::{Command, CommandOutcome, PluginOpts, SessionHooks};
use crate::session::Session;
use crate::storage::{BlobFile, SessionStorage, SCREENSHOTS_DIR};

pub struct ScreenshotPlugin {
    storage: Arc<dyn SessionStorage>,
}

impl ScreenshotPlugin {
    pub fn opts(storage: Arc<dyn SessionStorage>) -> PluginOpts {
        PluginOpts {
            weight: 250,
            hooks: Arc::new(Self { storage }),
        }
    }

    async fn save_png(&self, session_id: &str, png: Vec<u8>) -> Result<(), BackendError> {
        let file_name = format!(
            "{}-auto-screenshot.png",
            chrono::Utc::now().format("%Y-%m-%d-%H-%M-%S")
        );
        self.storage
            .save_file(
                session_id,
                SCREENSHOTS_DIR,
                BlobFile {
                    file_name: file_name.clone(),
                    content_type: "image/png".into(),
                    content: png,
                },
            )
            .await?;
        tracing::info!(session = %session_id, file = %file_name, "screenshot saved");
        Ok(())
    }
}

#[derive(Deserialize)]
struct ScreenshotRs {
    value: String,
}

#[async_trait]
impl SessionHooks for ScreenshotPlugin {
    async fn after_command(
        &self,
        cmd: &Command,
        outcome: &CommandOutcome,
        session: &Session,
    ) -> Result<(), BackendError> {
        if cmd.path == "/screenshot" && outcome.status == StatusCode::OK {
            let rs: ScreenshotRs = serde_json::from_slice(&outcome.body)?;
            let png = base64::engine::general_purpose::STANDARD
                .decode(rs.value)
                .map_err(browserkube_common::wdproto::ProtoError::from)?;
            return self.save_png(&session.id, png).await;
        }

        if outcome.status == StatusCode::NOT_FOUND {
            let Some(engine) = session.engine_url() else {
                return Ok(());
            };
            let png = WebDriver::new(engine, &session.id).take_screenshot().await?;
            return self.save_png(&session.id, png).await;
        }

        Ok(())
    }
}
