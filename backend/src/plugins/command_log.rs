//! Command log plugin: records one JSON document per proxied command, keyed
//! by the `commandID` counter the sidecar stamps on every response.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use browserkube_common::wdproto::HEADER_COMMAND_ID;

use crate::error::BackendError;
use crate::proxy::{Command, CommandOutcome, PluginOpts, SessionHooks};
use crate::session::Session;
use crate::storage::{BlobFile, SessionStorage, COMMANDS_DIR};

pub struct CommandLogPlugin {
    storage: Arc<dyn SessionStorage>,
}

impl CommandLogPlugin {
    pub fn opts(storage: Arc<dyn SessionStorage>) -> PluginOpts {
        PluginOpts {
            weight: 200,
            hooks: Arc::new(Self { storage }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandLog<'a> {
    session_id: &'a str,
    command_id: &'a str,
    method: String,
    command: &'a str,
    timestamp: chrono::DateTime<chrono::Utc>,
    status_code: u16,
}

#[async_trait]
impl SessionHooks for CommandLogPlugin {
    async fn after_command(
        &self,
        cmd: &Command,
        outcome: &CommandOutcome,
        session: &Session,
    ) -> Result<(), BackendError> {
        let command_id = outcome
            .headers
            .get(HEADER_COMMAND_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("0");

        let entry = CommandLog {
            session_id: &session.id,
            command_id,
            method: cmd.method.to_string(),
            command: &cmd.path,
            timestamp: chrono::Utc::now(),
            status_code: outcome.status.as_u16(),
        };
        let content = serde_json::to_vec(&entry)?;

        self.storage
            .save_file(
                &session.id,
                COMMANDS_DIR,
                BlobFile {
                    file_name: format!("{command_id:0>3}.json"),
                    content_type: "application/json".into(),
                    content,
                },
            )
            .await?;
        Ok(())
    }
}
