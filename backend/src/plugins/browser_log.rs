//! Browser log plugin: captures the browser container's log when a session
//! quits and stores it next to the other session artifacts.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::k8s::Provisioner;
use crate::proxy::{PluginOpts, SessionHooks};
use crate::session::Session;
use crate::storage::{BlobFile, SessionStorage, BROWSER_LOG_FILE_NAME};

pub struct BrowserLogPlugin {
    provisioner: Arc<dyn Provisioner>,
    storage: Arc<dyn SessionStorage>,
}

impl BrowserLogPlugin {
    pub fn opts(provisioner: Arc<dyn Provisioner>, storage: Arc<dyn SessionStorage>) -> PluginOpts {
        PluginOpts {
            weight: 250,
            hooks: Arc::new(Self {
                provisioner,
                storage,
            }),
        }
    }
}

#[async_trait]
impl SessionHooks for BrowserLogPlugin {
    async fn on_quit(&self, session: &Session) -> Result<(), BackendError> {
        let pod_name = session
            .browser
            .status
            .as_ref()
            .map(|s| s.pod_name.clone())
            .unwrap_or_default();
        if pod_name.is_empty() {
            tracing::debug!(session = %session.id, "no pod behind session, skipping log capture");
            return Ok(());
        }

        let logs = self.provisioner.logs(&pod_name).await?;
        if logs.is_empty() {
            return Ok(());
        }

        self.storage
            .save_file(
                &session.id,
                "",
                BlobFile {
                    file_name: BROWSER_LOG_FILE_NAME.to_owned(),
                    content_type: "text/plain".into(),
                    content: logs.into_bytes(),
                },
            )
            .await?;
        tracing::info!(session = %session.id, pod = %pod_name, "browser log saved");
        Ok(())
    }
}
