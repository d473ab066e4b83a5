//! Session result plugin: leaves an immutable SessionResult record behind
//! when a session quits, referencing whatever artifacts ended up in storage.

use std::sync::Arc;

use async_trait::async_trait;

use browserkube_common::crd::{SessionResult, SessionResultFiles, SessionResultSpec};

use crate::error::BackendError;
use crate::k8s::ResultsRepository;
use crate::proxy::{PluginOpts, SessionHooks};
use crate::session::Session;
use crate::storage::{SessionStorage, BROWSER_LOG_FILE_NAME, VIDEO_FILE_NAME};

pub struct SessionResultPlugin {
    results: Arc<dyn ResultsRepository>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionResultPlugin {
    pub fn opts(
        results: Arc<dyn ResultsRepository>,
        storage: Arc<dyn SessionStorage>,
    ) -> PluginOpts {
        PluginOpts {
            weight: 1,
            hooks: Arc::new(Self { results, storage }),
        }
    }

    async fn file_exists(&self, session_id: &str, name: &str) -> bool {
        self.storage
            .exists(session_id, name)
            .await
            .unwrap_or(false)
    }
}

#[async_trait]
impl SessionHooks for SessionResultPlugin {
    async fn on_quit(&self, session: &Session) -> Result<(), BackendError> {
        let browser = &session.browser;

        let mut files = SessionResultFiles::default();
        if browser.spec.enable_video && self.file_exists(&session.id, VIDEO_FILE_NAME).await {
            files.video = format!("{}/{}", session.id, VIDEO_FILE_NAME);
        }
        if self.file_exists(&session.id, BROWSER_LOG_FILE_NAME).await {
            files.browser_log = format!("{}/{}", session.id, BROWSER_LOG_FILE_NAME);
        }

        let image = browser
            .status
            .as_ref()
            .map(|s| s.image.clone())
            .unwrap_or_default();
        let mut result = SessionResult::new(
            &session.id,
            SessionResultSpec {
                started_at: browser.metadata.creation_timestamp.as_ref().map(|t| t.0),
                finished_at: browser
                    .metadata
                    .deletion_timestamp
                    .as_ref()
                    .map(|t| t.0)
                    .or_else(|| Some(chrono::Utc::now())),
                browser: browser.spec.clone(),
                browser_image: image,
                files,
            },
        );
        result.metadata.labels = browser.metadata.labels.clone();
        result.metadata.annotations = browser.metadata.annotations.clone();

        self.results.create(result).await?;
        tracing::info!(session = %session.id, "session result saved");
        Ok(())
    }
}
