//! Browser provisioning plugin.
//!
//! Before a session is created it provisions a Browser resource and points
//! the outbound request at the engine URL the reconciler published. On quit
//! it deletes the resource in the background so the response is not held up
//! by the teardown.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::k8s::Provisioner;
use crate::proxy::{PluginOpts, SessionCreation, SessionHooks};
use crate::session::Session;

pub struct ProvisionPlugin {
    provisioner: Arc<dyn Provisioner>,
}

impl ProvisionPlugin {
    pub fn opts(provisioner: Arc<dyn Provisioner>) -> PluginOpts {
        PluginOpts {
            weight: 1,
            hooks: Arc::new(Self { provisioner }),
        }
    }
}

#[async_trait]
impl SessionHooks for ProvisionPlugin {
    async fn before_session(&self, ctx: &mut SessionCreation) -> Result<(), BackendError> {
        let browser = self
            .provisioner
            .provision(&ctx.id, &ctx.caps, &ctx.annotations)
            .await?;
        let engine_url = browser
            .status
            .as_ref()
            .map(|s| s.selenium_url.clone())
            .filter(|u| !u.is_empty())
            .ok_or(BackendError::NoEngine)?;
        tracing::debug!(session = %ctx.id, engine = %engine_url, "browser provisioned");
        ctx.engine_url = engine_url;
        ctx.browser = Some(browser);
        Ok(())
    }

    async fn on_quit(&self, session: &Session) -> Result<(), BackendError> {
        let provisioner = self.provisioner.clone();
        let name = session.id.clone();
        tokio::spawn(async move {
            if let Err(err) = provisioner.delete(&name).await {
                tracing::error!(browser = %name, error = %err, "unable to delete browser");
            }
        });
        Ok(())
    }
}
