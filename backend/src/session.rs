//! The live session directory.
//!
//! A session is the read-model of a Browser custom resource: the CR name is
//! the session ID and the coarse state is derived from the resource phase
//! plus its deletion timestamp.

use async_trait::async_trait;
use kube::ResourceExt;
use serde::Serialize;
use tokio::sync::mpsc;

use browserkube_common::caps::Capabilities;
use browserkube_common::crd::{Browser, Phase};

pub const STATE_PENDING: &str = "pending";
pub const STATE_RUNNING: &str = "running";
pub const STATE_TERMINATING: &str = "terminating";
pub const STATE_TERMINATED: &str = "terminated";

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub state: &'static str,
    #[serde(skip)]
    pub browser: Browser,
    pub caps: Capabilities,
}

impl Session {
    pub fn from_browser(browser: Browser) -> Self {
        let id = browser.name_any();
        let caps = decode_caps(&browser);
        let state = derive_state(&browser);
        Self {
            id,
            state,
            browser,
            caps,
        }
    }

    /// Base URL of the engine behind the session's sidecar.
    pub fn engine_url(&self) -> Option<&str> {
        self.browser
            .status
            .as_ref()
            .map(|s| s.selenium_url.as_str())
            .filter(|u| !u.is_empty())
    }
}

fn decode_caps(browser: &Browser) -> Capabilities {
    if browser.spec.caps.is_empty() {
        return Capabilities::default();
    }
    match serde_json::from_str(&browser.spec.caps) {
        Ok(caps) => caps,
        Err(err) => {
            tracing::warn!(
                browser = %browser.name_any(),
                error = %err,
                "unable to decode capability snapshot"
            );
            Capabilities::default()
        }
    }
}

fn derive_state(browser: &Browser) -> &'static str {
    if browser.metadata.deletion_timestamp.is_some() {
        return STATE_TERMINATING;
    }
    match browser.status.as_ref().map(|s| s.phase) {
        Some(Phase::Running) => STATE_RUNNING,
        Some(Phase::Terminated) | Some(Phase::Failed) => STATE_TERMINATED,
        _ => STATE_PENDING,
    }
}

/// Read access to the set of visible sessions plus a change feed.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    fn find_all(&self) -> Vec<Session>;
    fn find_by_id(&self, id: &str) -> Option<Session>;
    /// Session quota as (used, hard). Both zero when no quota is configured.
    fn quota(&self) -> (i64, i64);
    /// Subscribes to session change events. Dropping the receiver
    /// deregisters the subscriber.
    async fn watch(&self) -> mpsc::Receiver<Session>;
}
