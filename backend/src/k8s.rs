//! Kubernetes wiring for the session directory and the browser provisioner.
//!
//! The directory mirrors visibility-labelled Browser resources through a
//! reflector store and fans change events out to subscribers. The
//! provisioner creates Browser resources and waits for the reconciler to
//! bring them up.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use k8s_openapi::api::core::v1::{Pod, ResourceQuota};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{DeleteParams, LogParams, PostParams};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{reflector, watcher};
use kube::{Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use browserkube_common::broadcast::Broadcaster;
use browserkube_common::caps::Capabilities;
use browserkube_common::crd::{
    reason, Browser, BrowserSpec, Phase, SessionResult, LABEL_APP, LABEL_BROWSER_VISIBILITY,
    LABEL_COMPONENT, LABEL_SESSION_ID, LABEL_VALUE_APP, LABEL_VALUE_COMPONENT_BROWSER,
    TYPE_WEBDRIVER,
};

use crate::error::BackendError;
use crate::session::{Session, SessionRepository, STATE_TERMINATED};

/// Synthetic quota resource counting Browser objects.
pub const QUOTA_RESOURCE: &str = "count/browsers.browserkube.io";

const POD_SHUTDOWN_GRACE_SECS: u32 = 30;
const BROWSER_CONTAINER: &str = "browser";

/// Name of the ResourceQuota object holding the session quota.
pub fn quota_object_name(namespace: &str) -> String {
    format!("{namespace}-sessions")
}

/// Session directory backed by a reflector over visible Browser resources.
pub struct K8sSessionRepository {
    store: Store<Browser>,
    quota: Arc<RwLock<(i64, i64)>>,
    broadcaster: Broadcaster<Session>,
    namespace: String,
}

impl K8sSessionRepository {
    /// Spawns the browser and quota watch loops. They run until the token
    /// is cancelled.
    pub fn start(client: Client, namespace: &str, cancel: CancellationToken) -> Arc<Self> {
        let browsers: Api<Browser> = Api::namespaced(client.clone(), namespace);
        let quotas: Api<ResourceQuota> = Api::namespaced(client, namespace);

        let (reader, writer) = reflector::store();
        let broadcaster: Broadcaster<Session> = Broadcaster::new(cancel.clone());
        let quota = Arc::new(RwLock::new((0i64, 0i64)));

        let repo = Arc::new(Self {
            store: reader,
            quota: quota.clone(),
            broadcaster: broadcaster.clone(),
            namespace: namespace.to_owned(),
        });

        let browser_cfg = watcher::Config::default()
            .labels(&format!("{LABEL_BROWSER_VISIBILITY}=true"));
        let stream = reflector(writer, watcher(browsers, browser_cfg));
        let browser_cancel = cancel.clone();
        tokio::spawn(async move {
            futures_util::pin_mut!(stream);
            loop {
                let ev = tokio::select! {
                    _ = browser_cancel.cancelled() => break,
                    ev = stream.try_next() => ev,
                };
                match ev {
                    Ok(Some(watcher::Event::Apply(b)))
                    | Ok(Some(watcher::Event::InitApply(b))) => {
                        broadcaster.submit(Session::from_browser(b)).await;
                    }
                    Ok(Some(watcher::Event::Delete(b))) => {
                        let mut session = Session::from_browser(b);
                        session.state = STATE_TERMINATED;
                        broadcaster.submit(session).await;
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "browser watch hiccup, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let quota_cfg =
            watcher::Config::default().labels(&format!("{LABEL_APP}={LABEL_VALUE_APP}"));
        let quota_name = quota_object_name(namespace);
        tokio::spawn(async move {
            let stream = watcher(quotas, quota_cfg);
            futures_util::pin_mut!(stream);
            loop {
                let ev = tokio::select! {
                    _ = cancel.cancelled() => break,
                    ev = stream.try_next() => ev,
                };
                match ev {
                    Ok(Some(watcher::Event::Apply(q)))
                    | Ok(Some(watcher::Event::InitApply(q)))
                        if q.name_any() == quota_name =>
                    {
                        let parsed = parse_quota(&q);
                        if let Ok(mut slot) = quota.write() {
                            *slot = parsed;
                        }
                    }
                    Ok(Some(watcher::Event::Delete(q))) if q.name_any() == quota_name => {
                        if let Ok(mut slot) = quota.write() {
                            *slot = (0, 0);
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "quota watch hiccup, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        repo
    }
}

#[async_trait]
impl SessionRepository for K8sSessionRepository {
    fn find_all(&self) -> Vec<Session> {
        self.store
            .state()
            .iter()
            .map(|b| Session::from_browser((**b).clone()))
            .collect()
    }

    fn find_by_id(&self, id: &str) -> Option<Session> {
        let key = ObjectRef::new(id).within(&self.namespace);
        self.store
            .get(&key)
            .map(|b| Session::from_browser((*b).clone()))
    }

    fn quota(&self) -> (i64, i64) {
        self.quota.read().map(|q| *q).unwrap_or((0, 0))
    }

    async fn watch(&self) -> mpsc::Receiver<Session> {
        self.broadcaster.subscribe().await
    }
}

/// Reads (used, hard) for the session count from a quota object. Missing or
/// malformed quantities count as zero.
fn parse_quota(quota: &ResourceQuota) -> (i64, i64) {
    let status = quota.status.as_ref();
    let used = quantity_to_i64(
        status
            .and_then(|s| s.used.as_ref())
            .and_then(|m| m.get(QUOTA_RESOURCE)),
    );
    let hard = quantity_to_i64(
        status
            .and_then(|s| s.hard.as_ref())
            .and_then(|m| m.get(QUOTA_RESOURCE))
            .or_else(|| {
                quota
                    .spec
                    .as_ref()
                    .and_then(|s| s.hard.as_ref())
                    .and_then(|m| m.get(QUOTA_RESOURCE))
            }),
    );
    (used, hard)
}

fn quantity_to_i64(q: Option<&Quantity>) -> i64 {
    match q {
        Some(q) => q.0.parse().unwrap_or_else(|_| {
            tracing::warn!(quantity = %q.0, "unparseable quota quantity");
            0
        }),
        None => 0,
    }
}

/// Creates browser sessions in the cluster and tears them down again.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Creates a Browser resource and waits for it to reach phase Running.
    /// `annotations` are stamped on the resource as-is.
    async fn provision(
        &self,
        id: &str,
        caps: &Capabilities,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Browser, BackendError>;
    /// Deletes the Browser resource behind a session.
    async fn delete(&self, name: &str) -> Result<(), BackendError>;
    /// Fetches the browser container's logs from a session pod.
    async fn logs(&self, pod_name: &str) -> Result<String, BackendError>;
}

pub struct K8sProvisioner {
    api: Api<Browser>,
    pods: Api<Pod>,
    timeout: Duration,
}

impl K8sProvisioner {
    pub fn new(client: Client, namespace: &str, timeout: Duration) -> Self {
        Self {
            api: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            timeout,
        }
    }

    async fn wait_running(&self, id: &str) -> Result<Browser, BackendError> {
        let cfg = watcher::Config::default().fields(&format!("metadata.name={id}"));
        let stream = watcher(self.api.clone(), cfg);
        futures_util::pin_mut!(stream);
        let wait = async {
            loop {
                match stream.try_next().await {
                    Ok(Some(watcher::Event::Apply(b)))
                    | Ok(Some(watcher::Event::InitApply(b))) => {
                        let Some(status) = &b.status else { continue };
                        match status.phase {
                            Phase::Running => return Ok(b),
                            Phase::Failed => {
                                let why = if status.reason.is_empty() {
                                    reason::UNKNOWN.to_owned()
                                } else {
                                    status.reason.clone()
                                };
                                return Err(BackendError::Creation(why));
                            }
                            Phase::Terminated => {
                                return Err(BackendError::Deleted(id.to_owned()))
                            }
                            Phase::Pending => {}
                        }
                    }
                    Ok(Some(watcher::Event::Delete(_))) => {
                        return Err(BackendError::Deleted(id.to_owned()))
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => return Err(BackendError::Watch("browser watch ended".into())),
                    Err(err) => return Err(BackendError::Watch(err.to_string())),
                }
            }
        };
        match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::ProvisionTimeout(id.to_owned())),
        }
    }
}

#[async_trait]
impl Provisioner for K8sProvisioner {
    async fn provision(
        &self,
        id: &str,
        caps: &Capabilities,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Browser, BackendError> {
        let mut browser = browser_from_caps(id, caps)?;
        if !annotations.is_empty() {
            browser.metadata.annotations = Some(annotations.clone());
        }
        self.api.create(&PostParams::default(), &browser).await?;

        match self.wait_running(id).await {
            Ok(browser) => Ok(browser),
            Err(err) => {
                // Do not leave a half-created browser behind.
                if let Err(derr) = self.delete(id).await {
                    tracing::error!(browser = id, error = %derr, "cleanup delete failed");
                }
                Err(err)
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        let params = DeleteParams {
            grace_period_seconds: Some(POD_SHUTDOWN_GRACE_SECS),
            ..Default::default()
        };
        match self.api.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn logs(&self, pod_name: &str) -> Result<String, BackendError> {
        let params = LogParams {
            container: Some(BROWSER_CONTAINER.to_owned()),
            ..Default::default()
        };
        Ok(self.pods.logs(pod_name, &params).await?)
    }
}

/// Builds the Browser resource for a new session from its capabilities.
pub fn browser_from_caps(id: &str, caps: &Capabilities) -> Result<Browser, BackendError> {
    let opts = &caps.browserkube_opts;
    let session_type = if opts.session_type.is_empty() {
        TYPE_WEBDRIVER.to_owned()
    } else {
        opts.session_type.clone()
    };
    let mut browser = Browser::new(
        id,
        BrowserSpec {
            platform: caps.platform.clone(),
            browser_name: caps.browser_name.clone(),
            browser_version: caps.browser_version.clone(),
            session_type,
            timezone: caps.timezone.clone(),
            enable_vnc: opts.enable_vnc,
            enable_video: opts.enable_video,
            screen_resolution: opts.screen_resolution.clone(),
            extensions: opts.extensions.clone(),
            caps: serde_json::to_string(caps)?,
        },
    );
    browser.metadata.labels = Some(session_labels(id));
    Ok(browser)
}

fn session_labels(id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_BROWSER_VISIBILITY.to_owned(), "true".to_owned()),
        (LABEL_APP.to_owned(), LABEL_VALUE_APP.to_owned()),
        (
            LABEL_COMPONENT.to_owned(),
            LABEL_VALUE_COMPONENT_BROWSER.to_owned(),
        ),
        (LABEL_SESSION_ID.to_owned(), id.to_owned()),
    ])
}

/// Write access to finished-session records.
#[async_trait]
pub trait ResultsRepository: Send + Sync {
    async fn create(&self, result: SessionResult) -> Result<(), BackendError>;
}

pub struct K8sResultsRepository {
    api: Api<SessionResult>,
}

impl K8sResultsRepository {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ResultsRepository for K8sResultsRepository {
    async fn create(&self, result: SessionResult) -> Result<(), BackendError> {
        match self.api.create(&PostParams::default(), &result).await {
            Ok(_) => Ok(()),
            // The record is immutable; a duplicate create is not an error.
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ResourceQuotaSpec, ResourceQuotaStatus};

    fn quota_with(used: Option<&str>, hard: Option<&str>) -> ResourceQuota {
        let entry = |v: Option<&str>| {
            v.map(|v| BTreeMap::from([(QUOTA_RESOURCE.to_owned(), Quantity(v.to_owned()))]))
        };
        ResourceQuota {
            spec: Some(ResourceQuotaSpec {
                hard: entry(hard),
                ..Default::default()
            }),
            status: Some(ResourceQuotaStatus {
                used: entry(used),
                hard: entry(hard),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_quota_reads_used_and_hard() {
        assert_eq!(parse_quota(&quota_with(Some("3"), Some("10"))), (3, 10));
    }

    #[test]
    fn test_parse_quota_missing_resource_is_zero() {
        assert_eq!(parse_quota(&quota_with(None, None)), (0, 0));
        assert_eq!(parse_quota(&ResourceQuota::default()), (0, 0));
    }

    #[test]
    fn test_parse_quota_malformed_quantity_is_zero() {
        assert_eq!(parse_quota(&quota_with(Some("many"), Some("10"))), (0, 10));
    }

    #[test]
    fn test_browser_from_caps_snapshot_and_labels() {
        let caps: Capabilities = serde_json::from_value(serde_json::json!({
            "browserName": "firefox",
            "browserVersion": "127.0",
            "browserkube:options": {"enableVNC": true}
        }))
        .unwrap();
        let browser = browser_from_caps("sess-1", &caps).unwrap();

        assert_eq!(browser.spec.browser_name, "firefox");
        assert_eq!(browser.spec.session_type, TYPE_WEBDRIVER);
        assert!(browser.spec.enable_vnc);

        let labels = browser.metadata.labels.unwrap();
        assert_eq!(labels[LABEL_BROWSER_VISIBILITY], "true");
        assert_eq!(labels[LABEL_SESSION_ID], "sess-1");

        let snapshot: Capabilities = serde_json::from_str(&browser.spec.caps).unwrap();
        assert_eq!(snapshot, caps);
    }

    #[test]
    fn test_quota_object_name() {
        assert_eq!(quota_object_name("browserkube"), "browserkube-sessions");
    }
}
