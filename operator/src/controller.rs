//! The Browser reconcile loop.
//!
//! Level-triggered: every step re-reads the world and converges it one move
//! towards the desired state, so replayed or duplicate events are harmless.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, warn};

use browserkube_common::crd::{Browser, BrowserSet, BrowserStatus, Phase};

use crate::config::{resolve_browser_config, ConfigError, ControllerOpts, ResolvedBrowser};
use crate::pod::{self, new_pod_builder, CONTAINER_SIDECAR};
use crate::OperatorError;

const FINALIZER: &str = "browsers.browserkube.io/finalizer";

/// A Browser stuck in Pending longer than this is removed.
const PENDING_DEADLINE: Duration = Duration::from_secs(5 * 60);
/// Grace period for browser pod shutdown.
const POD_SHUTDOWN_GRACE_SECS: u32 = 30;

pub struct Context {
    pub client: Client,
    pub opts: ControllerOpts,
}

/// Runs the controller until the watch streams end.
pub async fn run(client: Client, opts: ControllerOpts) {
    let browsers: Api<Browser> = Api::namespaced(client.clone(), &opts.namespace);
    let pods: Api<Pod> = Api::namespaced(client.clone(), &opts.namespace);
    let ctx = Arc::new(Context { client, opts });

    Controller::new(browsers, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => info!(browser = %obj.name, "reconciled"),
                Err(err) => warn!(error = %err, "reconcile failed"),
            }
        })
        .await;
}

async fn reconcile(browser: Arc<Browser>, ctx: Arc<Context>) -> Result<Action, OperatorError> {
    let ns = browser.namespace().ok_or(OperatorError::MissingNamespace)?;
    let browsers: Api<Browser> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer(&browsers, FINALIZER, browser, |event| async {
        match event {
            Finalizer::Apply(browser) => apply(browser, &ctx).await,
            Finalizer::Cleanup(browser) => cleanup(browser, &ctx).await,
        }
    })
    .await
    .map_err(|err| OperatorError::Finalizer(Box::new(err)))
}

fn error_policy(_browser: Arc<Browser>, err: &OperatorError, _ctx: Arc<Context>) -> Action {
    warn!(error = %err, "requeueing after error");
    Action::requeue(Duration::from_secs(5))
}

async fn apply(browser: Arc<Browser>, ctx: &Context) -> Result<Action, OperatorError> {
    let ns = browser.namespace().ok_or(OperatorError::MissingNamespace)?;
    let name = browser.name_any();
    let browsers: Api<Browser> = Api::namespaced(ctx.client.clone(), &ns);
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ns);

    let Some(pod) = pods.get_opt(&pod::pod_name(&name)).await? else {
        info!(browser = %name, "creating pod for browser");
        return match create_browser(&browser, &browsers, &pods, ctx).await {
            Ok(()) => Ok(Action::requeue(Duration::from_secs(1))),
            Err(OperatorError::Config(cfg_err)) => {
                let status = BrowserStatus {
                    phase: Phase::Failed,
                    reason: cfg_err.reason().to_owned(),
                    message: cfg_err.to_string(),
                    ..browser.status.clone().unwrap_or_default()
                };
                patch_status(&browsers, &name, &status).await?;
                // typed config failures are terminal, retrying cannot fix them
                Ok(Action::await_change())
            }
            Err(err) => Err(err),
        };
    };

    let phase = browser
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or_default();

    if phase == Phase::Pending {
        return check_pending(&browser, &pod, &browsers).await;
    }
    if phase == Phase::Terminated {
        return check_terminated(&pod, &pods).await;
    }
    check_sidecar_running(&browser, &pod, &browsers).await
}

/// Pre-delete hook: force the phase to Terminated so watchers observe the
/// final state before the resource disappears.
async fn cleanup(browser: Arc<Browser>, ctx: &Context) -> Result<Action, OperatorError> {
    let ns = browser.namespace().ok_or(OperatorError::MissingNamespace)?;
    let browsers: Api<Browser> = Api::namespaced(ctx.client.clone(), &ns);

    let phase = browser
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or_default();
    if phase != Phase::Terminated {
        let status = BrowserStatus {
            phase: Phase::Terminated,
            ..browser.status.clone().unwrap_or_default()
        };
        patch_status(&browsers, &browser.name_any(), &status).await?;
    }
    Ok(Action::await_change())
}

async fn create_browser(
    browser: &Browser,
    browsers: &Api<Browser>,
    pods: &Api<Pod>,
    ctx: &Context,
) -> Result<(), OperatorError> {
    let ns = browser.namespace().ok_or(OperatorError::MissingNamespace)?;
    let name = browser.name_any();

    let resolved = find_browser_config(browser, ctx, &ns).await?;

    // persist the defaulted version on the resource
    if browser.spec.browser_version != resolved.version {
        let patch = serde_json::json!({"spec": {"browserVersion": resolved.version}});
        browsers
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }

    info!(image = %resolved.config.image, "starting browser pod");

    let readiness_probe = match readiness_probe(browser, &resolved, ctx, &ns).await {
        Ok(probe) => probe,
        Err(err) => {
            warn!(error = %err, "unable to load readiness probe config");
            None
        }
    };

    let (builder, family) = new_pod_builder(&resolved.config)?;
    let mut browser_pod = builder.build(browser, &ctx.opts, readiness_probe);
    if let Some(owner_ref) = browser.controller_owner_ref(&()) {
        browser_pod.metadata.owner_references = Some(vec![owner_ref]);
    }

    pods.create(&Default::default(), &browser_pod).await?;

    let status = BrowserStatus {
        phase: Phase::Pending,
        port_config: pod::default_ports(),
        image: resolved.config.image.clone(),
        pod_name: browser_pod.name_any(),
        vnc_pass: family.vnc_pass().to_owned(),
        ..Default::default()
    };
    patch_status(browsers, &name, &status).await?;
    info!(browser = %name, "browser moved to pending");
    Ok(())
}

async fn find_browser_config(
    browser: &Browser,
    ctx: &Context,
    ns: &str,
) -> Result<ResolvedBrowser, OperatorError> {
    let sets: Api<BrowserSet> = Api::namespaced(ctx.client.clone(), ns);
    let list = sets.list(&ListParams::default()).await?;
    let set = list
        .items
        .into_iter()
        .next()
        .ok_or(OperatorError::Config(ConfigError::ConfigNotFound))?;
    Ok(resolve_browser_config(&set.spec, &browser.spec)?)
}

/// Synthesizes the browser readiness probe from the readiness ConfigMap.
/// Only WebDriver engines expose a status endpoint to probe.
async fn readiness_probe(
    browser: &Browser,
    resolved: &ResolvedBrowser,
    ctx: &Context,
    ns: &str,
) -> Result<Option<k8s_openapi::api::core::v1::Probe>, OperatorError> {
    use k8s_openapi::api::core::v1::{HTTPGetAction, Probe};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    if browser.spec.session_type != browserkube_common::crd::TYPE_WEBDRIVER {
        return Ok(None);
    }

    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);
    let cm = config_maps.get(&ctx.opts.browser_readiness_config).await?;
    let data = cm.data.unwrap_or_default();

    let prefix = browser.spec.session_type.to_lowercase();
    let key = |suffix: &str| format!("{prefix}.{suffix}");
    if data.get(&key("enabled")).map(String::as_str) == Some("false") {
        return Ok(None);
    }
    let int_value = |suffix: &str, fallback: i32| {
        data.get(&key(suffix))
            .and_then(|v| v.parse().ok())
            .unwrap_or(fallback)
    };

    Ok(Some(Probe {
        http_get: Some(HTTPGetAction {
            scheme: Some("HTTP".to_owned()),
            port: IntOrString::String(resolved.config.port.clone()),
            path: Some(format!(
                "{}/status",
                resolved.config.path.trim_end_matches('/')
            )),
            ..Default::default()
        }),
        initial_delay_seconds: Some(int_value("initialDelaySeconds", 2)),
        timeout_seconds: Some(int_value("timeoutSecond", 10)),
        failure_threshold: Some(int_value("failureThreshold", 10)),
        ..Default::default()
    }))
}

async fn check_pending(
    browser: &Browser,
    pod: &Pod,
    browsers: &Api<Browser>,
) -> Result<Action, OperatorError> {
    let name = browser.name_any();
    let pod_status = pod.status.clone().unwrap_or_default();
    let statuses = pod_status.container_statuses.unwrap_or_default();
    let ready = statuses.iter().filter(|s| s.ready).count();
    let host = pod_status.pod_ip.unwrap_or_default();

    if !statuses.is_empty() && ready == statuses.len() && !host.is_empty() {
        let mut status = browser.status.clone().unwrap_or_default();
        status.phase = Phase::Running;
        status.selenium_url = format!("http://{host}:{}/wd/hub", status.port_config.sidecar);
        status.host = host;
        patch_status(browsers, &name, &status).await?;
        return Ok(Action::await_change());
    }

    // cleanup the resource if the pod never gets up and running
    if let Some(created) = browser.meta().creation_timestamp.as_ref() {
        let age = chrono::Utc::now() - created.0;
        if age.to_std().unwrap_or_default() > PENDING_DEADLINE {
            warn!(browser = %name, "stuck in pending, deleting");
            browsers.delete(&name, &DeleteParams::default()).await?;
            return Ok(Action::await_change());
        }
    }

    Ok(Action::requeue(Duration::from_secs(2)))
}

async fn check_terminated(pod: &Pod, pods: &Api<Pod>) -> Result<Action, OperatorError> {
    let name = pod.name_any();
    info!(pod = %name, "deleting browser pod");
    let params = DeleteParams {
        grace_period_seconds: Some(POD_SHUTDOWN_GRACE_SECS),
        ..Default::default()
    };
    if let Err(err) = pods.delete(&name, &params).await {
        error!(error = %err, pod = %name, "unable to delete browser pod");
    }
    Ok(Action::await_change())
}

/// A terminated sidecar container signals that the session asked to quit or
/// timed out; the browser is torn down in response.
async fn check_sidecar_running(
    browser: &Browser,
    pod: &Pod,
    browsers: &Api<Browser>,
) -> Result<Action, OperatorError> {
    let pod_status = pod.status.clone().unwrap_or_default();
    if pod_status.phase.as_deref() != Some("Running") {
        return Ok(Action::await_change());
    }
    let sidecar_terminated = pod_status
        .container_statuses
        .unwrap_or_default()
        .iter()
        .any(|c| {
            c.name == CONTAINER_SIDECAR
                && c.state
                    .as_ref()
                    .is_some_and(|s| s.terminated.is_some())
        });
    if !sidecar_terminated {
        return Ok(Action::await_change());
    }

    let name = browser.name_any();
    info!(browser = %name, "sidecar exited, terminating browser");
    let mut status = browser.status.clone().unwrap_or_default();
    status.phase = Phase::Terminated;
    if let Err(err) = patch_status(browsers, &name, &status).await {
        error!(error = %err, "unable to update browser status");
    }
    if browser.meta().deletion_timestamp.is_none() {
        if let Err(err) = browsers.delete(&name, &DeleteParams::default()).await {
            error!(error = %err, "unable to delete browser");
        }
    }
    Ok(Action::requeue(Duration::from_secs(1)))
}

async fn patch_status(
    browsers: &Api<Browser>,
    name: &str,
    status: &BrowserStatus,
) -> Result<(), OperatorError> {
    let patch = serde_json::json!({"status": status});
    browsers
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
