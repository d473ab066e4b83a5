//! Custom resource definitions for the BrowserKube API group.
//!
//! Three resources back the session lifecycle:
//! - `Browser` - one ephemeral browser session, reconciled into a pod
//! - `BrowserSet` - the per-namespace browser catalog
//! - `SessionResult` - the immutable record left behind by a finished session

use k8s_openapi::api::core::v1::{Affinity, HostAlias, PodDNSConfig, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const GROUP: &str = "browserkube.io";
pub const VERSION: &str = "v1";

/// Browsers carrying this label are visible to the session directory.
pub const LABEL_BROWSER_VISIBILITY: &str = "browserkube.io/visible";
pub const LABEL_APP: &str = "browserkube.io/app";
pub const LABEL_COMPONENT: &str = "browserkube.io/component";
pub const LABEL_SESSION_ID: &str = "browserkube.io/session-id";

pub const LABEL_VALUE_APP: &str = "browserkube";
pub const LABEL_VALUE_COMPONENT_BROWSER: &str = "browser";

pub const TYPE_WEBDRIVER: &str = "WEBDRIVER";
pub const TYPE_PLAYWRIGHT: &str = "PLAYWRIGHT";

/// Session lifecycle phase.
///
/// Transitions are monotonic along Pending -> Running -> Terminated, with two
/// extra edges: Pending -> Failed and any -> Terminated.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Terminated,
    Failed,
}

impl Phase {
    /// Whether moving from `self` to `next` is a legal phase transition.
    pub fn can_transition_to(self, next: Phase) -> bool {
        match (self, next) {
            (_, Phase::Terminated) => true,
            (Phase::Pending, Phase::Running) | (Phase::Pending, Phase::Failed) => true,
            (a, b) => a == b,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Terminated => "Terminated",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Typed provisioning failure reasons surfaced in `BrowserStatus`.
pub mod reason {
    pub const VERSION_NOT_SUPPORTED: &str = "Version isn't supported";
    pub const PLATFORM_NOT_SUPPORTED: &str = "Platform isn't supported";
    pub const CONFIG_NOT_FOUND: &str = "Browser config isn't found";
    pub const UNKNOWN_SESSION_TYPE: &str = "Session type unknown";
    pub const UNKNOWN: &str = "Unknown";
}

/// Browser is the schema for one requested browser session. The CR name is
/// the session identifier.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "browserkube.io",
    version = "v1",
    kind = "Browser",
    namespaced,
    status = "BrowserStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSpec {
    #[serde(default, rename = "platformName", skip_serializing_if = "String::is_empty")]
    pub platform: String,
    pub browser_version: String,
    pub browser_name: String,
    /// Session type: WEBDRIVER or PLAYWRIGHT.
    #[serde(rename = "type")]
    pub session_type: String,
    #[serde(default, rename = "timeZone", skip_serializing_if = "String::is_empty")]
    pub timezone: String,

    #[serde(default, rename = "enableVNC", skip_serializing_if = "std::ops::Not::not")]
    pub enable_vnc: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_video: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub screen_resolution: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<BrowserExtension>,

    /// Raw JSON snapshot of the capabilities the session was created with.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub caps: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrowserExtension {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrowserStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub pod_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Base URL of the session engine behind the sidecar.
    #[serde(default, rename = "seleniumURL", skip_serializing_if = "String::is_empty")]
    pub selenium_url: String,
    #[serde(default)]
    pub port_config: PortConfig,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vnc_pass: String,
}

/// Container ports of a browser pod, as strings for direct URL assembly.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    #[serde(default)]
    pub sidecar: String,
    #[serde(default)]
    pub browser: String,
    #[serde(default)]
    pub file_server: String,
    #[serde(default)]
    pub clipboard: String,
    #[serde(default, rename = "vnc")]
    pub vnc: String,
    #[serde(default)]
    pub dev_tools: String,
}

/// BrowserSet is the per-namespace catalog of launchable browsers, keyed by
/// session type and browser name.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "browserkube.io",
    version = "v1",
    kind = "BrowserSet",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSetSpec {
    pub default_timezone: String,

    /// Scheduling defaults applied to every browser pod in the set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<BrowserPodSpec>,
    #[serde(default, rename = "webdriver", skip_serializing_if = "BTreeMap::is_empty")]
    pub webdriver: BTreeMap<String, BrowsersConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub playwright: BTreeMap<String, BrowsersConfig>,
}

/// Pod scheduling overrides. A subset of the core PodSpec that browser
/// catalogs are allowed to customize.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrowserPodSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheduler_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_aliases: Vec<HostAlias>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority_class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDNSConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrowsersConfig {
    pub default_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub versions: BTreeMap<String, BrowserConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    pub image: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<BrowserPodSpec>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_video: bool,
}

/// SessionResult is the record of a finished session and its artifacts.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "browserkube.io",
    version = "v1",
    kind = "SessionResult",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SessionResultSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub browser: BrowserSpec,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub browser_image: String,
    #[serde(default)]
    pub files: SessionResultFiles,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResultFiles {
    #[serde(default)]
    pub browser_log: String,
    #[serde(default)]
    pub video: String,
    #[serde(default)]
    pub bookmarks: String,
}
