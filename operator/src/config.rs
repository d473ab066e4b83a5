//! Operator configuration and browser catalog resolution.

use clap::Parser;

use browserkube_common::crd::{
    reason, BrowserConfig, BrowserPodSpec, BrowserSetSpec, BrowserSpec, TYPE_PLAYWRIGHT,
    TYPE_WEBDRIVER,
};

/// Command line options of the operator binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "browserkube-operator", about = "BrowserKube browser operator")]
pub struct ControllerOpts {
    /// Namespace the operator watches and creates pods in
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "browserkube")]
    pub namespace: String,

    #[arg(long, env = "SIDECAR_IMAGE")]
    pub sidecar_image: String,
    #[arg(long, env = "X_SERVER_IMAGE", default_value = "")]
    pub x_server_image: String,
    #[arg(long, env = "VNC_SERVER_IMAGE", default_value = "")]
    pub vnc_server_image: String,
    #[arg(long, env = "CLIPBOARD_IMAGE", default_value = "")]
    pub clipboard_image: String,
    #[arg(long, env = "RECORDER_IMAGE", default_value = "")]
    pub recorder_image: String,
    #[arg(long, env = "EXTENSION_INSTALLER_IMAGE", default_value = "")]
    pub extension_installer_image: String,

    #[arg(long, env = "SIDECAR_PORT", default_value = "9999")]
    pub sidecar_port: String,

    /// ConfigMap with the passwd/group entries mounted into browser pods
    #[arg(long, default_value = "browserkube-browsers-usergroup")]
    pub browser_user_config: String,
    /// ConfigMap with per-browser extension whitelists
    #[arg(long, default_value = "browserkube-browser-extension-config")]
    pub browser_extension_config: String,
    /// ConfigMap with readiness probe settings
    #[arg(long, default_value = "browserkube-browsers-readinessprobe-config")]
    pub browser_readiness_config: String,
}

/// Catalog lookup failure, carrying the typed reason that lands in
/// `BrowserStatus.reason`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("browser config isn't found")]
    ConfigNotFound,
    #[error("browser '{0}' is not supported")]
    VersionNotSupported(String),
    #[error("platform '{0}' is not supported")]
    PlatformNotSupported(String),
    #[error("unknown session type '{0}'")]
    UnknownSessionType(String),
    #[error("browser is not provided")]
    NoBrowserName,
}

impl ConfigError {
    pub fn reason(&self) -> &'static str {
        match self {
            ConfigError::ConfigNotFound => reason::CONFIG_NOT_FOUND,
            ConfigError::VersionNotSupported(_) => reason::VERSION_NOT_SUPPORTED,
            ConfigError::PlatformNotSupported(_) => reason::PLATFORM_NOT_SUPPORTED,
            ConfigError::UnknownSessionType(_) => reason::UNKNOWN_SESSION_TYPE,
            ConfigError::NoBrowserName => reason::UNKNOWN,
        }
    }
}

/// Catalog entry resolved for one Browser, with all defaults applied.
#[derive(Debug, Clone)]
pub struct ResolvedBrowser {
    pub config: BrowserConfig,
    /// The version actually selected, after catalog defaulting.
    pub version: String,
}

/// Resolves the catalog entry for a browser spec. Pure over its inputs, so
/// repeated resolution of the same spec yields the same result.
pub fn resolve_browser_config(
    set: &BrowserSetSpec,
    spec: &BrowserSpec,
) -> Result<ResolvedBrowser, ConfigError> {
    let platform = if spec.platform.is_empty() {
        "linux".to_owned()
    } else {
        spec.platform.to_lowercase()
    };
    if platform != "linux" {
        return Err(ConfigError::PlatformNotSupported(platform));
    }

    let browser_name = spec.browser_name.to_lowercase();
    if browser_name.is_empty() {
        return Err(ConfigError::NoBrowserName);
    }

    let session_type = if spec.session_type.is_empty() {
        TYPE_WEBDRIVER
    } else {
        spec.session_type.as_str()
    };
    let browsers = match session_type {
        TYPE_WEBDRIVER => &set.webdriver,
        TYPE_PLAYWRIGHT => &set.playwright,
        other => return Err(ConfigError::UnknownSessionType(other.to_owned())),
    };

    let mapping = browsers
        .get(&browser_name)
        .ok_or_else(|| ConfigError::VersionNotSupported(browser_name.clone()))?;

    let version = first_non_empty(&[spec.browser_version.as_str(), &mapping.default_version]);
    let mut config = mapping
        .versions
        .get(&version)
        .cloned()
        .ok_or_else(|| ConfigError::VersionNotSupported(version.clone()))?;

    config.path = first_non_empty(&[config.path.as_str(), &mapping.default_path]);
    config.timezone = first_non_empty(&[
        spec.timezone.as_str(),
        &config.timezone,
        &set.default_timezone,
        "UTC",
    ]);
    config.enable_video = spec.enable_video;

    if let Some(set_pod_spec) = &set.pod_spec {
        match &mut config.spec {
            Some(cfg_spec) => merge_pod_spec(cfg_spec, set_pod_spec),
            None => config.spec = Some(set_pod_spec.clone()),
        }
    }

    Ok(ResolvedBrowser { config, version })
}

/// Fills unset fields of `dst` from `src`; fields already set keep their
/// values.
fn merge_pod_spec(dst: &mut BrowserPodSpec, src: &BrowserPodSpec) {
    fn fill_str(dst: &mut String, src: &str) {
        if dst.is_empty() && !src.is_empty() {
            *dst = src.to_owned();
        }
    }
    if dst.termination_grace_period_seconds.is_none() {
        dst.termination_grace_period_seconds = src.termination_grace_period_seconds;
    }
    if dst.active_deadline_seconds.is_none() {
        dst.active_deadline_seconds = src.active_deadline_seconds;
    }
    if dst.dns_policy.is_none() {
        dst.dns_policy = src.dns_policy.clone();
    }
    if dst.node_selector.is_empty() {
        dst.node_selector = src.node_selector.clone();
    }
    fill_str(&mut dst.service_account_name, &src.service_account_name);
    fill_str(&mut dst.node_name, &src.node_name);
    if dst.affinity.is_none() {
        dst.affinity = src.affinity.clone();
    }
    fill_str(&mut dst.scheduler_name, &src.scheduler_name);
    if dst.tolerations.is_empty() {
        dst.tolerations = src.tolerations.clone();
    }
    if dst.host_aliases.is_empty() {
        dst.host_aliases = src.host_aliases.clone();
    }
    fill_str(&mut dst.priority_class_name, &src.priority_class_name);
    if dst.priority.is_none() {
        dst.priority = src.priority;
    }
    if dst.dns_config.is_none() {
        dst.dns_config = src.dns_config.clone();
    }
}

fn first_non_empty(candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|s| !s.is_empty())
        .map_or_else(String::new, |s| (*s).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use browserkube_common::crd::BrowsersConfig;
    use std::collections::BTreeMap;

    fn catalog() -> BrowserSetSpec {
        let mut versions = BTreeMap::new();
        versions.insert(
            "126.0".to_owned(),
            BrowserConfig {
                image: "selenium/standalone-chrome:126.0".to_owned(),
                port: "4444".to_owned(),
                path: "/wd/hub".to_owned(),
                ..Default::default()
            },
        );
        versions.insert(
            "125.0".to_owned(),
            BrowserConfig {
                image: "selenium/standalone-chrome:125.0".to_owned(),
                port: "4444".to_owned(),
                ..Default::default()
            },
        );
        let mut webdriver = BTreeMap::new();
        webdriver.insert(
            "chrome".to_owned(),
            BrowsersConfig {
                default_version: "126.0".to_owned(),
                default_path: "/wd/hub".to_owned(),
                versions,
            },
        );
        BrowserSetSpec {
            default_timezone: "UTC".to_owned(),
            pod_spec: None,
            webdriver,
            playwright: BTreeMap::new(),
        }
    }

    fn spec(name: &str, version: &str) -> BrowserSpec {
        BrowserSpec {
            browser_name: name.to_owned(),
            browser_version: version.to_owned(),
            session_type: TYPE_WEBDRIVER.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let set = catalog();
        let s = spec("chrome", "126.0");
        let first = resolve_browser_config(&set, &s).unwrap();
        let second = resolve_browser_config(&set, &s).unwrap();
        assert_eq!(first.config.image, second.config.image);
        assert_eq!(first.version, second.version);
    }

    #[test]
    fn test_empty_version_uses_catalog_default() {
        let resolved = resolve_browser_config(&catalog(), &spec("chrome", "")).unwrap();
        assert_eq!(resolved.version, "126.0");
        assert_eq!(resolved.config.image, "selenium/standalone-chrome:126.0");
    }

    #[test]
    fn test_default_path_applied_when_version_has_none() {
        let resolved = resolve_browser_config(&catalog(), &spec("chrome", "125.0")).unwrap();
        assert_eq!(resolved.config.path, "/wd/hub");
    }

    #[test]
    fn test_unsupported_version_reason() {
        let err = resolve_browser_config(&catalog(), &spec("chrome", "9.9")).unwrap_err();
        assert_eq!(err.reason(), reason::VERSION_NOT_SUPPORTED);
    }

    #[test]
    fn test_unsupported_browser_reason() {
        let err = resolve_browser_config(&catalog(), &spec("netscape", "")).unwrap_err();
        assert_eq!(err.reason(), reason::VERSION_NOT_SUPPORTED);
    }

    #[test]
    fn test_unsupported_platform() {
        let mut s = spec("chrome", "126.0");
        s.platform = "windows".to_owned();
        let err = resolve_browser_config(&catalog(), &s).unwrap_err();
        assert_eq!(err.reason(), reason::PLATFORM_NOT_SUPPORTED);
    }

    #[test]
    fn test_unknown_session_type() {
        let mut s = spec("chrome", "126.0");
        s.session_type = "APPIUM".to_owned();
        let err = resolve_browser_config(&catalog(), &s).unwrap_err();
        assert_eq!(err.reason(), reason::UNKNOWN_SESSION_TYPE);
    }

    #[test]
    fn test_pod_spec_overlay_keeps_version_values() {
        let mut set = catalog();
        set.pod_spec = Some(BrowserPodSpec {
            service_account_name: "from-set".to_owned(),
            priority: Some(5),
            ..Default::default()
        });
        let chrome = set.webdriver.get_mut("chrome").unwrap();
        let cfg = chrome.versions.get_mut("126.0").unwrap();
        cfg.spec = Some(BrowserPodSpec {
            service_account_name: "from-version".to_owned(),
            ..Default::default()
        });

        let resolved = resolve_browser_config(&set, &spec("chrome", "126.0")).unwrap();
        let merged = resolved.config.spec.unwrap();
        assert_eq!(merged.service_account_name, "from-version");
        assert_eq!(merged.priority, Some(5));
    }

    #[test]
    fn test_timezone_precedence() {
        let mut s = spec("chrome", "126.0");
        s.timezone = "Europe/Berlin".to_owned();
        let resolved = resolve_browser_config(&catalog(), &s).unwrap();
        assert_eq!(resolved.config.timezone, "Europe/Berlin");

        let resolved = resolve_browser_config(&catalog(), &spec("chrome", "126.0")).unwrap();
        assert_eq!(resolved.config.timezone, "UTC");
    }
}
