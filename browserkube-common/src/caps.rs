//! WebDriver capability model.
//!
//! Capabilities arrive in two shapes: the legacy `desiredCapabilities` object
//! and the W3C `capabilities` object with `alwaysMatch`/`firstMatch`. Both are
//! tolerated on session creation. Fields this system does not know about are
//! kept in a flattened map so they survive a decode/encode round trip.

use serde::{Deserialize, Serialize};

use crate::crd::{BrowserExtension, TYPE_WEBDRIVER};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, rename = "platformName", skip_serializing_if = "String::is_empty")]
    pub platform: String,
    #[serde(default, rename = "browserVersion", skip_serializing_if = "String::is_empty")]
    pub browser_version: String,
    #[serde(default, rename = "browserName", skip_serializing_if = "String::is_empty")]
    pub browser_name: String,
    #[serde(default, rename = "timeZone", skip_serializing_if = "String::is_empty")]
    pub timezone: String,
    #[serde(
        default,
        rename = "browserkube:options",
        skip_serializing_if = "BrowserKubeOpts::is_empty"
    )]
    pub browserkube_opts: BrowserKubeOpts,

    /// Vendor fields that belong to the downstream engine, passed through
    /// untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserKubeOpts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reportportal: Option<ReportPortalOpts>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub video_file_name: String,
    /// Session type: WEBDRIVER or PLAYWRIGHT.
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub session_type: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_video: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub screen_resolution: String,
    #[serde(default, rename = "enableVNC", skip_serializing_if = "std::ops::Not::not")]
    pub enable_vnc: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<BrowserExtension>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BrowserKubeOpts {
    pub fn is_empty(&self) -> bool {
        *self == BrowserKubeOpts::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPortalOpts {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub launch_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub item_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub finish_item: bool,
}

/// New-session request body. Legacy and W3C capability locations are both
/// decoded; `adjust` reconciles them into the legacy slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSessionRq {
    #[serde(default, rename = "desiredCapabilities")]
    pub capabilities: Capabilities,
    #[serde(default, rename = "capabilities")]
    pub w3c_capabilities: W3CCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct W3CCapabilities {
    #[serde(default, rename = "alwaysMatch")]
    pub always_match: Capabilities,
    #[serde(default, rename = "firstMatch")]
    pub first_match: Vec<Capabilities>,
}

#[derive(Debug, thiserror::Error)]
pub enum CapsError {
    #[error("browser name is not defined")]
    NoBrowserName,
    #[error("malformed capabilities: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl NewSessionRq {
    /// Fills the top-level capabilities from the first W3C candidate that
    /// names a browser, never overwriting fields that are already set, and
    /// defaults the session type to WEBDRIVER.
    pub fn adjust(&mut self) -> Result<(), CapsError> {
        if self.capabilities.browser_name.is_empty() {
            let valid = if !self.w3c_capabilities.always_match.browser_name.is_empty() {
                Some(&self.w3c_capabilities.always_match)
            } else {
                self.w3c_capabilities
                    .first_match
                    .iter()
                    .find(|c| !c.browser_name.is_empty())
            };
            if let Some(valid) = valid.cloned() {
                self.capabilities.merge_missing(&valid);
            }
        }
        if self.capabilities.browser_name.is_empty() {
            return Err(CapsError::NoBrowserName);
        }
        if self.capabilities.browserkube_opts.session_type.is_empty() {
            self.capabilities.browserkube_opts.session_type = TYPE_WEBDRIVER.to_owned();
        }
        Ok(())
    }
}

impl Capabilities {
    /// Copies fields from `other` into `self` where `self` has no value yet.
    pub fn merge_missing(&mut self, other: &Capabilities) {
        fn fill(dst: &mut String, src: &str) {
            if dst.is_empty() && !src.is_empty() {
                *dst = src.to_owned();
            }
        }
        fill(&mut self.platform, &other.platform);
        fill(&mut self.browser_version, &other.browser_version);
        fill(&mut self.browser_name, &other.browser_name);
        fill(&mut self.timezone, &other.timezone);
        if self.browserkube_opts.is_empty() && !other.browserkube_opts.is_empty() {
            self.browserkube_opts = other.browserkube_opts.clone();
        }
        for (k, v) in &other.extra {
            self.extra.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_prefers_legacy_capabilities() {
        let mut rq: NewSessionRq = serde_json::from_value(serde_json::json!({
            "desiredCapabilities": {"browserName": "chrome"},
            "capabilities": {"alwaysMatch": {"browserName": "firefox"}}
        }))
        .unwrap();
        rq.adjust().unwrap();
        assert_eq!(rq.capabilities.browser_name, "chrome");
        assert_eq!(rq.capabilities.browserkube_opts.session_type, TYPE_WEBDRIVER);
    }

    #[test]
    fn test_adjust_falls_back_to_first_match() {
        let mut rq: NewSessionRq = serde_json::from_value(serde_json::json!({
            "capabilities": {
                "firstMatch": [
                    {"platformName": "linux"},
                    {"browserName": "firefox", "browserVersion": "127.0"}
                ]
            }
        }))
        .unwrap();
        rq.adjust().unwrap();
        assert_eq!(rq.capabilities.browser_name, "firefox");
        assert_eq!(rq.capabilities.browser_version, "127.0");
    }

    #[test]
    fn test_adjust_requires_browser_name() {
        let mut rq = NewSessionRq::default();
        assert!(matches!(rq.adjust(), Err(CapsError::NoBrowserName)));
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let raw = serde_json::json!({
            "browserName": "chrome",
            "goog:chromeOptions": {"args": ["--headless=new"]},
            "browserkube:options": {
                "enableVNC": true,
                "se:customField": 42
            }
        });
        let caps: Capabilities = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(
            caps.extra["goog:chromeOptions"]["args"][0],
            "--headless=new"
        );
        assert_eq!(caps.browserkube_opts.extra["se:customField"], 42);

        let encoded = serde_json::to_value(&caps).unwrap();
        assert_eq!(encoded, raw);
    }

    #[test]
    fn test_merge_missing_does_not_overwrite() {
        let mut caps = Capabilities {
            browser_name: "chrome".into(),
            ..Default::default()
        };
        let other = Capabilities {
            browser_name: "firefox".into(),
            browser_version: "127.0".into(),
            ..Default::default()
        };
        caps.merge_missing(&other);
        assert_eq!(caps.browser_name, "chrome");
        assert_eq!(caps.browser_version, "127.0");
    }
}
