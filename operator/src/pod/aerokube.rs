//! Pod builder for Aerokube-style images (quay.io/browser, cdtp, playwright).
//!
//! These images do not ship an X server, so enabling VNC adds a separate
//! x-server and vnc-server container pair.

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, Probe};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use browserkube_common::crd::{Browser, BrowserConfig};

use super::{
    add_recorder, apply_pod_overrides, clipboard_container, container_port, default_ports, env,
    install_extensions, pod_labels, pod_name, resolution, resources, sidecar_container,
    volume_mounts, volumes, BrowserPodBuilder, CONTAINER_BROWSER,
};
use crate::config::ControllerOpts;
use crate::image::ImageFamily;

const DISPLAY_NUM: &str = "0";
const DISPLAY: &str = ":0";
const REMOTE_DISPLAY: &str = "127.0.0.1:0";

pub(super) struct AerokubePodBuilder {
    config: BrowserConfig,
}

impl AerokubePodBuilder {
    pub(super) fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn browser_env(&self, browser: &Browser) -> Vec<EnvVar> {
        let mut vars = vec![env("TZ", &self.config.timezone)];
        if browser.spec.enable_vnc {
            vars.push(env("DISPLAY", DISPLAY));
        }
        vars
    }
}

impl BrowserPodBuilder for AerokubePodBuilder {
    fn build(
        &self,
        browser: &Browser,
        opts: &ControllerOpts,
        _readiness_probe: Option<Probe>,
    ) -> Pod {
        let family = ImageFamily::Aerokube;
        let mounts = volume_mounts(family);

        let mut spec = PodSpec {
            hostname: Some(browser.name_any()),
            restart_policy: Some("Never".to_owned()),
            containers: vec![
                sidecar_container(opts, family, &self.config, mounts.clone()),
                Container {
                    name: CONTAINER_BROWSER.to_owned(),
                    image: Some(self.config.image.clone()),
                    ports: Some(vec![
                        container_port("browser", &self.config.port),
                        container_port("vnc", &default_ports().vnc),
                    ]),
                    env: Some(self.browser_env(browser)),
                    volume_mounts: Some(mounts.clone()),
                    resources: Some(resources("1", "2Gi", "500m", "2Gi")),
                    ..Default::default()
                },
                clipboard_container(opts, REMOTE_DISPLAY, mounts.clone()),
            ],
            volumes: Some(volumes(opts)),
            ..Default::default()
        };

        if browser.spec.enable_vnc {
            spec.containers.push(Container {
                name: "x-server".to_owned(),
                image: Some(opts.x_server_image.clone()),
                volume_mounts: Some(mounts.clone()),
                ports: Some(vec![container_port("p", "6000")]),
                env: Some(vec![
                    env(
                        "SCREEN_RESOLUTION",
                        &resolution(&browser.spec.screen_resolution),
                    ),
                    env("DISPLAY", DISPLAY),
                ]),
                ..Default::default()
            });
            spec.containers.push(Container {
                name: "vnc-server".to_owned(),
                image: Some(opts.vnc_server_image.clone()),
                volume_mounts: Some(mounts.clone()),
                ports: Some(vec![container_port("p", &default_ports().vnc)]),
                ..Default::default()
            });
        }
        if self.config.enable_video {
            add_recorder(opts, &mut spec, family, DISPLAY_NUM, mounts);
        }
        if !browser.spec.extensions.is_empty() {
            install_extensions(
                &mut spec,
                &browser.spec.browser_name,
                family,
                &browser.spec.extensions,
                &opts.extension_installer_image,
                &opts.browser_extension_config,
            );
        }

        let mut pod = Pod {
            metadata: ObjectMeta {
                name: Some(pod_name(&browser.name_any())),
                labels: Some(pod_labels(&browser.name_any())),
                namespace: browser.namespace(),
                ..Default::default()
            },
            spec: Some(spec),
            ..Default::default()
        };
        apply_pod_overrides(&mut pod, self.config.spec.as_ref());
        pod
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::new_pod_builder;

    fn opts() -> ControllerOpts {
        ControllerOpts {
            namespace: "browserkube".into(),
            sidecar_image: "browserkube/sidecar:latest".into(),
            x_server_image: "browserkube/xserver:latest".into(),
            vnc_server_image: "browserkube/vnc:latest".into(),
            clipboard_image: "browserkube/clipboard:latest".into(),
            recorder_image: "browserkube/recorder:latest".into(),
            extension_installer_image: "browserkube/ext:latest".into(),
            sidecar_port: "9999".into(),
            browser_user_config: "usergroup".into(),
            browser_extension_config: "extensions".into(),
            browser_readiness_config: "readiness".into(),
        }
    }

    fn browser(enable_vnc: bool, enable_video: bool) -> (Browser, BrowserConfig) {
        let browser = Browser::new(
            "sess-1",
            browserkube_common::crd::BrowserSpec {
                browser_name: "chrome".into(),
                browser_version: "126.0".into(),
                session_type: "WEBDRIVER".into(),
                enable_vnc,
                ..Default::default()
            },
        );
        let config = BrowserConfig {
            image: "quay.io/browser/chrome:126.0".into(),
            port: "4444".into(),
            path: "/wd/hub".into(),
            timezone: "UTC".into(),
            enable_video,
            ..Default::default()
        };
        (browser, config)
    }

    #[test]
    fn test_vnc_adds_xserver_pair() {
        let (b, config) = browser(true, false);
        let (builder, _) = new_pod_builder(&config).unwrap();
        let pod = builder.build(&b, &opts(), None);
        let names: Vec<String> = pod
            .spec
            .unwrap()
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert!(names.contains(&"x-server".to_owned()));
        assert!(names.contains(&"vnc-server".to_owned()));
    }

    #[test]
    fn test_video_adds_recorder_and_env() {
        let (b, config) = browser(false, true);
        let (builder, _) = new_pod_builder(&config).unwrap();
        let pod = builder.build(&b, &opts(), None);
        let spec = pod.spec.unwrap();
        assert!(spec.containers.iter().any(|c| c.name == "recorder"));
        let sidecar_env = spec.containers[0].env.as_ref().unwrap();
        assert!(sidecar_env
            .iter()
            .any(|e| e.name == "RECORDER_URL" && e.value.as_deref() == Some("http://localhost:5555")));
    }

    #[test]
    fn test_base_container_set() {
        let (b, config) = browser(false, false);
        let (builder, _) = new_pod_builder(&config).unwrap();
        let pod = builder.build(&b, &opts(), None);
        assert_eq!(pod.metadata.name.as_deref(), Some("browser-sess-1"));
        let names: Vec<String> = pod
            .spec
            .unwrap()
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["sidecar", "browser", "clipboard"]);
    }
}
