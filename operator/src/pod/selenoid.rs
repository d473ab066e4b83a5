//! Pod builder for selenoid/* images.

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

pub(super) struct SelenoidPodBuilder {
    config: BrowserConfig,
}

impl SelenoidPodBuilder {
    pub(super) fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn browser_env(&self, browser: &Browser) -> Vec<EnvVar> {
        let mut vars = vec![
            env("TZ", &self.config.timezone),
            env("DISPLAY", ":99"),
            env(
                "SCREEN_RESOLUTION",
                &resolution(&browser.spec.screen_resolution),
            ),
        ];
        if browser.spec.enable_vnc {
            vars.push(env("ENABLE_VNC", "true"));
        }
        vars
    }
}

impl BrowserPodBuilder for SelenoidPodBuilder {
    fn build(
        &self,
        browser: &Browser,
        opts: &ControllerOpts,
        readiness_probe: Option<Probe>,
    ) -> Pod {
        let family = ImageFamily::Selenoid;
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
                    readiness_probe,
                    resources: Some(resources("1", "2Gi", "500m", "2Gi")),
                    ..Default::default()
                },
                clipboard_container(opts, ":99", mounts.clone()),
            ],
            volumes: Some(volumes(opts)),
            ..Default::default()
        };

        if self.config.enable_video {
            add_recorder(opts, &mut spec, family, "99", mounts);
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
