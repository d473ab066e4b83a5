//! Browser pod synthesis.
//!
//! One builder per image family assembles the sidecar, browser and clipboard
//! containers plus the optional recorder, VNC pair and extension installer.

mod aerokube;
mod selenium;
mod selenoid;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, ConfigMapVolumeSource, Container, ContainerPort,
    EmptyDirVolumeSource, EnvVar, EnvVarSource, KeyToPath, Pod, PodSpec, Probe,
    ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use browserkube_common::crd::{
    Browser, BrowserConfig, BrowserExtension, BrowserPodSpec, PortConfig, LABEL_APP,
    LABEL_COMPONENT, LABEL_SESSION_ID, LABEL_VALUE_APP, LABEL_VALUE_COMPONENT_BROWSER,
};

use crate::config::ControllerOpts;
use crate::image::{parse_image_family, ImageFamily};
use crate::OperatorError;

pub const CONTAINER_BROWSER: &str = "browser";
pub const CONTAINER_SIDECAR: &str = "sidecar";
pub const CONTAINER_RECORDER: &str = "recorder";
pub const CONTAINER_CLIPBOARD: &str = "clipboard";
pub const CONTAINER_EXTENSION_INSTALLER: &str = "extension-installer";

const VIDEOS_RELATIVE_PATH: &str = "videos";

/// Fixed container port assignments of every browser pod.
pub fn default_ports() -> PortConfig {
    PortConfig {
        vnc: "5900".to_owned(),
        dev_tools: "7070".to_owned(),
        file_server: "8080".to_owned(),
        clipboard: "9191".to_owned(),
        sidecar: "9999".to_owned(),
        browser: "4444".to_owned(),
    }
}

pub trait BrowserPodBuilder {
    fn build(
        &self,
        browser: &Browser,
        opts: &ControllerOpts,
        readiness_probe: Option<Probe>,
    ) -> Pod;
}

/// Picks the builder for the configured image. The Microsoft family is
/// classified but has no builder.
pub fn new_pod_builder(
    config: &BrowserConfig,
) -> Result<(Box<dyn BrowserPodBuilder + Send + Sync>, ImageFamily), OperatorError> {
    let family = parse_image_family(&config.image)?;
    let builder: Box<dyn BrowserPodBuilder + Send + Sync> = match family {
        ImageFamily::Selenium => Box::new(selenium::SeleniumPodBuilder::new(config.clone())),
        ImageFamily::Selenoid => Box::new(selenoid::SelenoidPodBuilder::new(config.clone())),
        ImageFamily::Aerokube => Box::new(aerokube::AerokubePodBuilder::new(config.clone())),
        ImageFamily::Microsoft => {
            return Err(OperatorError::UnsupportedImage(config.image.clone()))
        }
    };
    Ok((builder, family))
}

pub fn pod_name(session_id: &str) -> String {
    format!("browser-{}", session_id.to_lowercase())
}

pub(crate) fn pod_labels(session_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            LABEL_COMPONENT.to_owned(),
            LABEL_VALUE_COMPONENT_BROWSER.to_owned(),
        ),
        (LABEL_APP.to_owned(), LABEL_VALUE_APP.to_owned()),
        (LABEL_SESSION_ID.to_owned(), session_id.to_owned()),
    ])
}

pub(crate) fn container_port(name: &str, port: &str) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_owned()),
        protocol: Some("TCP".to_owned()),
        container_port: port.parse().unwrap_or(0),
        ..Default::default()
    }
}

pub(crate) fn volume_mounts(family: ImageFamily) -> Vec<VolumeMount> {
    let homedir = family.homedir();
    vec![
        mount("dshm", "/dev/shm", None),
        mount("usergroup", "/etc/passwd", Some("passwd")),
        mount("usergroup", "/etc/group", Some("group")),
        mount("videos", &format!("{homedir}/{VIDEOS_RELATIVE_PATH}"), None),
        mount("tmp", "/tmp", None),
        // used by selenoid images
        mount("userhome", homedir, None),
    ]
}

fn mount(name: &str, path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: name.to_owned(),
        mount_path: path.to_owned(),
        sub_path: sub_path.map(str::to_owned),
        ..Default::default()
    }
}

pub(crate) fn volumes(opts: &ControllerOpts) -> Vec<Volume> {
    let empty_dir = |name: &str| Volume {
        name: name.to_owned(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    };
    vec![
        empty_dir("userhome"),
        Volume {
            name: "usergroup".to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(opts.browser_user_config.clone()),
                items: Some(vec![
                    KeyToPath {
                        key: "group".to_owned(),
                        path: "group".to_owned(),
                        ..Default::default()
                    },
                    KeyToPath {
                        key: "passwd".to_owned(),
                        path: "passwd".to_owned(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "dshm".to_owned(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_owned()),
                size_limit: Some(Quantity("1Gi".to_owned())),
            }),
            ..Default::default()
        },
        empty_dir("videos"),
        empty_dir("tmp"),
        empty_dir("plugins"),
    ]
}

pub(crate) fn resources(
    limit_cpu: &str,
    limit_memory: &str,
    request_cpu: &str,
    request_memory: &str,
) -> ResourceRequirements {
    let list = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_owned(), Quantity(cpu.to_owned())),
            ("memory".to_owned(), Quantity(memory.to_owned())),
        ])
    };
    ResourceRequirements {
        limits: Some(list(limit_cpu, limit_memory)),
        requests: Some(list(request_cpu, request_memory)),
        ..Default::default()
    }
}

pub(crate) fn sidecar_container(
    opts: &ControllerOpts,
    family: ImageFamily,
    config: &BrowserConfig,
    mounts: Vec<VolumeMount>,
) -> Container {
    Container {
        name: CONTAINER_SIDECAR.to_owned(),
        image: Some(opts.sidecar_image.clone()),
        ports: Some(vec![container_port("sidecar", &opts.sidecar_port)]),
        env: Some(vec![
            env("PORT", &opts.sidecar_port),
            env(
                "PROXY_URL",
                &format!("http://localhost:{}{}", config.port, config.path),
            ),
            env("BROWSER_HOME_DIR", family.homedir()),
        ]),
        volume_mounts: Some(mounts),
        resources: Some(resources("200m", "128Mi", "100m", "128Mi")),
        ..Default::default()
    }
}

pub(crate) fn clipboard_container(
    opts: &ControllerOpts,
    display: &str,
    mounts: Vec<VolumeMount>,
) -> Container {
    Container {
        name: CONTAINER_CLIPBOARD.to_owned(),
        image: Some(opts.clipboard_image.clone()),
        volume_mounts: Some(mounts),
        ports: Some(vec![container_port("p", &default_ports().clipboard)]),
        env: Some(vec![env("DISPLAY", display)]),
        stdin: Some(true),
        tty: Some(true),
        ..Default::default()
    }
}

pub(crate) fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.to_owned()),
        ..Default::default()
    }
}

/// Normalizes a screen resolution to WIDTHxHEIGHTxDEPTH, defaulting the
/// color depth to 24.
pub fn resolution(res: &str) -> String {
    if res.is_empty() {
        return "1920x1080x24".to_owned();
    }
    let parts: Vec<&str> = res.split('x').collect();
    if parts.len() == 2 {
        return format!("{}x{}x24", parts[0], parts[1]);
    }
    parts.join("x")
}

/// Appends the video recorder container and points the sidecar at it.
pub(crate) fn add_recorder(
    opts: &ControllerOpts,
    spec: &mut PodSpec,
    family: ImageFamily,
    display_num: &str,
    mounts: Vec<VolumeMount>,
) {
    if let Some(sidecar) = spec.containers.first_mut() {
        sidecar
            .env
            .get_or_insert_with(Vec::new)
            .push(env("RECORDER_URL", "http://localhost:5555"));
    }
    spec.containers.push(Container {
        name: CONTAINER_RECORDER.to_owned(),
        image: Some(opts.recorder_image.clone()),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            run_as_non_root: Some(true),
            ..Default::default()
        }),
        ports: Some(vec![container_port("http", "5555")]),
        args: Some(vec![
            "--video-size=1360x1020".to_owned(),
            "--frame-rate=12".to_owned(),
            format!("--display-num={display_num}"),
            "--codec=libx264".to_owned(),
            format!("--file-path={}/{}", family.homedir(), VIDEOS_RELATIVE_PATH),
        ]),
        volume_mounts: Some(mounts),
        ..Default::default()
    });
}

/// Adds the extension-installer init container and the browser-specific
/// extension mounts. The whitelist comes from a ConfigMap key per browser.
pub(crate) fn install_extensions(
    spec: &mut PodSpec,
    browser_name: &str,
    family: ImageFamily,
    extensions: &[BrowserExtension],
    installer_image: &str,
    extension_config: &str,
) {
    let ext_mounts = extension_mounts(family, browser_name);

    for container in &mut spec.containers {
        if container.name == CONTAINER_BROWSER {
            container
                .volume_mounts
                .get_or_insert_with(Vec::new)
                .extend(ext_mounts.iter().cloned());
            break;
        }
    }

    let mut args = Vec::with_capacity(extensions.len() * 3);
    for extension in extensions {
        args.push(format!("--browserName={browser_name}"));
        args.push(format!("--extensionId={}", extension.extension_id));
        args.push(format!("--updateUrl={}", extension.update_url));
    }

    spec.init_containers = Some(vec![Container {
        name: CONTAINER_EXTENSION_INSTALLER.to_owned(),
        image: Some(installer_image.to_owned()),
        env: Some(vec![EnvVar {
            name: format!(
                "{}-WHITELIST-{}",
                extension_config.to_uppercase(),
                browser_name.to_uppercase()
            ),
            value_from: Some(EnvVarSource {
                config_map_key_ref: Some(ConfigMapKeySelector {
                    name: Some(extension_config.to_owned()),
                    key: format!("whitelist.{}", browser_name.to_lowercase()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        args: Some(args),
        volume_mounts: Some(ext_mounts),
        ..Default::default()
    }]);
}

fn extension_mounts(family: ImageFamily, browser_name: &str) -> Vec<VolumeMount> {
    match browser_name {
        "firefox" => vec![
            mount(
                "plugins",
                &format!("{}/.mozilla/extensions", family.homedir()),
                None,
            ),
            mount("plugins", "/opt/firefox", None),
        ],
        "chrome" => vec![mount("plugins", "/opt/google/chrome/extensions", None)],
        _ => Vec::new(),
    }
}

/// Applies catalog scheduling overrides onto the assembled pod.
pub(crate) fn apply_pod_overrides(pod: &mut Pod, overrides: Option<&BrowserPodSpec>) {
    let Some(overrides) = overrides else {
        return;
    };
    let spec = pod.spec.get_or_insert_with(PodSpec::default);
    if !overrides.node_selector.is_empty() {
        spec.node_selector = Some(overrides.node_selector.clone());
    }
    if !overrides.node_name.is_empty() {
        spec.node_name = Some(overrides.node_name.clone());
    }
    spec.dns_policy = overrides.dns_policy.clone();
    spec.affinity = overrides.affinity.clone();
    if !overrides.host_aliases.is_empty() {
        spec.host_aliases = Some(overrides.host_aliases.clone());
    }
    if !overrides.tolerations.is_empty() {
        spec.tolerations = Some(overrides.tolerations.clone());
    }
    if !overrides.priority_class_name.is_empty() {
        spec.priority_class_name = Some(overrides.priority_class_name.clone());
    }
    spec.priority = overrides.priority;
    spec.active_deadline_seconds = overrides.active_deadline_seconds;
    spec.termination_grace_period_seconds = overrides.termination_grace_period_seconds;
    if !overrides.service_account_name.is_empty() {
        spec.service_account_name = Some(overrides.service_account_name.clone());
    }
    spec.dns_config = overrides.dns_config.clone();
}
