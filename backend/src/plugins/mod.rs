//! Built-in proxy plugins.
//!
//! Weights place a plugin in the hook chain: the artifact collectors
//! (browser log, screenshot, command log) wrap the lifecycle plugins
//! (provision, session result) so they observe every command and persist
//! their files before the session record is cut.

pub mod browser_log;
pub mod command_log;
pub mod provision;
pub mod screenshot;
pub mod session_result;

use std::sync::Arc;

use crate::k8s::{Provisioner, ResultsRepository};
use crate::proxy::PluginOpts;
use crate::storage::SessionStorage;

/// The standard plugin set, in registration order.
pub fn default_plugins(
    provisioner: Arc<dyn Provisioner>,
    results: Arc<dyn ResultsRepository>,
    storage: Arc<dyn SessionStorage>,
) -> Vec<PluginOpts> {
    vec![
        provision::ProvisionPlugin::opts(provisioner.clone()),
        session_result::SessionResultPlugin::opts(results, storage.clone()),
        browser_log::BrowserLogPlugin::opts(provisioner, storage.clone()),
        screenshot::ScreenshotPlugin::opts(storage.clone()),
        command_log::CommandLogPlugin::opts(storage),
    ]
}
