use std::time::Duration;

use clap::Parser;

/// Backend configuration, read from flags or environment.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "BrowserKube backend")]
pub struct BackendOpts {
    /// Port the backend listens on.
    #[arg(long, env = "PORT", default_value_t = 4444)]
    pub port: u16,

    /// Namespace browsers are provisioned in.
    #[arg(long, env = "NAMESPACE", default_value = "browserkube")]
    pub namespace: String,

    /// Session artifact storage URL. Only file:// is supported.
    #[arg(
        long,
        env = "STORAGE_URL",
        default_value = "file:///var/lib/browserkube/sessions"
    )]
    pub storage_url: String,

    /// How long to wait for a provisioned browser to reach Running.
    #[arg(
        long,
        env = "PROVISION_TIMEOUT",
        default_value = "1m",
        value_parser = humantime::parse_duration
    )]
    pub provision_timeout: Duration,

    /// Default batch window for the /api/events stream.
    #[arg(
        long,
        env = "EVENTS_BATCH_WINDOW",
        default_value = "500ms",
        value_parser = humantime::parse_duration
    )]
    pub events_window: Duration,
}
