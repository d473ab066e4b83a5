use std::time::Duration;

use clap::Parser;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("idle timeout {0} exceeds session timeout {1}")]
    IdleExceedsSession(String, String),
}

/// Sidecar configuration. The operator injects these as pod environment.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "BrowserKube sidecar proxy")]
pub struct SidecarOpts {
    /// Port the sidecar listens on.
    #[arg(long, env = "PORT", default_value_t = 9999)]
    pub port: u16,

    /// Base URL of the browser engine in this pod.
    #[arg(long, env = "PROXY_URL", default_value = "http://localhost:4444")]
    pub proxy_url: String,

    /// Base URL of the video recorder service in this pod.
    #[arg(long, env = "RECORDER_URL", default_value = "http://localhost:5555")]
    pub recorder_url: String,

    /// Home directory of the browser user; downloads and videos live here.
    #[arg(long, env = "BROWSER_HOME_DIR", default_value = "/home/user")]
    pub browser_home_dir: String,

    /// The session is closed after this long without a command.
    #[arg(
        long,
        env = "IDLE_TIMEOUT",
        default_value = "10m",
        value_parser = humantime::parse_duration
    )]
    pub idle_timeout: Duration,

    /// Hard cap on total session lifetime.
    #[arg(
        long,
        env = "SESSION_TIMEOUT",
        default_value = "1h",
        value_parser = humantime::parse_duration
    )]
    pub session_timeout: Duration,
}

impl SidecarOpts {
    /// An idle timeout longer than the session timeout could never fire,
    /// which means the configuration is wrong.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout > self.session_timeout {
            return Err(ConfigError::IdleExceedsSession(
                humantime::format_duration(self.idle_timeout).to_string(),
                humantime::format_duration(self.session_timeout).to_string(),
            ));
        }
        Ok(())
    }

    /// Engine base URL without a trailing slash.
    pub fn engine_base(&self) -> &str {
        self.proxy_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SidecarOpts::parse_from(["sidecar"]);
        assert_eq!(opts.port, 9999);
        assert_eq!(opts.proxy_url, "http://localhost:4444");
        assert_eq!(opts.idle_timeout, Duration::from_secs(600));
        assert_eq!(opts.session_timeout, Duration::from_secs(3600));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_idle_longer_than_session_is_rejected() {
        let opts = SidecarOpts::parse_from([
            "sidecar",
            "--idle-timeout",
            "2h",
            "--session-timeout",
            "1h",
        ]);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_engine_base_trims_trailing_slash() {
        let opts =
            SidecarOpts::parse_from(["sidecar", "--proxy-url", "http://localhost:4444/wd/hub/"]);
        assert_eq!(opts.engine_base(), "http://localhost:4444/wd/hub");
    }
}
