//! Monitor configuration via `catchup.toml`
//!
//! Timeouts are turned into iteration budgets (`timeout / poll_interval`)
//! so that slow round-trips never stretch the effective timeout.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "catchup.toml";

/// Polling and timeout settings for recovery supervision
///
/// # Example
///
/// ```toml
/// poll_interval_ms = 1000
/// start_timeout_secs = 60
/// restart_timeout_secs = 60
/// reconnect_attempts = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between two status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long to wait for a recovery mechanism to show up
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    /// How long to wait for the target to come back after a restart
    #[serde(default = "default_restart_timeout_secs")]
    pub restart_timeout_secs: u64,
    /// Reconnect attempts after an unexpected connection loss
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_start_timeout_secs() -> u64 {
    60
}

fn default_restart_timeout_secs() -> u64 {
    60
}

fn default_reconnect_attempts() -> u32 {
    1
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            start_timeout_secs: default_start_timeout_secs(),
            restart_timeout_secs: default_restart_timeout_secs(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

impl MonitorConfig {
    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Recovery supervision settings
#
# Delay between status polls, in milliseconds
poll_interval_ms = 1000

# Seconds to wait for the recovery to start before reporting it as
# continuing in the background
start_timeout_secs = 60

# Seconds to wait for the target to come back after the restart that
# follows a full state transfer
restart_timeout_secs = 60

# Reconnect attempts after an unexpected connection loss
reconnect_attempts = 1
"#
    }

    /// Parse config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MonitorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `catchup.toml` from `dir`, writing the default file on first use
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            std::fs::write(&path, Self::default_toml())?;
        }
        Self::from_file(&path)
    }

    /// Reject settings the monitor cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be greater than 0".into()));
        }
        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Iterations allowed while waiting for the recovery to start
    pub fn start_iterations(&self) -> u64 {
        self.iterations(self.start_timeout_secs)
    }

    /// Iterations allowed while waiting for a restart to finish
    pub fn restart_iterations(&self) -> u64 {
        self.iterations(self.restart_timeout_secs)
    }

    fn iterations(&self, timeout_secs: u64) -> u64 {
        let interval = self.poll_interval_ms.max(1);
        (timeout_secs.saturating_mul(1000) / interval).max(1)
    }
}
