//! Configuration loading and well-known paths

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleetcmd_core::FanOutOptions;
use fleetcmd_exec::pool::PoolConfig;

/// Top-level configuration for the fleetcmd CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Execution and pooling settings
    #[serde(default)]
    pub exec: ExecConfig,
    /// History settings
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Execution and pooling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Per-host command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// SSH connect timeout in seconds, distinct from the command timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Idle SSH sessions older than this are closed
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
    /// Concurrent sessions allowed per host
    #[serde(default = "default_sessions_per_host")]
    pub sessions_per_host: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            idle_ttl_secs: default_idle_ttl(),
            sessions_per_host: default_sessions_per_host(),
        }
    }
}

/// History settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Whether a fan-out where every host failed still writes an entry
    #[serde(default = "default_true")]
    pub record_failed_fanout: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            record_failed_fanout: default_true(),
        }
    }
}

fn default_command_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_ttl() -> u64 {
    300
}

fn default_sessions_per_host() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from an explicit path
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &PathBuf) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `FLEETCMD_CONFIG`, the default location, or fall back to
    /// defaults when no file exists
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var("FLEETCMD_CONFIG") {
            return Self::load(&PathBuf::from(path));
        }

        let path = state_dir().join("config.toml");
        if path.exists() {
            return Self::load(&path);
        }

        tracing::debug!("no config file found, using defaults");
        Ok(Config::default())
    }

    /// Pool settings derived from config
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            connect_timeout: Duration::from_secs(self.exec.connect_timeout_secs),
            idle_ttl: Duration::from_secs(self.exec.idle_ttl_secs),
            sessions_per_host: self.exec.sessions_per_host.max(1),
        }
    }

    /// Fan-out options, with optional CLI overrides
    #[must_use]
    pub fn fanout_options(
        &self,
        timeout_secs: Option<u64>,
        deadline_secs: Option<u64>,
    ) -> FanOutOptions {
        FanOutOptions {
            command_timeout: Duration::from_secs(
                timeout_secs.unwrap_or(self.exec.command_timeout_secs),
            ),
            overall_deadline: deadline_secs.map(Duration::from_secs),
        }
    }
}

/// Per-user state directory holding config, registry, and history
///
/// Overridable via `FLEETCMD_HOME` (used by tests and scripting).
#[must_use]
pub fn state_dir() -> PathBuf {
    if let Ok(home) = std::env::var("FLEETCMD_HOME") {
        return PathBuf::from(home);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetcmd")
}

/// Registry store location
#[must_use]
pub fn hosts_path() -> PathBuf {
    state_dir().join("hosts.json")
}

/// History store location
#[must_use]
pub fn history_path() -> PathBuf {
    state_dir().join("history.json")
}

/// Where generated playbook artifacts land
#[must_use]
pub fn playbooks_dir() -> PathBuf {
    state_dir().join("playbooks")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.exec.command_timeout_secs, 30);
        assert_eq!(config.exec.sessions_per_host, 1);
        assert!(config.history.record_failed_fanout);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str("[exec]\ncommand_timeout_secs = 5\n").unwrap();
        assert_eq!(config.exec.command_timeout_secs, 5);
        assert_eq!(config.exec.connect_timeout_secs, 10);
        assert!(config.history.record_failed_fanout);
    }
}
