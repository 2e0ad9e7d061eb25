//! Host records and per-host statistics

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the pool obtains credentials for a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum AuthMethod {
    /// Private key file on disk
    KeyFile {
        /// Path to the key (`~` allowed)
        path: PathBuf,
    },
    /// Reference into the external secret store
    Secret {
        /// Store lookup key
        reference: String,
    },
    /// Use the ssh-agent
    #[default]
    Agent,
}

/// Historical execution statistics for one host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostStats {
    /// Executions that exited 0
    #[serde(default)]
    pub success_count: u64,
    /// Executions that failed, timed out, or lost the connection
    #[serde(default)]
    pub failure_count: u64,
    /// Duration of the most recent execution, in milliseconds
    pub last_latency_ms: Option<u64>,
    /// When the host last completed an execution
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// A registered remote host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Unique user-chosen name (registry key)
    pub name: String,
    /// Hostname or IP for SSH
    pub addr: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// SSH user
    pub user: String,
    /// Credential source
    #[serde(default)]
    pub auth: AuthMethod,
    /// Tags for group selection
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the host was registered
    pub added_at: DateTime<Utc>,
    /// Execution statistics, mutated only through the registry
    #[serde(default)]
    pub stats: HostStats,
}

fn default_port() -> u16 {
    22
}

impl Host {
    /// Create a host record with defaults (port 22, agent auth, no tags)
    pub fn new(name: impl Into<String>, addr: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            port: 22,
            user: user.into(),
            auth: AuthMethod::default(),
            tags: Vec::new(),
            added_at: Utc::now(),
            stats: HostStats::default(),
        }
    }

    /// Set a custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the credential source
    #[must_use]
    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    /// Set tags
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Whether the host carries the given tag
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
