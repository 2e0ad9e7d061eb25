//! Result and connection parameter types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::KeySource;

/// Outcome of a single command execution
///
/// Every execution produces one of these, including timeouts and dropped
/// connections. A literal remote exit code only appears in `Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "code", rename_all = "kebab-case")]
pub enum ExitStatus {
    /// Normal process exit with the given code
    Exited(i32),
    /// Command exceeded its per-execution timeout
    #[serde(rename = "timeout")]
    TimedOut,
    /// Transport failed before an exit status was reported
    ConnectionError,
    /// Execution was cancelled before completion
    Cancelled,
}

impl ExitStatus {
    /// Whether this counts as a success (exit code 0)
    #[must_use]
    pub fn success(self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit {code}"),
            ExitStatus::TimedOut => write!(f, "timeout"),
            ExitStatus::ConnectionError => write!(f, "connection-error"),
            ExitStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Raw output of one command run on one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    /// Exit status or sentinel
    pub exit: ExitStatus,
    /// Collected stdout (possibly partial on timeout, capped)
    pub stdout: String,
    /// Collected stderr (possibly partial on timeout, capped)
    pub stderr: String,
    /// When the command was started
    pub started_at: DateTime<Utc>,
    /// Wall-clock time the command ran for
    pub duration: Duration,
}

impl RunOutput {
    /// Build a sentinel output carrying whatever was collected so far
    #[must_use]
    pub fn sentinel(
        exit: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            exit,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            started_at,
            duration,
        }
    }
}

/// Per-host result as reported by a fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Name of the host this result belongs to
    pub host: String,
    /// Exit status or sentinel
    pub exit: ExitStatus,
    /// Collected stdout
    pub stdout: String,
    /// Collected stderr
    pub stderr: String,
    /// When the command was started on this host
    pub started_at: DateTime<Utc>,
    /// Wall-clock time the command ran for
    pub duration: Duration,
}

impl ExecutionResult {
    /// Attach a host name to a raw run output
    #[must_use]
    pub fn from_output(host: impl Into<String>, output: RunOutput) -> Self {
        Self {
            host: host.into(),
            exit: output.exit,
            stdout: output.stdout,
            stderr: output.stderr,
            started_at: output.started_at,
            duration: output.duration,
        }
    }

    /// Whether the remote command exited with code 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

/// Connection parameters for one host
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Registry name (pool slot key)
    pub name: String,
    /// Host address (hostname or IP)
    pub addr: String,
    /// SSH port
    pub port: u16,
    /// Username
    pub user: String,
    /// How to obtain credentials
    pub auth: KeySource,
}

impl ConnectionInfo {
    /// Create connection info with defaults (port 22, ssh-agent auth)
    pub fn new(
        name: impl Into<String>,
        addr: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            port: 22,
            user: user.into(),
            auth: KeySource::Agent,
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
    pub fn with_auth(mut self, auth: KeySource) -> Self {
        self.auth = auth;
        self
    }
}
