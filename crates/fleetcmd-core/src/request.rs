//! Execution request and host selection types

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// How the caller names its targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSelector {
    /// Explicit host names; unknown names are usage errors
    Names(Vec<String>),
    /// All hosts carrying this tag
    Tag(String),
}

/// A submitted fan-out request
///
/// Targets are deduplicated by name preserving first-seen order; the
/// request is immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    command: String,
    targets: Vec<String>,
    timeout: Duration,
    issued_at: DateTime<Utc>,
}

impl ExecutionRequest {
    /// Build a request, collapsing duplicate targets
    pub fn new(
        command: impl Into<String>,
        targets: impl IntoIterator<Item = String>,
        timeout: Duration,
    ) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .collect();
        Self {
            command: command.into(),
            targets,
            timeout,
            issued_at: Utc::now(),
        }
    }

    /// Literal command text
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Deduplicated targets in first-seen order
    #[must_use]
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Per-host execution timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When the request was submitted
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_collapse_preserving_first_seen_order() {
        let request = ExecutionRequest::new(
            "uptime",
            ["b", "a", "b", "c", "a"].map(String::from),
            Duration::from_secs(30),
        );
        assert_eq!(request.targets(), ["b", "a", "c"]);
    }
}
