//! Playbook integrations
//!
//! Each integration is a capability behind one trait, registered by name.
//! The core never branches on integration identity beyond this dispatch.

pub mod ansible;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use fleetcmd_store::Host;

pub use ansible::AnsibleIntegration;

/// Integration failures
#[derive(Error, Debug)]
pub enum IntegrationError {
    /// No integration registered under this name
    #[error("unknown integration: {0}")]
    Unknown(String),

    /// Artifact could not be written
    #[error("failed to write artifact {path}: {source}")]
    Io {
        /// Target path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Artifact could not be serialized
    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A playbook/automation generator for one tool
#[async_trait]
pub trait PlaybookIntegration: Send + Sync {
    /// Registered dispatch name
    fn name(&self) -> &'static str;

    /// Emit a playbook artifact for the command and resolved host list,
    /// returning the path of the generated entry point
    ///
    /// # Errors
    /// Returns `IntegrationError` if the artifact cannot be produced.
    async fn generate(
        &self,
        command: &str,
        hosts: &[Host],
        out_dir: &Path,
    ) -> Result<PathBuf, IntegrationError>;
}

/// Name-keyed set of registered integrations
#[derive(Default)]
pub struct IntegrationSet {
    integrations: HashMap<&'static str, Arc<dyn PlaybookIntegration>>,
}

impl IntegrationSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set with the built-in integrations registered
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut set = Self::new();
        set.register(Arc::new(AnsibleIntegration::new()));
        set
    }

    /// Register an integration under its own name
    pub fn register(&mut self, integration: Arc<dyn PlaybookIntegration>) {
        self.integrations.insert(integration.name(), integration);
    }

    /// Look up an integration by name
    ///
    /// # Errors
    /// `Unknown` if nothing is registered under the name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn PlaybookIntegration>, IntegrationError> {
        self.integrations
            .get(name)
            .cloned()
            .ok_or_else(|| IntegrationError::Unknown(name.to_string()))
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.integrations.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
