//! Ansible playbook generation
//!
//! Emits a JSON inventory and playbook; JSON is a YAML subset, so both are
//! directly consumable by ansible-playbook.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::info;

use fleetcmd_store::{AuthMethod, Host};

use super::{IntegrationError, PlaybookIntegration};

/// Inventory group all targets land in
const GROUP_NAME: &str = "targets";

/// Generates Ansible inventory + playbook artifacts
#[derive(Debug, Default)]
pub struct AnsibleIntegration;

impl AnsibleIntegration {
    /// Create the integration
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn inventory(hosts: &[Host]) -> Value {
        let mut entries = Map::new();
        for host in hosts {
            let mut vars = Map::new();
            vars.insert("ansible_host".into(), json!(host.addr));
            vars.insert("ansible_user".into(), json!(host.user));
            vars.insert("ansible_port".into(), json!(host.port));
            if let AuthMethod::KeyFile { path } = &host.auth {
                vars.insert(
                    "ansible_ssh_private_key_file".into(),
                    json!(path.display().to_string()),
                );
            }
            entries.insert(host.name.clone(), Value::Object(vars));
        }
        json!({ GROUP_NAME: { "hosts": Value::Object(entries) } })
    }

    fn playbook(command: &str) -> Value {
        json!([{
            "name": "fleetcmd generated playbook",
            "hosts": GROUP_NAME,
            "gather_facts": false,
            "tasks": [{
                "name": "run command",
                "ansible.builtin.shell": command,
            }],
        }])
    }
}

#[async_trait]
impl PlaybookIntegration for AnsibleIntegration {
    fn name(&self) -> &'static str {
        "ansible"
    }

    async fn generate(
        &self,
        command: &str,
        hosts: &[Host],
        out_dir: &Path,
    ) -> Result<PathBuf, IntegrationError> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| IntegrationError::Io {
                path: out_dir.to_path_buf(),
                source: e,
            })?;

        let inventory_path = out_dir.join(format!("inventory_{stamp}.json"));
        let inventory = serde_json::to_string_pretty(&Self::inventory(hosts))?;
        tokio::fs::write(&inventory_path, inventory)
            .await
            .map_err(|e| IntegrationError::Io {
                path: inventory_path.clone(),
                source: e,
            })?;

        let playbook_path = out_dir.join(format!("playbook_{stamp}.json"));
        let playbook = serde_json::to_string_pretty(&Self::playbook(command))?;
        tokio::fs::write(&playbook_path, playbook)
            .await
            .map_err(|e| IntegrationError::Io {
                path: playbook_path.clone(),
                source: e,
            })?;

        info!(
            inventory = %inventory_path.display(),
            playbook = %playbook_path.display(),
            hosts = hosts.len(),
            "generated ansible artifacts"
        );

        Ok(playbook_path)
    }
}
