//! Durable host registry
//!
//! In-memory map of `Arc<Mutex<Host>>` entries behind an `RwLock`: stat
//! updates lock only their own host, so concurrent fan-outs against
//! different hosts never serialize on each other. Every mutation is written
//! through to disk before it returns.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::SCHEMA_VERSION;
use crate::error::StoreError;
use crate::host::Host;

#[derive(Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    hosts: BTreeMap<String, Host>,
}

/// Process-wide registry of known hosts
///
/// Owned exclusively by the application root and injected into the
/// coordinator; hosts are only ever mutated through this type.
#[derive(Debug)]
pub struct HostRegistry {
    path: PathBuf,
    hosts: RwLock<HashMap<String, Arc<Mutex<Host>>>>,
    // Serializes snapshot-and-write cycles so a slow write cannot be
    // overtaken by a newer one
    persist: Mutex<()>,
}

impl HostRegistry {
    /// Load the registry from `path`, creating an empty one if absent
    ///
    /// # Errors
    /// Fails closed with `Corrupt` or `UnsupportedVersion` when the file
    /// exists but cannot be trusted; a missing file is not an error.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let hosts = if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err(&path, e))?
        {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_err(&path, e))?;
            let file: RegistryFile =
                serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            if file.version > SCHEMA_VERSION {
                return Err(StoreError::UnsupportedVersion {
                    path,
                    found: file.version,
                    supported: SCHEMA_VERSION,
                });
            }
            info!(hosts = file.hosts.len(), "loaded host registry");
            file.hosts
                .into_iter()
                .map(|(name, host)| (name, Arc::new(Mutex::new(host))))
                .collect()
        } else {
            info!("no registry file, starting empty");
            HashMap::new()
        };

        Ok(Self {
            path,
            hosts: RwLock::new(hosts),
            persist: Mutex::new(()),
        })
    }

    /// Register a new host
    ///
    /// # Errors
    /// `DuplicateHost` if the name is taken; the existing entry is retained.
    #[instrument(skip(self, host), fields(host = %host.name))]
    pub async fn add(&self, host: Host) -> Result<(), StoreError> {
        {
            let mut hosts = self.hosts.write().await;
            if hosts.contains_key(&host.name) {
                return Err(StoreError::DuplicateHost(host.name));
            }
            info!(host = %host.name, addr = %host.addr, "host added");
            hosts.insert(host.name.clone(), Arc::new(Mutex::new(host)));
        }
        self.save().await
    }

    /// Remove a host by name
    ///
    /// # Errors
    /// `NotFound` if no host has this name.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        {
            let mut hosts = self.hosts.write().await;
            if hosts.remove(name).is_none() {
                return Err(StoreError::NotFound(name.to_string()));
            }
            info!(host = %name, "host removed");
        }
        self.save().await
    }

    /// Look up a host by name
    ///
    /// # Errors
    /// `NotFound` if no host has this name.
    pub async fn get(&self, name: &str) -> Result<Host, StoreError> {
        let entry = {
            let hosts = self.hosts.read().await;
            hosts
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?
        };
        let host = entry.lock().await;
        Ok(host.clone())
    }

    /// Snapshot of hosts, optionally filtered by tag, ordered by name
    ///
    /// Repeated calls with no intervening mutation return identical sets.
    pub async fn list(&self, tag: Option<&str>) -> Vec<Host> {
        let entries: Vec<Arc<Mutex<Host>>> = {
            let hosts = self.hosts.read().await;
            hosts.values().cloned().collect()
        };

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let host = entry.lock().await;
            if tag.is_none_or(|t| host.has_tag(t)) {
                out.push(host.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Record one execution outcome for a host
    ///
    /// The single mutation path for stats: increments exactly one counter
    /// and refreshes latency/last-seen, safe under concurrent callers.
    ///
    /// # Errors
    /// `NotFound` if the host was removed mid-flight.
    #[instrument(skip(self))]
    pub async fn record_outcome(
        &self,
        name: &str,
        success: bool,
        latency_ms: u64,
    ) -> Result<(), StoreError> {
        let entry = {
            let hosts = self.hosts.read().await;
            hosts
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?
        };

        {
            let mut host = entry.lock().await;
            if success {
                host.stats.success_count += 1;
            } else {
                host.stats.failure_count += 1;
            }
            host.stats.last_latency_ms = Some(latency_ms);
            host.stats.last_seen_at = Some(Utc::now());
            debug!(
                host = %name,
                success,
                latency_ms,
                successes = host.stats.success_count,
                failures = host.stats.failure_count,
                "recorded outcome"
            );
        }

        self.save().await
    }

    /// Number of registered hosts
    pub async fn len(&self) -> usize {
        self.hosts.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.hosts.read().await.is_empty()
    }

    /// Write the registry through to disk (temp file + rename)
    async fn save(&self) -> Result<(), StoreError> {
        let _guard = self.persist.lock().await;

        let mut snapshot = BTreeMap::new();
        let entries: Vec<(String, Arc<Mutex<Host>>)> = {
            let hosts = self.hosts.read().await;
            hosts.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (name, entry) in entries {
            let host = entry.lock().await;
            snapshot.insert(name, host.clone());
        }

        let file = RegistryFile {
            version: SCHEMA_VERSION,
            hosts: snapshot,
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        write_atomic(&self.path, &json).await
    }
}

pub(crate) async fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(path, e))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| io_err(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_err(path, e))?;
    Ok(())
}

pub(crate) fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AuthMethod;

    fn temp_registry_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.json");
        (dir, path)
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let (_dir, path) = temp_registry_path();
        let registry = HostRegistry::load_or_create(&path).await.unwrap();

        registry
            .add(Host::new("web1", "10.0.0.1", "deploy"))
            .await
            .unwrap();

        let host = registry.get("web1").await.unwrap();
        assert_eq!(host.addr, "10.0.0.1");

        registry.remove("web1").await.unwrap();
        assert!(matches!(
            registry.get("web1").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_add_retains_original() {
        let (_dir, path) = temp_registry_path();
        let registry = HostRegistry::load_or_create(&path).await.unwrap();

        registry
            .add(Host::new("server1", "1.2.3.4", "admin"))
            .await
            .unwrap();
        let err = registry
            .add(Host::new("server1", "5.6.7.8", "root"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateHost(_)));
        let host = registry.get("server1").await.unwrap();
        assert_eq!(host.addr, "1.2.3.4");
        assert_eq!(host.user, "admin");
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let (_dir, path) = temp_registry_path();
        let registry = HostRegistry::load_or_create(&path).await.unwrap();
        assert!(matches!(
            registry.remove("ghost").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_tag_and_is_idempotent() {
        let (_dir, path) = temp_registry_path();
        let registry = HostRegistry::load_or_create(&path).await.unwrap();

        registry
            .add(Host::new("web1", "10.0.0.1", "deploy").with_tags(vec!["prod".into()]))
            .await
            .unwrap();
        registry
            .add(Host::new("db1", "10.0.0.2", "deploy").with_tags(vec!["prod".into(), "db".into()]))
            .await
            .unwrap();
        registry
            .add(Host::new("dev1", "10.0.1.1", "deploy").with_tags(vec!["dev".into()]))
            .await
            .unwrap();

        let prod = registry.list(Some("prod")).await;
        assert_eq!(
            prod.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(),
            vec!["db1", "web1"]
        );

        let first = registry.list(None).await;
        let second = registry.list(None).await;
        assert_eq!(first.len(), 3);
        assert_eq!(
            first.iter().map(|h| h.name.clone()).collect::<Vec<_>>(),
            second.iter().map(|h| h.name.clone()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let (_dir, path) = temp_registry_path();
        {
            let registry = HostRegistry::load_or_create(&path).await.unwrap();
            registry
                .add(
                    Host::new("web1", "10.0.0.1", "deploy").with_auth(AuthMethod::Secret {
                        reference: "web1-key".into(),
                    }),
                )
                .await
                .unwrap();
            registry.record_outcome("web1", true, 42).await.unwrap();
        }

        let reloaded = HostRegistry::load_or_create(&path).await.unwrap();
        let host = reloaded.get("web1").await.unwrap();
        assert_eq!(host.stats.success_count, 1);
        assert_eq!(host.stats.last_latency_ms, Some(42));
        assert!(matches!(host.auth, AuthMethod::Secret { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_closed() {
        let (_dir, path) = temp_registry_path();
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = HostRegistry::load_or_create(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_future_version_fails_closed() {
        let (_dir, path) = temp_registry_path();
        tokio::fs::write(&path, r#"{"version": 99, "hosts": {}}"#)
            .await
            .unwrap();

        let err = HostRegistry::load_or_create(&path).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_outcomes_never_lose_counts() {
        let (_dir, path) = temp_registry_path();
        let registry = Arc::new(HostRegistry::load_or_create(&path).await.unwrap());
        registry
            .add(Host::new("web1", "10.0.0.1", "deploy"))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..4 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    registry
                        .record_outcome("web1", i % 2 == 0, 10)
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let host = registry.get("web1").await.unwrap();
        assert_eq!(host.stats.success_count + host.stats.failure_count, 100);
        assert_eq!(host.stats.success_count, 50);
    }
}
