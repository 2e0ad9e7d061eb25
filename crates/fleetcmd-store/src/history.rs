//! Append-only command history
//!
//! Entries are never mutated; the only removal path is the explicit prune
//! operation. The append lock makes each entry durable before the next one
//! for the session is accepted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::SCHEMA_VERSION;
use crate::error::StoreError;
use crate::registry::{io_err, write_atomic};

/// What kind of command an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    /// Ran on the local machine
    Local,
    /// Ran on exactly one remote host
    RemoteSingle,
    /// Fanned out across multiple remote hosts
    RemoteFanout,
}

/// Aggregate outcome of one executed command
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutcomeSummary {
    /// Deduplicated target count (1 for local commands)
    pub targets: u32,
    /// Hosts that exited 0
    pub succeeded: u32,
    /// Hosts that failed, timed out, or lost the connection
    pub failed: u32,
    /// Hosts cancelled before completing
    pub cancelled: u32,
}

impl std::fmt::Display for OutcomeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} ok, {} failed, {} cancelled",
            self.succeeded, self.targets, self.failed, self.cancelled
        )
    }
}

/// One history record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the command was issued
    pub timestamp: DateTime<Utc>,
    /// Literal command text
    pub command: String,
    /// Local, single-remote, or fan-out
    pub kind: CommandKind,
    /// Aggregate outcome
    pub summary: OutcomeSummary,
}

#[derive(Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    entries: Vec<HistoryEntry>,
}

/// Durable append-only history log
pub struct HistoryLog {
    path: PathBuf,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl HistoryLog {
    /// Load the log from `path`, creating an empty one if absent
    ///
    /// # Errors
    /// Fails closed on corrupt or future-versioned files.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let entries = if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err(&path, e))?
        {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_err(&path, e))?;
            let file: HistoryFile =
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
            file.entries
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Append an entry, durable before this call returns
    ///
    /// # Errors
    /// Returns `StoreError` if the write-through fails.
    pub async fn append(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        // Holding the lock across the write preserves append ordering
        let mut entries = self.entries.lock().await;
        entries.push(entry);
        self.save(&entries).await
    }

    /// Entries in reverse-chronological order
    ///
    /// `limit` bounds the count; `since` drops entries at or before the
    /// given instant.
    pub async fn list(
        &self,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<HistoryEntry> {
        let entries = self.entries.lock().await;
        let mut out: Vec<HistoryEntry> = entries
            .iter()
            .filter(|e| since.is_none_or(|s| e.timestamp > s))
            .cloned()
            .collect();
        out.reverse();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    /// Drop all but the newest `keep` entries, returning how many were removed
    ///
    /// # Errors
    /// Returns `StoreError` if the write-through fails.
    #[instrument(skip(self))]
    pub async fn prune(&self, keep: usize) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().await;
        let removed = entries.len().saturating_sub(keep);
        if removed > 0 {
            entries.drain(..removed);
            self.save(&entries).await?;
            info!(removed, kept = entries.len(), "pruned history");
        }
        Ok(removed)
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the log is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn save(&self, entries: &[HistoryEntry]) -> Result<(), StoreError> {
        let file = HistoryFile {
            version: SCHEMA_VERSION,
            entries: entries.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, &json).await
    }
}
