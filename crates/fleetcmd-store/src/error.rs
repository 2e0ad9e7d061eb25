//! Error types for fleetcmd-store

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the registry and history stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// A host with this name is already registered
    #[error("host already exists: {0}")]
    DuplicateHost(String),

    /// No host registered under this name
    #[error("host not found: {0}")]
    NotFound(String),

    /// Store file exists but cannot be parsed; never treated as empty
    #[error("store file {path} is corrupt: {reason}")]
    Corrupt {
        /// File that failed to parse
        path: PathBuf,
        /// Parse failure detail
        reason: String,
    },

    /// Store file was written by an incompatible schema version
    #[error("store file {path} has unsupported version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// File carrying the version tag
        path: PathBuf,
        /// Version found in the file
        found: u32,
        /// Highest version this build reads
        supported: u32,
    },

    /// Filesystem failure reading or writing a store file
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}
