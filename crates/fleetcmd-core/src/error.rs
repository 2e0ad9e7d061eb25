//! Core error types

use thiserror::Error;

use fleetcmd_store::StoreError;

use crate::integrations::IntegrationError;

/// Errors that fail a whole coordinator operation
///
/// Per-host execution failures never appear here; they are data inside the
/// fan-out report.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Selector resolved to zero hosts
    #[error("selection matched no hosts")]
    EmptySelection,

    /// Registry or history store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Playbook integration failure
    #[error(transparent)]
    Integration(#[from] IntegrationError),
}
