//! fleetcmd-store: Durable host registry and command history
//!
//! Both stores persist as single versioned JSON documents under the per-user
//! config directory and fail closed on corrupt or incompatible files.

pub mod error;
pub mod history;
pub mod host;
pub mod registry;

pub use error::StoreError;
pub use history::{CommandKind, HistoryEntry, HistoryLog, OutcomeSummary};
pub use host::{AuthMethod, Host, HostStats};
pub use registry::HostRegistry;

/// Version tag written into every persisted document
pub const SCHEMA_VERSION: u32 = 1;
