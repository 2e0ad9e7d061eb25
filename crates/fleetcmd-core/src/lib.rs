//! fleetcmd-core: Fan-out coordination
//!
//! Dispatches one logical command concurrently across registered hosts,
//! aggregates per-host results without ever dropping a host, and feeds
//! outcomes back into the registry as they arrive.

pub mod coordinator;
pub mod error;
pub mod integrations;
pub mod request;
pub mod translate;

pub use coordinator::{FanOutCoordinator, FanOutOptions, FanOutReport, connection_info};
pub use error::CoreError;
pub use integrations::{IntegrationError, IntegrationSet, PlaybookIntegration};
pub use request::{ExecutionRequest, HostSelector};
pub use translate::{CommandTranslator, StaticTranslator, TranslateError, Translation};
