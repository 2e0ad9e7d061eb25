//! fleetcmd-exec: Remote execution and connection pooling
//!
//! Provides the SSH transport (via russh), a per-host connection pool, and
//! the executor traits the coordinator fans out over.

pub mod error;
pub mod keys;
pub mod local;
pub mod pool;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use keys::{EnvSecretStore, KeySource, SecretStore};
pub use pool::{ConnState, ConnectionPool, PoolConfig, PooledConnection};
pub use result::{ConnectionInfo, ExecutionResult, ExitStatus, RunOutput};
pub use traits::{Connector, RemoteExecutor};
