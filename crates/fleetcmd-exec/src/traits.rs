//! Executor and connector traits

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ExecError;
use crate::result::{ConnectionInfo, RunOutput};

/// A live session capable of running commands
///
/// `run` never fails with a transport error: timeouts and dropped
/// connections come back as sentinel statuses in [`RunOutput`], so the
/// coordinator can treat every host outcome uniformly.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run one command, enforcing `timeout` measured from command start
    async fn run(&mut self, cmd: &str, timeout: Duration) -> RunOutput;

    /// Whether the underlying transport is known broken and must be discarded
    fn is_broken(&self) -> bool;

    /// Close the session
    async fn close(&mut self);

    /// Short transport label for logs
    fn executor_type(&self) -> &'static str;
}

/// Establishes sessions for the connection pool
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open and authenticate a new session for the given host
    ///
    /// # Errors
    /// Returns `ExecError` attributed to the host on connect or auth failure.
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn RemoteExecutor>, ExecError>;
}
