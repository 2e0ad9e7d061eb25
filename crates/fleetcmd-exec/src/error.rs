//! Error types for fleetcmd-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while establishing or managing connections
///
/// Mid-command failures (timeout, dropped transport) are not errors: they
/// are reported as sentinel statuses inside [`crate::result::RunOutput`].
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to connect to remote host
    #[error("connection to {host} failed: {reason}")]
    ConnectionFailed {
        /// Host name the attempt was for
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// Connect attempt exceeded its bounded timeout
    #[error("connection to {host} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Host name the attempt was for
        host: String,
        /// Connect timeout that was exceeded
        timeout: Duration,
    },

    /// Authentication rejected by the remote host
    #[error("authentication for {host} failed: {reason}")]
    AuthenticationFailed {
        /// Host name the attempt was for
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// SSH key or credential resolution error
    #[error("key error for {host}: {reason}")]
    Key {
        /// Host name the key was resolved for
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// Connection pool has been shut down
    #[error("connection pool is closed")]
    PoolClosed,
}

impl ExecError {
    /// Host name this error is attributed to, if any
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        match self {
            ExecError::ConnectionFailed { host, .. }
            | ExecError::ConnectTimeout { host, .. }
            | ExecError::AuthenticationFailed { host, .. }
            | ExecError::Key { host, .. } => Some(host),
            ExecError::PoolClosed => None,
        }
    }
}
