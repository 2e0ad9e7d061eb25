//! Local command execution using `tokio::process`

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::result::{ExitStatus, RunOutput};
use crate::ssh::DEFAULT_MAX_OUTPUT_BYTES;
use crate::traits::RemoteExecutor;

/// Local command executor
///
/// Runs commands on the local machine through `sh -c`, with the same
/// sentinel-status semantics as the SSH transport.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    max_output_bytes: usize,
}

impl LocalExecutor {
    /// Create a new local executor
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Override the per-stream output cap
    #[must_use]
    pub fn with_max_output_bytes(mut self, cap: usize) -> Self {
        self.max_output_bytes = cap;
        self
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    #[instrument(skip(self, cmd), level = "debug")]
    async fn run(&mut self, cmd: &str, timeout: Duration) -> RunOutput {
        let started_at = Utc::now();
        let start = Instant::now();

        debug!(command = %cmd, timeout = ?timeout, "executing local command");

        // Use shell to support pipes, redirections, etc.
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!(command = %cmd, error = %e, "failed to spawn process");
                return RunOutput::sentinel(
                    ExitStatus::ConnectionError,
                    Vec::new(),
                    e.to_string().into_bytes(),
                    started_at,
                    start.elapsed(),
                );
            }
        };

        // Readers write into shared buffers so partial output survives a
        // timeout.
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));

        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(read_capped(pipe, stdout_buf.clone(), self.max_output_bytes)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(read_capped(pipe, stderr_buf.clone(), self.max_output_bytes)));

        let status = tokio::time::timeout(timeout, child.wait()).await;

        let exit = match status {
            Ok(Ok(status)) => ExitStatus::Exited(status.code().unwrap_or(-1)),
            Ok(Err(e)) => {
                error!(command = %cmd, error = %e, "failed waiting on process");
                ExitStatus::ConnectionError
            }
            Err(_) => {
                error!(command = %cmd, elapsed = ?start.elapsed(), "local command timed out");
                let _ = child.start_kill();
                ExitStatus::TimedOut
            }
        };

        // On normal exit let the readers drain; on timeout take what exists.
        if matches!(exit, ExitStatus::Exited(_)) {
            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }
        }

        let stdout = std::mem::take(&mut *stdout_buf.lock().unwrap_or_else(|e| e.into_inner()));
        let stderr = std::mem::take(&mut *stderr_buf.lock().unwrap_or_else(|e| e.into_inner()));

        RunOutput::sentinel(exit, stdout, stderr, started_at, start.elapsed())
    }

    fn is_broken(&self) -> bool {
        false
    }

    async fn close(&mut self) {}

    fn executor_type(&self) -> &'static str {
        "local"
    }
}

async fn read_capped<R: tokio::io::AsyncRead + Unpin>(
    mut pipe: R,
    buf: Arc<Mutex<Vec<u8>>>,
    cap: usize,
) {
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut guard = buf.lock().unwrap_or_else(|e| e.into_inner());
                let room = cap.saturating_sub(guard.len());
                guard.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_success() {
        let mut executor = LocalExecutor::new();
        let result = executor.run("echo hello", Duration::from_secs(5)).await;

        assert_eq!(result.exit, ExitStatus::Exited(0));
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_failure() {
        let mut executor = LocalExecutor::new();
        let result = executor.run("exit 42", Duration::from_secs(5)).await;

        assert_eq!(result.exit, ExitStatus::Exited(42));
    }

    #[tokio::test]
    async fn test_run_timeout_returns_partial_output() {
        let mut executor = LocalExecutor::new();
        let start = Instant::now();
        let result = executor
            .run("echo started; sleep 5", Duration::from_millis(200))
            .await;

        assert_eq!(result.exit, ExitStatus::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(result.stdout.trim(), "started");
    }

    #[tokio::test]
    async fn test_run_with_stderr() {
        let mut executor = LocalExecutor::new();
        let result = executor.run("echo error >&2", Duration::from_secs(5)).await;

        assert_eq!(result.exit, ExitStatus::Exited(0));
        assert_eq!(result.stderr.trim(), "error");
    }

    #[tokio::test]
    async fn test_output_cap() {
        let mut executor = LocalExecutor::new().with_max_output_bytes(16);
        let result = executor
            .run("yes x | head -n 1000", Duration::from_secs(5))
            .await;

        assert_eq!(result.exit, ExitStatus::Exited(0));
        assert!(result.stdout.len() <= 16);
    }
}
