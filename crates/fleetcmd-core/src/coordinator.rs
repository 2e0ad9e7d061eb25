//! Fan-out coordination
//!
//! One independent task per target host; results stream back over a channel
//! and registry stats are recorded as each host finishes, so an interrupted
//! fan-out still reflects partial progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use fleetcmd_exec::keys::KeySource;
use fleetcmd_exec::pool::ConnectionPool;
use fleetcmd_exec::result::{ConnectionInfo, ExecutionResult, ExitStatus};
use fleetcmd_store::{AuthMethod, Host, HostRegistry, OutcomeSummary};

use crate::error::CoreError;
use crate::request::{ExecutionRequest, HostSelector};

/// Timeout knobs for one fan-out
#[derive(Debug, Clone)]
pub struct FanOutOptions {
    /// Per-host execution timeout, authoritative for each host
    pub command_timeout: Duration,
    /// Advisory whole-fan-out deadline; triggers cancellation when it
    /// expires instead of altering per-host semantics
    pub overall_deadline: Option<Duration>,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            overall_deadline: None,
        }
    }
}

/// Aggregate outcome of one fan-out
///
/// Contains exactly one result per deduplicated target, in first-seen
/// order, regardless of how many hosts failed.
#[derive(Debug)]
pub struct FanOutReport {
    /// The request this report answers
    pub request: ExecutionRequest,
    /// Per-host results in first-seen target order
    pub results: Vec<ExecutionResult>,
}

impl FanOutReport {
    /// Result for a specific host
    #[must_use]
    pub fn get(&self, host: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.host == host)
    }

    /// Whether every targeted host exited 0
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(ExecutionResult::success)
    }

    /// Counts for history recording and CLI rendering
    #[must_use]
    pub fn summary(&self) -> OutcomeSummary {
        let mut summary = OutcomeSummary {
            targets: self.results.len() as u32,
            ..OutcomeSummary::default()
        };
        for result in &self.results {
            match result.exit {
                ExitStatus::Exited(0) => summary.succeeded += 1,
                ExitStatus::Cancelled => summary.cancelled += 1,
                _ => summary.failed += 1,
            }
        }
        summary
    }
}

/// Map a registered host to its connection parameters
#[must_use]
pub fn connection_info(host: &Host) -> ConnectionInfo {
    let auth = match &host.auth {
        AuthMethod::KeyFile { path } => KeySource::File(path.clone()),
        AuthMethod::Secret { reference } => KeySource::Secret(reference.clone()),
        AuthMethod::Agent => KeySource::Agent,
    };
    ConnectionInfo::new(&host.name, &host.addr, &host.user)
        .with_port(host.port)
        .with_auth(auth)
}

/// Dispatches one command across many hosts concurrently
pub struct FanOutCoordinator {
    registry: Arc<HostRegistry>,
    pool: Arc<ConnectionPool>,
}

impl FanOutCoordinator {
    /// Create a coordinator over the given registry and pool
    pub fn new(registry: Arc<HostRegistry>, pool: Arc<ConnectionPool>) -> Self {
        Self { registry, pool }
    }

    /// Resolve a selector to concrete hosts
    ///
    /// # Errors
    /// `NotFound` for an unknown explicit name; `EmptySelection` when the
    /// selector matches nothing.
    pub async fn resolve(&self, selector: &HostSelector) -> Result<Vec<Host>, CoreError> {
        let hosts = match selector {
            HostSelector::Names(names) => {
                let mut hosts = Vec::with_capacity(names.len());
                for name in names {
                    hosts.push(self.registry.get(name).await?);
                }
                hosts
            }
            HostSelector::Tag(tag) => self.registry.list(Some(tag)).await,
        };
        if hosts.is_empty() {
            return Err(CoreError::EmptySelection);
        }
        Ok(hosts)
    }

    /// Fan a command out across the selected hosts
    ///
    /// Completes only when every dispatched host has reported (success,
    /// failure, timeout, or a cancellation marker). A failure on one host
    /// never delays or aborts the others.
    ///
    /// # Errors
    /// Only usage errors (`EmptySelection`, unknown names) and persistence
    /// errors fail the whole call.
    #[instrument(skip(self, selector, cancel), fields(command = %command))]
    pub async fn execute(
        &self,
        command: &str,
        selector: &HostSelector,
        opts: &FanOutOptions,
        cancel: CancellationToken,
    ) -> Result<FanOutReport, CoreError> {
        let hosts = self.resolve(selector).await?;
        let request = ExecutionRequest::new(
            command,
            hosts.iter().map(|h| h.name.clone()),
            opts.command_timeout,
        );

        // Index hosts by name after dedup
        let mut by_name: HashMap<String, Host> =
            hosts.into_iter().map(|h| (h.name.clone(), h)).collect();

        info!(targets = request.targets().len(), "dispatching fan-out");

        let token = cancel.child_token();
        let watchdog = opts.overall_deadline.map(|deadline| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(deadline = ?deadline, "overall fan-out deadline hit, cancelling");
                token.cancel();
            })
        });

        let (tx, mut rx) = mpsc::channel::<ExecutionResult>(request.targets().len());

        for name in request.targets() {
            let Some(host) = by_name.remove(name) else {
                continue;
            };
            let pool = self.pool.clone();
            let info = connection_info(&host);
            let command = command.to_string();
            let timeout = opts.command_timeout;
            let token = token.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let result = tokio::select! {
                    () = token.cancelled() => cancelled_marker(&info.name),
                    result = run_on_host(pool, &info, &command, timeout) => result,
                };
                // Receiver only closes once every sender is done
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut collected: HashMap<String, ExecutionResult> =
            HashMap::with_capacity(request.targets().len());

        while let Some(result) = rx.recv().await {
            // Cancelled hosts never ran to completion; they do not count
            // toward stats.
            if result.exit != ExitStatus::Cancelled {
                let latency_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX);
                if let Err(e) = self
                    .registry
                    .record_outcome(&result.host, result.exit.success(), latency_ms)
                    .await
                {
                    warn!(host = %result.host, error = %e, "failed to record outcome");
                }
            }
            debug!(host = %result.host, exit = %result.exit, "host completed");
            collected.insert(result.host.clone(), result);
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        let mut results = Vec::with_capacity(request.targets().len());
        for name in request.targets() {
            if let Some(result) = collected.remove(name) {
                results.push(result);
            }
        }

        let report = FanOutReport { request, results };
        info!(summary = %report.summary(), "fan-out complete");
        Ok(report)
    }
}

async fn run_on_host(
    pool: Arc<ConnectionPool>,
    info: &ConnectionInfo,
    command: &str,
    timeout: Duration,
) -> ExecutionResult {
    let started_at = Utc::now();
    let start = Instant::now();

    match pool.acquire(info).await {
        Ok(mut conn) => {
            let output = conn.run(command, timeout).await;
            pool.release(conn).await;
            ExecutionResult::from_output(&info.name, output)
        }
        Err(e) => {
            // Connection establishment failures become per-host data, not
            // fan-out failures.
            connection_error_result(&info.name, &e.to_string(), started_at, start.elapsed())
        }
    }
}

fn connection_error_result(
    host: &str,
    reason: &str,
    started_at: DateTime<Utc>,
    duration: Duration,
) -> ExecutionResult {
    ExecutionResult {
        host: host.to_string(),
        exit: ExitStatus::ConnectionError,
        stdout: String::new(),
        stderr: reason.to_string(),
        started_at,
        duration,
    }
}

fn cancelled_marker(host: &str) -> ExecutionResult {
    ExecutionResult {
        host: host.to_string(),
        exit: ExitStatus::Cancelled,
        stdout: String::new(),
        stderr: String::new(),
        started_at: Utc::now(),
        duration: Duration::ZERO,
    }
}
