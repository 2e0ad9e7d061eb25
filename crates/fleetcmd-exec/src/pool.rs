//! Per-host SSH connection pool
//!
//! One slot per host; a slot serializes access through a semaphore sized by
//! `sessions_per_host` (default 1), so concurrent commands against the same
//! host queue while different hosts connect and run independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::result::{ConnectionInfo, RunOutput};
use crate::traits::{Connector, RemoteExecutor};

/// Observable state of a host's connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

/// Pool tuning knobs
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Bounded timeout for a connect attempt, distinct from command timeouts
    pub connect_timeout: Duration,
    /// Idle sessions older than this are proactively closed
    pub idle_ttl: Duration,
    /// Live sessions allowed per host
    pub sessions_per_host: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_ttl: Duration::from_secs(300),
            sessions_per_host: 1,
        }
    }
}

struct IdleSession {
    exec: Box<dyn RemoteExecutor>,
    since: Instant,
}

struct SlotInner {
    idle: Vec<IdleSession>,
    state: ConnState,
}

struct HostSlot {
    permits: Arc<Semaphore>,
    inner: Mutex<SlotInner>,
}

/// Connection pool managing session lifecycles per host
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    slots: Mutex<HashMap<String, Arc<HostSlot>>>,
}

impl ConnectionPool {
    /// Create a pool over the given connector
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, host: &str) -> Arc<HostSlot> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostSlot {
                    permits: Arc::new(Semaphore::new(self.config.sessions_per_host)),
                    inner: Mutex::new(SlotInner {
                        idle: Vec::new(),
                        state: ConnState::Disconnected,
                    }),
                })
            })
            .clone()
    }

    /// Acquire a session for the host, reusing a ready one if available
    ///
    /// Blocks while the host's slot is saturated or connecting, without
    /// affecting other hosts' slots.
    ///
    /// # Errors
    /// Returns `ExecError` if establishing a new session fails or exceeds
    /// the connect timeout.
    #[instrument(skip(self, info), fields(host = %info.name))]
    pub async fn acquire(&self, info: &ConnectionInfo) -> Result<PooledConnection, ExecError> {
        let slot = self.slot(&info.name).await;

        let permit = slot
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExecError::PoolClosed)?;

        {
            let mut inner = slot.inner.lock().await;
            while let Some(idle) = inner.idle.pop() {
                if idle.exec.is_broken() {
                    debug!(host = %info.name, "discarding broken idle session");
                    continue;
                }
                inner.state = ConnState::Ready;
                debug!(host = %info.name, "reusing pooled session");
                return Ok(PooledConnection {
                    host: info.name.clone(),
                    exec: Some(idle.exec),
                    slot: slot.clone(),
                    _permit: permit,
                });
            }
            inner.state = ConnState::Connecting;
        }

        match timeout(self.config.connect_timeout, self.connector.connect(info)).await {
            Ok(Ok(exec)) => {
                slot.inner.lock().await.state = ConnState::Ready;
                Ok(PooledConnection {
                    host: info.name.clone(),
                    exec: Some(exec),
                    slot,
                    _permit: permit,
                })
            }
            Ok(Err(e)) => {
                slot.inner.lock().await.state = ConnState::Failed;
                warn!(host = %info.name, error = %e, "connect failed");
                Err(e)
            }
            Err(_) => {
                slot.inner.lock().await.state = ConnState::Failed;
                warn!(host = %info.name, timeout = ?self.config.connect_timeout, "connect timed out");
                Err(ExecError::ConnectTimeout {
                    host: info.name.clone(),
                    timeout: self.config.connect_timeout,
                })
            }
        }
    }

    /// Return a connection to the pool, or discard it if broken
    pub async fn release(&self, mut conn: PooledConnection) {
        let Some(mut exec) = conn.exec.take() else {
            return;
        };
        let mut inner = conn.slot.inner.lock().await;
        if exec.is_broken() {
            inner.state = if inner.idle.is_empty() {
                ConnState::Disconnected
            } else {
                ConnState::Ready
            };
            drop(inner);
            debug!(host = %conn.host, "discarding broken session");
            exec.close().await;
        } else {
            inner.idle.push(IdleSession {
                exec,
                since: Instant::now(),
            });
            inner.state = ConnState::Ready;
        }
    }

    /// Current slot state for a host, if the pool has seen it
    pub async fn state(&self, host: &str) -> Option<ConnState> {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(host).cloned()
        }?;
        let inner = slot.inner.lock().await;
        Some(inner.state)
    }

    /// Close idle sessions past the TTL
    ///
    /// Runs independently of any execution; see [`Self::spawn_idle_reaper`].
    pub async fn reap_idle(&self) {
        let slots: Vec<(String, Arc<HostSlot>)> = {
            let slots = self.slots.lock().await;
            slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let now = Instant::now();
        for (host, slot) in slots {
            let mut expired = Vec::new();
            {
                let mut inner = slot.inner.lock().await;
                let idle = std::mem::take(&mut inner.idle);
                for session in idle {
                    if now.duration_since(session.since) >= self.config.idle_ttl {
                        expired.push(session);
                    } else {
                        inner.idle.push(session);
                    }
                }
                if inner.idle.is_empty() && inner.state == ConnState::Ready {
                    inner.state = ConnState::Disconnected;
                }
            }
            for mut session in expired {
                debug!(host = %host, "closing idle session past TTL");
                session.exec.close().await;
            }
        }
    }

    /// Spawn the background idle-reclamation task
    ///
    /// The task stops once the pool is dropped.
    pub fn spawn_idle_reaper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(pool) = pool.upgrade() else { break };
                pool.reap_idle().await;
            }
        })
    }

    /// Close every pooled session (flush-on-exit teardown)
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<HostSlot>> = {
            let mut slots = self.slots.lock().await;
            slots.drain().map(|(_, v)| v).collect()
        };
        for slot in slots {
            let mut inner = slot.inner.lock().await;
            for mut session in inner.idle.drain(..) {
                session.exec.close().await;
            }
            inner.state = ConnState::Disconnected;
        }
        info!("connection pool shut down");
    }
}

/// A session checked out of the pool
///
/// Dropping without release discards the session, which is the right
/// behavior for cancelled executions: a mid-command session is not reusable.
pub struct PooledConnection {
    host: String,
    exec: Option<Box<dyn RemoteExecutor>>,
    slot: Arc<HostSlot>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// Host this connection belongs to
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run a command on this session
    pub async fn run(&mut self, cmd: &str, timeout: Duration) -> RunOutput {
        match self.exec.as_mut() {
            Some(exec) => exec.run(cmd, timeout).await,
            // Unreachable after release, which consumes self
            None => RunOutput::sentinel(
                crate::result::ExitStatus::ConnectionError,
                Vec::new(),
                b"session already released".to_vec(),
                chrono::Utc::now(),
                Duration::ZERO,
            ),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.exec.take().is_some() {
            debug!(host = %self.host, "connection dropped without release, discarding session");
            if let Ok(mut inner) = self.slot.inner.try_lock() {
                if inner.idle.is_empty() {
                    inner.state = ConnState::Disconnected;
                }
            }
        }
    }
}
