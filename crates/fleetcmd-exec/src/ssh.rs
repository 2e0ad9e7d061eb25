//! SSH transport using the russh crate

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, Sig, client};
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::keys::SecretStore;
use crate::result::{ConnectionInfo, ExitStatus, RunOutput};
use crate::traits::{Connector, RemoteExecutor};

/// Default cap on collected output per stream (1 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        // In production, this should verify against known_hosts
        Ok(true)
    }
}

/// Opens authenticated SSH sessions
///
/// Credentials are resolved through the injected secret store at connect
/// time; nothing is cached between attempts.
pub struct SshConnector {
    secret_store: Arc<dyn SecretStore>,
    max_output_bytes: usize,
}

impl SshConnector {
    /// Create a connector using the given secret store
    pub fn new(secret_store: Arc<dyn SecretStore>) -> Self {
        Self {
            secret_store,
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

#[async_trait]
impl Connector for SshConnector {
    #[instrument(skip(self), fields(host = %info.name))]
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn RemoteExecutor>, ExecError> {
        info!(
            addr = %info.addr,
            port = info.port,
            user = %info.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());

        let mut session = client::connect(config, (&info.addr[..], info.port), SshClientHandler)
            .await
            .map_err(|e| ExecError::ConnectionFailed {
                host: info.name.clone(),
                reason: e.to_string(),
            })?;

        let key = info.auth.resolve(self.secret_store.as_ref()).map_err(|e| {
            ExecError::Key {
                host: info.name.clone(),
                reason: e.to_string(),
            }
        })?;

        if key.use_agent() {
            // TODO: ssh-agent auth via russh::keys::agent once agent key
            // enumeration is wired up
            return Err(ExecError::AuthenticationFailed {
                host: info.name.clone(),
                reason: "ssh-agent authentication not yet supported".to_string(),
            });
        }

        let key_path = key.path().ok_or_else(|| ExecError::Key {
            host: info.name.clone(),
            reason: "no key material available".to_string(),
        })?;

        let key_pair = load_secret_key(key_path, None).map_err(|e| ExecError::Key {
            host: info.name.clone(),
            reason: e.to_string(),
        })?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                &info.user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| ExecError::AuthenticationFailed {
                host: info.name.clone(),
                reason: e.to_string(),
            })?;

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed {
                host: info.name.clone(),
                reason: "public key authentication rejected".to_string(),
            });
        }

        info!(host = %info.name, "SSH connected and authenticated");

        Ok(Box::new(SshSession {
            host: info.name.clone(),
            handle: session,
            broken: false,
            max_output_bytes: self.max_output_bytes,
        }))
    }
}

/// One live SSH session
pub struct SshSession {
    host: String,
    handle: client::Handle<SshClientHandler>,
    broken: bool,
    max_output_bytes: usize,
}

impl SshSession {
    fn connection_error(
        &mut self,
        reason: &str,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        started_at: chrono::DateTime<Utc>,
        start: Instant,
    ) -> RunOutput {
        self.broken = true;
        warn!(host = %self.host, reason = %reason, "transport failure mid-command");
        RunOutput::sentinel(
            ExitStatus::ConnectionError,
            stdout,
            stderr,
            started_at,
            start.elapsed(),
        )
    }
}

#[async_trait]
impl RemoteExecutor for SshSession {
    #[instrument(skip(self, cmd), fields(host = %self.host))]
    async fn run(&mut self, cmd: &str, timeout: std::time::Duration) -> RunOutput {
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        debug!(command = %cmd, timeout = ?timeout, "executing remote command");

        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();

        let mut channel = match self.handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(e) => {
                return self.connection_error(&e.to_string(), stdout, stderr, started_at, start);
            }
        };

        if let Err(e) = channel.exec(true, cmd).await {
            return self.connection_error(&e.to_string(), stdout, stderr, started_at, start);
        }

        let mut exit_code: Option<i32> = None;

        // Stream channel events until close; the deadline applies to the
        // whole command, measured from exec.
        loop {
            let msg = match tokio::time::timeout_at(deadline, channel.wait()).await {
                Ok(msg) => msg,
                Err(_) => {
                    // Best-effort interrupt of the remote process
                    let _ = channel.signal(Sig::INT).await;
                    let _ = channel.close().await;
                    warn!(
                        host = %self.host,
                        elapsed = ?start.elapsed(),
                        "command timed out"
                    );
                    return RunOutput::sentinel(
                        ExitStatus::TimedOut,
                        stdout,
                        stderr,
                        started_at,
                        start.elapsed(),
                    );
                }
            };

            match msg {
                Some(ChannelMsg::Data { data }) => {
                    push_capped(&mut stdout, &data, self.max_output_bytes);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        push_capped(&mut stderr, &data, self.max_output_bytes);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status.cast_signed());
                }
                None => break,
                _ => {}
            }
        }

        let duration = start.elapsed();

        match exit_code {
            Some(code) => {
                debug!(command = %cmd, status = code, duration = ?duration, "remote command completed");
                RunOutput::sentinel(ExitStatus::Exited(code), stdout, stderr, started_at, duration)
            }
            None => {
                // Channel closed without reporting an exit status
                self.connection_error("channel closed without exit status", stdout, stderr, started_at, start)
            }
        }
    }

    fn is_broken(&self) -> bool {
        self.broken || self.handle.is_closed()
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(host = %self.host, error = %e, "disconnect failed");
        }
        self.broken = true;
        info!(host = %self.host, "SSH disconnected");
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

fn push_capped(buf: &mut Vec<u8>, data: &[u8], cap: usize) {
    let room = cap.saturating_sub(buf.len());
    let take = room.min(data.len());
    buf.extend_from_slice(&data[..take]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_capped_truncates_at_cap() {
        let mut buf = Vec::new();
        push_capped(&mut buf, b"hello", 3);
        assert_eq!(buf, b"hel");
        push_capped(&mut buf, b"more", 3);
        assert_eq!(buf, b"hel");
    }

    // SSH connect/auth paths require a live server; covered by the mock
    // connector tests in fleetcmd-core.
}
