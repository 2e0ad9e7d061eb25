//! SSH key resolution and the secret-store seam
//!
//! Credentials are never persisted here; key material referenced through the
//! secret store is materialized into a 0600 temp file that is deleted on drop.

use std::env;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Opaque credential lookup, keyed by host name or provider
///
/// Implementations own storage; the pool only ever reads.
pub trait SecretStore: Send + Sync {
    /// Fetch raw credential bytes for the given reference
    ///
    /// # Errors
    /// Returns `KeyError` if the store itself fails; a missing entry is `Ok(None)`.
    fn get_credential(&self, reference: &str) -> Result<Option<Vec<u8>>, KeyError>;
}

/// Secret store backed by environment variables
///
/// A reference `foo` resolves to base64-decoded `FLEETCMD_SECRET_FOO`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get_credential(&self, reference: &str) -> Result<Option<Vec<u8>>, KeyError> {
        let var = format!(
            "FLEETCMD_SECRET_{}",
            reference.to_uppercase().replace(['-', '.'], "_")
        );
        match env::var(&var) {
            Ok(encoded) => {
                let data = base64_decode(&encoded).map_err(|_| KeyError::InvalidBase64)?;
                Ok(Some(data))
            }
            Err(_) => Ok(None),
        }
    }
}

/// How to obtain credentials for a host
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Explicit path to a private key file (`~` expanded at resolve time)
    File(PathBuf),
    /// Reference into the secret store
    Secret(String),
    /// Use the ssh-agent
    Agent,
}

impl KeySource {
    /// Resolve this source to a usable key location
    ///
    /// For `Secret`, fetches the material and writes it to a temp file.
    ///
    /// # Errors
    /// Returns `KeyError` if the file is missing, has open permissions, or
    /// the secret store has no entry for the reference.
    pub fn resolve(&self, store: &dyn SecretStore) -> Result<ResolvedKey, KeyError> {
        match self {
            KeySource::File(path) => {
                let path = expand_home(path);
                if !path.exists() {
                    return Err(KeyError::NotFound(path.display().to_string()));
                }
                validate_key_permissions(&path)?;
                Ok(ResolvedKey::Path(path))
            }
            KeySource::Secret(reference) => {
                let data = store
                    .get_credential(reference)?
                    .ok_or_else(|| KeyError::SecretNotFound(reference.clone()))?;
                let temp_path = write_temp_key(&data)?;
                Ok(ResolvedKey::Temp(temp_path))
            }
            KeySource::Agent => Ok(ResolvedKey::Agent),
        }
    }
}

/// Resolved key location
#[derive(Debug)]
pub enum ResolvedKey {
    /// Path to key file
    Path(PathBuf),
    /// Use the ssh-agent
    Agent,
    /// Temporary file (deleted on drop)
    Temp(PathBuf),
}

impl ResolvedKey {
    /// Path to hand to the SSH library, if file-backed
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ResolvedKey::Path(p) | ResolvedKey::Temp(p) => Some(p),
            ResolvedKey::Agent => None,
        }
    }

    /// Whether to authenticate via the ssh-agent
    #[must_use]
    pub fn use_agent(&self) -> bool {
        matches!(self, ResolvedKey::Agent)
    }
}

impl Drop for ResolvedKey {
    fn drop(&mut self) {
        if let ResolvedKey::Temp(path) = self {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove temp key");
            }
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("secret store has no entry for {0}")]
    SecretNotFound(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(KeyError::Io)?;
    let mode = metadata.permissions().mode();

    // group/other bits must be clear
    if mode & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

fn write_temp_key(key_data: &[u8]) -> Result<PathBuf, KeyError> {
    use std::fs::File;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicU64, Ordering};

    // Unique per resolve; concurrent fan-outs resolve keys in parallel
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let temp_path = std::env::temp_dir().join(format!(
        "fleetcmd_ssh_key_{}_{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = File::create(&temp_path)?;
    file.write_all(key_data)?;

    let mut permissions = file.metadata()?.permissions();
    permissions.set_mode(0o600);
    std::fs::set_permissions(&temp_path, permissions)?;

    debug!(path = %temp_path.display(), "wrote temporary SSH key");

    Ok(temp_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_store_decodes_base64() {
        // SAFETY: test-local variable name, no concurrent reader
        unsafe { std::env::set_var("FLEETCMD_SECRET_UNIT_TEST", "aGVsbG8=") };
        let store = EnvSecretStore;
        let data = store.get_credential("unit-test").unwrap().unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn env_store_missing_entry_is_none() {
        let store = EnvSecretStore;
        assert!(store.get_credential("no-such-entry").unwrap().is_none());
    }

    #[test]
    fn secret_key_materializes_temp_file() {
        unsafe { std::env::set_var("FLEETCMD_SECRET_TEMPKEY", "c2VjcmV0") };
        let store = EnvSecretStore;
        let source = KeySource::Secret("tempkey".to_string());
        let path = {
            let resolved = source.resolve(&store).unwrap();
            let path = resolved.path().unwrap().clone();
            assert_eq!(std::fs::read(&path).unwrap(), b"secret");
            path
        };
        // temp file removed on drop
        assert!(!path.exists());
    }

    #[test]
    fn missing_key_file_fails() {
        let source = KeySource::File(PathBuf::from("/nonexistent/id_ed25519"));
        assert!(matches!(
            source.resolve(&EnvSecretStore),
            Err(KeyError::NotFound(_))
        ));
    }
}
