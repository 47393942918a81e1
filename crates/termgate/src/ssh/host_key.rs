//! Host key loading and generation.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use russh::keys::PrivateKey;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::{Algorithm, LineEnding};

use crate::error::{GatewayError, Result};

/// Permissions for a generated host key.
const HOST_KEY_MODE: u32 = 0o600;

/// Load an OpenSSH private key.
pub fn load_host_key(path: &Path) -> Result<PrivateKey> {
    russh::keys::load_secret_key(path, None).map_err(|e| GatewayError::host_key(path, e))
}

/// Generate an Ed25519 key and save it to `path` in OpenSSH format, readable
/// by the owner only. Fails if `path` already exists.
pub fn generate_host_key(path: &Path) -> Result<PrivateKey> {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .map_err(|e| GatewayError::host_key(path, e))?;
    let encoded = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| GatewayError::host_key(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| GatewayError::host_key(path, e))?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(HOST_KEY_MODE)
        .open(path)
        .map_err(|e| GatewayError::host_key(path, e))?;
    file.write_all(encoded.as_bytes())
        .map_err(|e| GatewayError::host_key(path, e))?;

    tracing::info!(path = %path.display(), "generated Ed25519 host key");
    Ok(key)
}

/// Load the key at `path`, generating it first when it is missing and
/// `generate` is set.
pub fn load_or_generate_host_key(path: &Path, generate: bool) -> Result<PrivateKey> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "loading host key");
        return load_host_key(path);
    }
    if generate {
        return generate_host_key(path);
    }
    Err(GatewayError::host_key(
        path,
        "file not found (enable generate_host_key to create one)",
    ))
}
