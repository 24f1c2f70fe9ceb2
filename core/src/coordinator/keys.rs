// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The coordinator-owned SSH key pair.
//!
//! Generated once with `ssh-keygen` if absent and never rotated by the core.
//! The coordinator authorizes its own public key so workers holding the
//! private key can also SSH back into the coordinator host.

use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::ssh;

/// Key pair bootstrap failures; all fatal at coordinator startup.
#[derive(Debug, Error)]
pub enum KeyError {
    /// `ssh-keygen` was missing or exited non-zero.
    #[error("ssh-keygen failed: {0}")]
    Keygen(String),
    /// Key files could not be read or written.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ensure a key pair exists under `ssh_dir` and that the public half is in
/// the coordinator's own `authorized_keys`.
pub async fn bootstrap(ssh_dir: &Path) -> Result<(), KeyError> {
    ssh::ensure_ssh_dir(ssh_dir)?;

    let private_path = ssh_dir.join(ssh::PRIVATE_KEY_FILE);
    if private_path.exists() {
        info!("SSH key pair already present");
    } else {
        generate_keypair(&private_path).await?;
        info!(path = %private_path.display(), "SSH key pair generated");
    }

    let public = ssh::read_key(ssh_dir, ssh::PUBLIC_KEY_FILE)?
        .ok_or_else(|| KeyError::Keygen("no public key after generation".to_string()))?;
    ssh::authorize_key(ssh_dir, &public)?;
    Ok(())
}

async fn generate_keypair(private_path: &Path) -> Result<(), KeyError> {
    let status = tokio::process::Command::new("ssh-keygen")
        .args(["-t", "rsa", "-b", "2048", "-N", "", "-q", "-f"])
        .arg(private_path)
        .status()
        .await
        .map_err(|err| KeyError::Keygen(err.to_string()))?;

    if status.success() {
        Ok(())
    } else {
        Err(KeyError::Keygen(format!("ssh-keygen exited with {status}")))
    }
}

/// The public key, if present.
pub fn public_key(ssh_dir: &Path) -> std::io::Result<Option<String>> {
    ssh::read_key(ssh_dir, ssh::PUBLIC_KEY_FILE)
}

/// The private key, if present.
pub fn private_key(ssh_dir: &Path) -> std::io::Result<Option<String>> {
    ssh::read_key(ssh_dir, ssh::PRIVATE_KEY_FILE)
}
