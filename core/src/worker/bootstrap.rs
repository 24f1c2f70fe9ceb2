// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker startup: registration with the coordinator and SSH bootstrap.
//!
//! The sequence is register (with bounded exponential backoff), install the
//! coordinator's key pair under `~/.ssh`, then best-effort load the key into
//! an ssh-agent. Registration and key installation are fatal on final
//! failure; the agent step only logs, since competitive jobs do not need it.

use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, System};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::BootstrapTunables;
use crate::protocol::{
    PrivateKeyResponse, PublicKeyResponse, RegisterRequest, SystemMetrics,
};
use crate::ssh;

/// Fatal bootstrap failures.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Every registration attempt failed.
    #[error("registration failed after {attempts} attempts: {last_error}")]
    Registration {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },
    /// Every fetch attempt for one key failed.
    #[error("failed to fetch the {key} key after {attempts} attempts: {last_error}")]
    KeyFetch {
        /// Which key was being fetched.
        key: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },
    /// Key files could not be written.
    #[error("failed to install SSH keys: {0}")]
    KeyInstall(#[from] std::io::Error),
}

/// Talks to the coordinator during worker startup.
#[derive(Debug)]
pub struct Bootstrap {
    http: reqwest::Client,
    master_url: String,
    tunables: BootstrapTunables,
}

impl Bootstrap {
    /// Create a bootstrap client for the given coordinator base URL.
    pub fn new(master_url: String, tunables: BootstrapTunables) -> Self {
        Self {
            http: reqwest::Client::new(),
            master_url,
            tunables,
        }
    }

    /// Register this worker, retrying with exponential backoff.
    pub async fn register(&self, port: u16) -> Result<(), BootstrapError> {
        let request = RegisterRequest {
            port,
            metrics: collect_system_metrics(),
        };

        let mut delay = self.tunables.backoff_base;
        let mut last_error = String::new();
        for attempt in 1..=self.tunables.max_retries {
            info!(attempt, url = %self.master_url, "registering with coordinator");
            match self.attempt_registration(&request).await {
                Ok(()) => {
                    info!("registered with coordinator");
                    return Ok(());
                }
                Err(err) => {
                    last_error = err;
                    warn!(attempt, error = %last_error, "registration attempt failed");
                }
            }
            if attempt < self.tunables.max_retries {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(BootstrapError::Registration {
            attempts: self.tunables.max_retries,
            last_error,
        })
    }

    async fn attempt_registration(&self, request: &RegisterRequest) -> Result<(), String> {
        let response = self
            .http
            .post(format!("{}/register", self.master_url))
            .timeout(self.tunables.http_timeout)
            .json(request)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("coordinator answered {}", response.status()))
        }
    }

    /// Fetch the coordinator's key pair and install it under `ssh_dir`.
    ///
    /// Each key GET is retried with the same bounded backoff as
    /// registration before the bootstrap gives up.
    pub async fn install_ssh_keys(&self, ssh_dir: &Path) -> Result<(), BootstrapError> {
        let public_key = self
            .fetch_key("/get_ssh_public_key", "public", |r: PublicKeyResponse| {
                r.public_key
            })
            .await?;
        ssh::write_public_key(ssh_dir, &public_key)?;
        ssh::authorize_key(ssh_dir, &public_key)?;
        info!("public key installed and authorized");

        let private_key = self
            .fetch_key("/get_ssh_private_key", "private", |r: PrivateKeyResponse| {
                r.private_key
            })
            .await?;
        ssh::write_private_key(ssh_dir, &private_key)?;
        info!("private key installed");

        Ok(())
    }

    /// Fetch one key, retrying with exponential backoff. Empty key material
    /// counts as a failed attempt, like an unreachable endpoint.
    async fn fetch_key<T, F>(
        &self,
        path: &str,
        key: &'static str,
        extract: F,
    ) -> Result<String, BootstrapError>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(T) -> String,
    {
        let mut delay = self.tunables.backoff_base;
        let mut last_error = String::new();
        for attempt in 1..=self.tunables.max_retries {
            info!(attempt, key, "fetching SSH key from coordinator");
            match self.attempt_key_fetch(path).await {
                Ok(response) => {
                    let material = extract(response).trim().to_string();
                    if !material.is_empty() {
                        return Ok(material);
                    }
                    last_error = format!("no {key} key material in the response");
                }
                Err(err) => last_error = err,
            }
            warn!(attempt, key, error = %last_error, "key fetch attempt failed");
            if attempt < self.tunables.max_retries {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(BootstrapError::KeyFetch {
            key,
            attempts: self.tunables.max_retries,
            last_error,
        })
    }

    async fn attempt_key_fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, String> {
        let response = self
            .http
            .get(format!("{}{}", self.master_url, path))
            .timeout(self.tunables.http_timeout)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if !response.status().is_success() {
            return Err(format!("coordinator answered {}", response.status()));
        }
        response.json::<T>().await.map_err(|err| err.to_string())
    }
}

/// Snapshot the node's hardware for the registration payload.
pub fn collect_system_metrics() -> SystemMetrics {
    let mut system = System::new();
    system.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let (disk_total_bytes, disk_available_bytes) = disks
        .list()
        .iter()
        .fold((0, 0), |(total, available), disk| {
            (total + disk.total_space(), available + disk.available_space())
        });

    SystemMetrics {
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        cpu_count: num_cpus::get(),
        total_ram_bytes: system.total_memory(),
        available_ram_bytes: system.available_memory(),
        disk_total_bytes,
        disk_available_bytes,
        operating_system: System::long_os_version()
            .unwrap_or_else(|| std::env::consts::OS.to_string()),
    }
}

/// Make sure an ssh-agent holds the fleet key. Best effort only: failures are
/// reported and swallowed so non-cooperative jobs keep working.
pub async fn ensure_agent(ssh_dir: &Path) {
    if std::env::var_os("SSH_AUTH_SOCK").is_none() {
        match start_agent().await {
            Ok(()) => info!("ssh-agent started"),
            Err(err) => {
                warn!(error = %err, "could not start ssh-agent; cooperative jobs may fail");
                return;
            }
        }
    }

    let key_path = ssh_dir.join(ssh::PRIVATE_KEY_FILE);
    match tokio::process::Command::new("ssh-add")
        .arg(&key_path)
        .status()
        .await
    {
        Ok(status) if status.success() => info!("private key loaded into ssh-agent"),
        Ok(status) => warn!(%status, "ssh-add failed; cooperative jobs may fail"),
        Err(err) => warn!(error = %err, "ssh-add unavailable; cooperative jobs may fail"),
    }
}

/// Start an agent and export its environment into this process.
async fn start_agent() -> std::io::Result<()> {
    let output = tokio::process::Command::new("ssh-agent")
        .arg("-s")
        .output()
        .await?;
    if !output.status.success() {
        return Err(std::io::Error::other("ssh-agent exited non-zero"));
    }

    for (name, value) in parse_agent_output(&String::from_utf8_lossy(&output.stdout)) {
        std::env::set_var(name, value);
    }
    Ok(())
}

/// Pull `NAME=value` exports out of `ssh-agent -s` output.
fn parse_agent_output(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let assignment = line.split(';').next()?;
            let (name, value) = assignment.split_once('=')?;
            let name = name.trim();
            if name == "SSH_AUTH_SOCK" || name == "SSH_AGENT_PID" {
                Some((name.to_string(), value.trim().to_string()))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_output() {
        let output = "SSH_AUTH_SOCK=/tmp/ssh-XXXX/agent.123; export SSH_AUTH_SOCK;\n\
                      SSH_AGENT_PID=124; export SSH_AGENT_PID;\n\
                      echo Agent pid 124;\n";
        let vars = parse_agent_output(output);
        assert_eq!(
            vars,
            vec![
                (
                    "SSH_AUTH_SOCK".to_string(),
                    "/tmp/ssh-XXXX/agent.123".to_string()
                ),
                ("SSH_AGENT_PID".to_string(), "124".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_agent_output_ignores_noise() {
        assert!(parse_agent_output("echo hello\nno equals here\n").is_empty());
    }

    #[test]
    fn test_collect_system_metrics() {
        let metrics = collect_system_metrics();
        assert!(metrics.cpu_count > 0);
        assert!(!metrics.hostname.is_empty());
    }
}
