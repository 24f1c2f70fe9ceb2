use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use hpc_bench_core::config::{BootstrapTunables, WorkerSettings};
use hpc_bench_core::ssh;
use hpc_bench_core::worker::{bootstrap, server, Bootstrap, JobRunner};

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Bind address for the worker API
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    pub api_host: String,

    /// Bind port for the worker API
    #[arg(long, env = "API_PORT", default_value_t = 5000)]
    pub api_port: u16,

    /// Coordinator address
    #[arg(long, env = "MASTER_IP", default_value = "127.0.0.1")]
    pub master_ip: String,

    /// Coordinator port
    #[arg(long, env = "MASTER_PORT", default_value_t = 8000)]
    pub master_port: u16,

    /// Root of the per-task result tree
    #[arg(long, default_value = "../results")]
    pub results_root: PathBuf,

    /// Path to the HPL binary
    #[arg(long, default_value = "/usr/local/hpl/bin/xhpl")]
    pub hpl_binary: PathBuf,
}

pub async fn execute(args: WorkerArgs, _verbose: bool) -> Result<()> {
    let settings = WorkerSettings {
        api_host: args.api_host,
        api_port: args.api_port,
        master_ip: args.master_ip,
        master_port: args.master_port,
        results_root: args.results_root,
        hpl_binary: args.hpl_binary,
        ..WorkerSettings::default()
    };

    let handshake = Bootstrap::new(settings.master_url(), BootstrapTunables::default());
    handshake
        .register(settings.api_port)
        .await
        .context("node registration failed")?;

    let ssh_dir = ssh::default_ssh_dir().context("cannot resolve the home directory")?;
    handshake
        .install_ssh_keys(&ssh_dir)
        .await
        .context("failed to fetch SSH keys from the coordinator")?;
    bootstrap::ensure_agent(&ssh_dir).await;

    let runner = Arc::new(JobRunner::new(settings.clone()));
    server::serve(runner, &settings)
        .await
        .context("worker server failed")?;
    Ok(())
}
