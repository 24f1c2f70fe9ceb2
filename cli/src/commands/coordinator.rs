use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use hpc_bench_core::config::{CoordinatorSettings, DispatchTunables};
use hpc_bench_core::coordinator::{
    keys, server, CoordinatorState, DispatchSession, NodeRegistry,
};
use hpc_bench_core::protocol::{CompetitiveRequest, HplParams};
use hpc_bench_core::ssh;

use crate::output;

/// Settle time before re-running an automatic iteration.
const AUTO_ITERATION_DELAY: Duration = Duration::from_secs(15);

#[derive(Args, Debug)]
pub struct CoordinatorArgs {
    /// Bind address for the coordinator API
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port for the coordinator API
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Directory for timestamped session results
    #[arg(long, default_value = "benchmarks")]
    pub results_dir: PathBuf,

    /// MPI slots allocated per node in cooperative dispatch hostfiles
    #[arg(long, default_value_t = 4)]
    pub slots_per_node: u32,
}

pub async fn execute(args: CoordinatorArgs, _verbose: bool) -> Result<()> {
    let ssh_dir = ssh::default_ssh_dir().context("cannot resolve the home directory")?;
    keys::bootstrap(&ssh_dir)
        .await
        .context("SSH key distribution could not be prepared")?;

    let settings = CoordinatorSettings {
        host: args.host,
        port: args.port,
        results_dir: args.results_dir,
        ..CoordinatorSettings::default()
    };
    let registry = Arc::new(NodeRegistry::new());
    let state = Arc::new(CoordinatorState {
        registry: Arc::clone(&registry),
        ssh_dir,
    });

    let server = {
        let settings = settings.clone();
        tokio::spawn(async move { server::serve(state, &settings).await })
    };
    println!(
        "Coordinator running on {}",
        format!("http://{}:{}", settings.host, settings.port).bold()
    );

    tokio::select! {
        joined = server => {
            joined
                .context("coordinator server task failed")?
                .context("coordinator server failed")?;
            anyhow::bail!("coordinator server stopped unexpectedly");
        }
        outcome = operator_loop(registry, settings, args.slots_per_node) => outcome,
    }
}

/// Thin line-oriented driver over the dispatch API.
async fn operator_loop(
    registry: Arc<NodeRegistry>,
    settings: CoordinatorSettings,
    slots_per_node: u32,
) -> Result<()> {
    let tunables = DispatchTunables::default();
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => {}
            ["nodes"] => output::print_nodes(&registry.snapshot()),
            ["reload"] => {
                let removed = registry.reload(&tunables).await;
                if removed.is_empty() {
                    println!("All registered nodes responded");
                } else {
                    for node in removed {
                        println!("{}", format!("Removed unresponsive node {}", node.ip).red());
                    }
                }
            }
            ["competitive", rest @ ..] => match parse_competitive(rest) {
                Ok(request) => {
                    run_competitive(&registry, &settings, &tunables, &request).await;
                }
                Err(message) => println!("{message}"),
            },
            ["competitive-auto", iterations, rest @ ..] => {
                let Ok(iterations) = iterations.parse::<u32>() else {
                    println!("Invalid iteration count '{iterations}'");
                    continue;
                };
                match parse_competitive(rest) {
                    Ok(request) => {
                        for iteration in 1..=iterations {
                            println!("\nStarting benchmark iteration {iteration}/{iterations}");
                            if iteration > 1 {
                                println!("Waiting for nodes to settle...");
                                tokio::time::sleep(AUTO_ITERATION_DELAY).await;
                            }
                            run_competitive(&registry, &settings, &tunables, &request).await;
                        }
                        println!("\nCompleted {iterations} benchmark iterations");
                    }
                    Err(message) => println!("{message}"),
                }
            }
            ["cooperative", rest @ ..] => match parse_params(rest) {
                Ok(params) => {
                    let session = DispatchSession::new(
                        Arc::clone(&registry),
                        settings.clone(),
                        tunables.clone(),
                    );
                    match session.run_cooperative(params, slots_per_node).await {
                        Ok(report) => output::print_report(&report),
                        Err(err) => println!("{}", format!("Dispatch failed: {err}").red()),
                    }
                }
                Err(message) => println!("{message}"),
            },
            ["help"] => print_help(),
            ["quit"] | ["exit"] => return Ok(()),
            other => println!("Unknown command '{}'; try 'help'", other.join(" ")),
        }
    }
}

async fn run_competitive(
    registry: &Arc<NodeRegistry>,
    settings: &CoordinatorSettings,
    tunables: &DispatchTunables,
    request: &CompetitiveRequest,
) {
    let session = DispatchSession::new(Arc::clone(registry), settings.clone(), tunables.clone());
    match session.run_competitive(request).await {
        Ok(report) => output::print_report(&report),
        Err(err) => println!("{}", format!("Dispatch failed: {err}").red()),
    }
}

fn parse_competitive(fields: &[&str]) -> Result<CompetitiveRequest, String> {
    let [ps, qs, n_value, nb, instances_num] = fields else {
        return Err("Usage: competitive <ps> <qs> <n_value> <nb> <instances_num>".to_string());
    };
    let request = CompetitiveRequest {
        ps: parse_positive("ps", ps)?,
        qs: parse_positive("qs", qs)?,
        n_value: parse_positive("n_value", n_value)?,
        nb: parse_positive("nb", nb)?,
        instances_num: parse_positive("instances_num", instances_num)?,
    };
    Ok(request)
}

fn parse_params(fields: &[&str]) -> Result<HplParams, String> {
    let [ps, qs, n_value, nb] = fields else {
        return Err("Usage: cooperative <ps> <qs> <n_value> <nb>".to_string());
    };
    Ok(HplParams {
        ps: parse_positive("ps", ps)?,
        qs: parse_positive("qs", qs)?,
        n_value: parse_positive("n_value", n_value)?,
        nb: parse_positive("nb", nb)?,
    })
}

fn parse_positive(name: &str, value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(format!("Invalid value '{value}' for {name}: expected a positive integer")),
    }
}

fn print_help() {
    println!("\nCommands:");
    println!("  nodes                                               display registered nodes");
    println!("  reload                                              drop nodes that fail a liveness ping");
    println!("  competitive <ps> <qs> <n_value> <nb> <instances>    benchmark every node independently");
    println!("  competitive-auto <iterations> <ps> <qs> <n> <nb> <instances>");
    println!("                                                      repeat a competitive run");
    println!("  cooperative <ps> <qs> <n_value> <nb>                one MPI job spanning the fleet");
    println!("  quit                                                exit");
}
