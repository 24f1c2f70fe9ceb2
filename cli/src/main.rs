use clap::{Parser, Subcommand};
use std::process;

mod commands;
mod output;

use commands::{coordinator, worker};

/// HPC Bench - distributed HPL/collectl benchmark orchestration
#[derive(Parser)]
#[command(name = "hpc-bench")]
#[command(author = "HPC Bench Contributors")]
#[command(version)]
#[command(about = "Distributed HPL benchmark orchestration: coordinator and worker daemons", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator: accept registrations and drive dispatch sessions
    #[command(visible_alias = "c")]
    Coordinator(coordinator::CoordinatorArgs),

    /// Run a worker node: register with the coordinator and serve benchmarks
    #[command(visible_alias = "w")]
    Worker(worker::WorkerArgs),
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Handle color output
    if cli.no_color {
        colored::control::set_override(false);
    }

    // Execute command
    let result = match cli.command {
        Commands::Coordinator(args) => coordinator::execute(args, cli.verbose).await,
        Commands::Worker(args) => worker::execute(args, cli.verbose).await,
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if cli.verbose {
            eprintln!("\nCaused by:");
            for cause in e.chain().skip(1) {
                eprintln!("  {}", cause);
            }
        }
        process::exit(1);
    }
}
