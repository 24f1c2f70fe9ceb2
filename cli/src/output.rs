use colored::Colorize;
use hpc_bench_core::coordinator::{DispatchReport, NodeOutcome};
use hpc_bench_core::protocol::NodeEntry;

/// Print the registered fleet, one block per node.
pub fn print_nodes(nodes: &[NodeEntry]) {
    if nodes.is_empty() {
        println!("{}", "No nodes registered".yellow());
        return;
    }

    println!("\n{}", "Registered Nodes:".bold());
    println!("{}", "-".repeat(50));
    for (index, node) in nodes.iter().enumerate() {
        println!(
            "Node {}:\n  IP: {}\n  Port: {}\n  Registered at: {}\n  Host: {} ({} CPUs, {:.1} GiB RAM, {})",
            index + 1,
            node.ip,
            node.port,
            node.registered_at,
            node.metrics.hostname,
            node.metrics.cpu_count,
            node.metrics.total_ram_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            node.metrics.operating_system,
        );
        println!("{}", "-".repeat(50));
    }
}

/// Print one session's per-node outcomes and where the artifacts went.
pub fn print_report(report: &DispatchReport) {
    println!(
        "\nSession results in {}",
        report.session_dir.display().to_string().bold()
    );
    for (ip, outcome) in &report.outcomes {
        let line = match outcome {
            NodeOutcome::Completed { files } => {
                format!("{ip}: completed, {files} artifact file(s)").green()
            }
            NodeOutcome::Failed(status) => format!("{ip}: failed ({status})").red(),
            NodeOutcome::SubmitRejected => format!("{ip}: submission rejected").red(),
            NodeOutcome::Unreachable => format!("{ip}: unreachable, abandoned").red(),
        };
        println!("  {line}");
    }
}
