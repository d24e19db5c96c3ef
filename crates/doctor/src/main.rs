//! EKS Doctor CLI.
//!
//! Runs read-only health checks against an EKS cluster and prints a
//! prioritized report.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use eks_doctor::commands::HealthCommand;

/// EKS Doctor - cluster health diagnostics.
#[derive(Parser)]
#[command(
    name = "eks-doctor",
    version,
    about = "Read-only health report for EKS clusters",
    long_about = "Inspect an EKS cluster and report what is wrong with it.\n\n\
                  Checks cover version skew, deprecated APIs, logging agents,\n\
                  networking, load balancers, scheduling, IRSA/RBAC, node\n\
                  readiness, storage and security posture.\n\n\
                  Nothing in the cluster is modified; the only objects created\n\
                  are short-lived probe pods, which are always removed."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all health checks against a cluster.
    ///
    /// Exits successfully whenever a report was produced, regardless of
    /// how many issues it contains.
    Health(HealthCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info,eks_doctor=debug,doctor_cloud=debug")
        } else {
            EnvFilter::new("warn,eks_doctor=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding checks");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Health(cmd) => cmd.run(cancel).await,
    }
}
