//! tiercache - region cache tooling
//!
//! Main entry point for the tiercache CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{check, soak};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// tiercache - validate cache configurations and exercise regions
#[derive(Parser)]
#[command(name = "tiercache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file and print every region's effective settings
    Check(check::CheckArgs),

    /// Fill a region, read it back and report statistics
    Soak(soak::SoakArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let ctx = commands::Context {
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Check(args) => check::run(args, &ctx).await,
        Commands::Soak(args) => soak::run(args, &ctx).await,
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let default = if verbose {
        "tiercache=debug,tiercache_config=debug,info"
    } else {
        "tiercache=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
