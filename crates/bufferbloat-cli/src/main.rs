//! Bufferbloat experiment driver
//!
//! Builds the emulated network, runs the competing flows and reports the
//! web page fetch latency seen by the innocent host.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{cmd_run, RunArgs};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bufferbloat", author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins unless --verbose is given
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    cmd_run(cli.run).await
}
