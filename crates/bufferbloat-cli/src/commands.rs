//! CLI command implementations
//!
//! Flag handling lives here rather than in main.rs so it can be unit tested.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bufferbloat::{Experiment, ExperimentConfig, ExperimentReport};
use clap::Args;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Bandwidth of the server link (Mb/s) [default: 1.5]
    #[arg(long = "bw-server")]
    pub bw_server: Option<f64>,

    /// Bandwidth of the attacker link (Mb/s) [default: 1.5]
    #[arg(long = "bw-attacker")]
    pub bw_attacker: Option<f64>,

    /// Bandwidth of the innocent link (Mb/s) [default: 1.5]
    #[arg(long = "bw-innocent")]
    pub bw_innocent: Option<f64>,

    /// Link propagation delay (ms) [default: 3]
    #[arg(long)]
    pub delay: Option<f64>,

    /// Directory for all output files
    #[arg(short, long)]
    pub dir: PathBuf,

    /// Duration of the experiment (seconds) [default: 10]
    #[arg(short, long)]
    pub time: Option<u64>,

    /// Max buffer size of the innocent link (packets) [default: 100]
    #[arg(long)]
    pub maxq: Option<u32>,

    /// TCP congestion control algorithm [default: reno]
    #[arg(long)]
    pub cong: Option<String>,

    /// Also run the competing flow from the attacker host
    #[arg(long)]
    pub attacker: bool,

    /// JSON file with base settings; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Merge defaults, the optional config file and explicit flags
pub fn build_config(args: &RunArgs) -> Result<ExperimentConfig> {
    let mut config = match &args.config {
        Some(path) => ExperimentConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => ExperimentConfig::new(&args.dir),
    };
    config.output_dir = args.dir.clone();

    if let Some(v) = args.bw_server {
        config.bw_server = v;
    }
    if let Some(v) = args.bw_attacker {
        config.bw_attacker = v;
    }
    if let Some(v) = args.bw_innocent {
        config.bw_innocent = v;
    }
    if let Some(v) = args.delay {
        config.delay_ms = v;
    }
    if let Some(v) = args.time {
        config.duration_secs = v;
    }
    if let Some(v) = args.maxq {
        config.max_queue = v;
    }
    if let Some(v) = &args.cong {
        config.congestion_control = v.clone();
    }
    if args.attacker {
        config.attacker_flow = true;
    }
    Ok(config)
}

/// Result lines printed at the end of a run
pub fn summary_lines(report: &ExperimentReport) -> Vec<String> {
    let summary = &report.measurement.summary;
    match (summary.mean, summary.stdev) {
        (Some(mean), Some(stdev)) => vec![
            format!("Average web page fetch time: {:.4}s", mean),
            format!("Standard deviation for web page fetch time: {:.4}s", stdev),
            format!(
                "({} of {} fetches succeeded)",
                summary.count, report.measurement.attempts
            ),
        ],
        _ => vec![format!(
            "No web page fetch succeeded ({} attempts)",
            report.measurement.attempts
        )],
    }
}

/// Implementation of the default command - runs one experiment
pub async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = build_config(&args)?;
    info!(
        "Bandwidths server/attacker/innocent: {}/{}/{} Mb/s, delay {} ms, queue {} pkts, {} for {}s",
        config.bw_server,
        config.bw_attacker,
        config.bw_innocent,
        config.delay_ms,
        config.max_queue,
        config.congestion_control,
        config.duration_secs
    );

    let report = Experiment::new(config)
        .run()
        .await
        .context("Experiment failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in summary_lines(&report) {
            println!("{}", line);
        }
    }
    Ok(())
}
