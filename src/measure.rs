//! Foreground measurement loop
//!
//! Bursts of sequential fetches separated by a fixed sleep, until the
//! configured duration has elapsed. At least one burst always runs.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ExperimentConfig;
use crate::fetch::Fetcher;
use crate::stats::LatencySummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementReport {
    pub summary: LatencySummary,
    /// Successful fetch latencies in seconds, in collection order
    pub samples: Vec<f64>,
    pub bursts: usize,
    pub attempts: usize,
    pub dropped: usize,
}

/// Per-run loop state
struct RunState {
    samples: Vec<f64>,
    start: Instant,
    bursts: usize,
    attempts: usize,
}

impl RunState {
    fn new() -> Self {
        Self {
            samples: Vec::new(),
            start: Instant::now(),
            bursts: 0,
            attempts: 0,
        }
    }

    fn finish(self) -> MeasurementReport {
        MeasurementReport {
            summary: LatencySummary::from_samples(&self.samples),
            dropped: self.attempts - self.samples.len(),
            samples: self.samples,
            bursts: self.bursts,
            attempts: self.attempts,
        }
    }
}

pub async fn run(config: &ExperimentConfig, fetcher: &dyn Fetcher) -> MeasurementReport {
    let plan = &config.measurement;
    let duration = config.duration();
    let mut state = RunState::new();

    loop {
        for _ in 0..plan.burst_size {
            state.attempts += 1;
            match fetcher.fetch().await {
                Ok(latency) => {
                    debug!(latency, "fetch");
                    state.samples.push(latency);
                }
                Err(e) => warn!(endpoint = %fetcher.endpoint(), "fetch dropped: {}", e),
            }
        }
        state.bursts += 1;

        tokio::time::sleep(plan.inter_burst()).await;
        let elapsed = state.start.elapsed();
        if elapsed > duration {
            break;
        }
        println!("{:.1}s left...", (duration - elapsed).as_secs_f64());
    }

    state.finish()
}
