//! Ordered, infallible teardown of everything a run started

use std::collections::BTreeSet;
use std::time::Duration;

use network_sim::Network;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::monitor::{stop_monitor, CwndSource, MonitorHandle};
use crate::process::{kill_matching, StopOutcome};
use crate::traffic::{TrafficHandle, TrafficRole};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub monitors_stopped: usize,
    pub terminated: usize,
    pub killed: usize,
    pub exited_early: usize,
    /// Processes found by the pattern sweep after the handles were stopped
    pub swept: usize,
    pub network_stopped: bool,
    pub errors: Vec<String>,
}

/// Command-line patterns swept system-wide at the end of every run
///
/// Covers every traffic role and the default congestion-window reader even
/// when this run never launched them, so orphans of an earlier aborted run
/// are reclaimed too.
pub fn sweep_patterns(monitors: &[MonitorHandle]) -> BTreeSet<String> {
    let mut patterns: BTreeSet<String> = TrafficRole::ALL
        .iter()
        .map(|role| role.kill_pattern().to_string())
        .collect();
    patterns.insert(CwndSource::detect().kill_pattern());
    patterns.extend(monitors.iter().filter_map(MonitorHandle::kill_pattern));
    patterns
}

/// Kill everything matching `patterns`, returning how many were found
pub fn sweep(patterns: &BTreeSet<String>) -> usize {
    let mut swept = 0;
    for pattern in patterns {
        let n = kill_matching(pattern);
        if n > 0 {
            warn!(pattern = %pattern, count = n, "killed leftover processes");
        } else {
            debug!(pattern = %pattern, "no leftover processes");
        }
        swept += n;
    }
    swept
}

/// Stop monitors, then traffic, then the network, then sweep by pattern
///
/// Never fails; problems are logged and listed in the report.
pub async fn teardown(
    monitors: &mut [MonitorHandle],
    traffic: &mut [TrafficHandle],
    network: Option<&mut Network>,
    grace: Duration,
) -> TeardownReport {
    let mut report = TeardownReport::default();
    let patterns = sweep_patterns(monitors);

    for monitor in monitors.iter_mut() {
        if !monitor.is_stopped() {
            stop_monitor(monitor, grace).await;
            report.monitors_stopped += 1;
        }
    }

    for handle in traffic.iter_mut() {
        match handle.stop(grace).await {
            StopOutcome::Terminated => report.terminated += 1,
            StopOutcome::Killed => report.killed += 1,
            StopOutcome::AlreadyExited => report.exited_early += 1,
            StopOutcome::AlreadyStopped => {}
        }
    }

    if let Some(network) = network {
        match network.stop().await {
            Ok(()) => report.network_stopped = true,
            Err(e) => {
                warn!("Failed to stop network: {}", e);
                report.errors.push(format!("network stop: {}", e));
            }
        }
    }

    report.swept = sweep(&patterns);

    info!(
        monitors = report.monitors_stopped,
        terminated = report.terminated,
        killed = report.killed,
        swept = report.swept,
        "teardown complete"
    );
    report
}
