//! Bufferbloat experiment orchestrator
//!
//! Builds a one-switch, three-host emulated network, starts background
//! monitors and competing traffic, times web page fetches from the
//! innocent host while the bottleneck queue fills, and tears everything
//! down again on every exit path.

pub mod config;
pub mod error;
pub mod process;
pub mod stats;
pub mod topology;

pub use config::{ExperimentConfig, MeasurementPlan, Timing, WebConfig};
pub use error::{ExperimentError, FetchError, TopologyError};
pub use stats::{mean, stdev, LatencySummary};
pub use topology::{Role, Topology};

#[cfg(target_os = "linux")]
pub mod experiment;
#[cfg(target_os = "linux")]
pub mod fetch;
#[cfg(target_os = "linux")]
pub mod measure;
#[cfg(target_os = "linux")]
pub mod monitor;
#[cfg(target_os = "linux")]
pub mod teardown;
#[cfg(target_os = "linux")]
pub mod traffic;

#[cfg(target_os = "linux")]
pub use experiment::{Experiment, ExperimentReport};
#[cfg(target_os = "linux")]
pub use fetch::{parse_latency_sample, CurlFetcher, Fetcher};
#[cfg(target_os = "linux")]
pub use measure::MeasurementReport;
#[cfg(target_os = "linux")]
pub use monitor::{start_monitor, stop_monitor, CwndSource, MonitorHandle, MonitorKind, MonitorParams};
#[cfg(target_os = "linux")]
pub use teardown::{teardown, TeardownReport};
#[cfg(target_os = "linux")]
pub use traffic::{start_traffic, TrafficHandle, TrafficRole};
