//! Experiment configuration
//!
//! An [`ExperimentConfig`] is created once at startup and passed by
//! reference into every component; nothing reads global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExperimentError;

/// Burst schedule of the foreground measurement loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementPlan {
    /// Sequential fetches per burst
    pub burst_size: usize,
    /// Sleep between bursts
    pub inter_burst_ms: u64,
    /// Upper bound for a single fetch
    pub fetch_timeout_ms: u64,
}

impl Default for MeasurementPlan {
    fn default() -> Self {
        Self {
            burst_size: 3,
            inter_burst_ms: 5_000,
            fetch_timeout_ms: 5_000,
        }
    }
}

impl MeasurementPlan {
    pub fn inter_burst(&self) -> Duration {
        Duration::from_millis(self.inter_burst_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Sampling intervals and grace periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub queue_interval_ms: u64,
    /// How long the web responder may take to answer its first fetch
    pub responder_grace_ms: u64,
    /// How long a process may take to honor SIGTERM before SIGKILL
    pub stop_grace_ms: u64,
    /// Wait after launching traffic before checking for early exits
    pub settle_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            queue_interval_ms: 100,
            responder_grace_ms: 3_000,
            stop_grace_ms: 1_000,
            settle_ms: 500,
        }
    }
}

impl Timing {
    pub fn queue_interval(&self) -> Duration {
        Duration::from_millis(self.queue_interval_ms)
    }

    pub fn responder_grace(&self) -> Duration {
        Duration::from_millis(self.responder_grace_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Static page served by the server host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
    pub page_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 80,
            page_bytes: 100 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Server link bandwidth (Mb/s)
    pub bw_server: f64,
    /// Attacker link bandwidth (Mb/s)
    pub bw_attacker: f64,
    /// Innocent link bandwidth (Mb/s)
    pub bw_innocent: f64,
    /// Per-link propagation delay (ms)
    pub delay_ms: f64,
    /// Queue depth of the innocent link (packets)
    pub max_queue: u32,
    pub duration_secs: u64,
    pub congestion_control: String,
    pub output_dir: PathBuf,
    /// Launch the competing attacker flow
    #[serde(default)]
    pub attacker_flow: bool,
    #[serde(default = "default_prefix")]
    pub namespace_prefix: String,
    #[serde(default)]
    pub measurement: MeasurementPlan,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub web: WebConfig,
}

fn default_prefix() -> String {
    "bb".to_string()
}

impl ExperimentConfig {
    /// Defaults for every parameter except the output directory
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            bw_server: 1.5,
            bw_attacker: 1.5,
            bw_innocent: 1.5,
            delay_ms: 3.0,
            max_queue: 100,
            duration_secs: 10,
            congestion_control: "reno".to_string(),
            output_dir: output_dir.into(),
            attacker_flow: false,
            namespace_prefix: default_prefix(),
            measurement: MeasurementPlan::default(),
            timing: Timing::default(),
            web: WebConfig::default(),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn from_json(json: &str) -> Result<Self, ExperimentError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ExperimentError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, ExperimentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn output_path(&self, file: &str) -> PathBuf {
        self.output_dir.join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_surface() {
        let config = ExperimentConfig::new("out");
        assert_eq!(config.bw_server, 1.5);
        assert_eq!(config.bw_attacker, 1.5);
        assert_eq!(config.bw_innocent, 1.5);
        assert_eq!(config.delay_ms, 3.0);
        assert_eq!(config.duration(), Duration::from_secs(10));
        assert_eq!(config.max_queue, 100);
        assert_eq!(config.congestion_control, "reno");
        assert!(!config.attacker_flow);
        assert_eq!(config.measurement.burst_size, 3);
        assert_eq!(config.measurement.inter_burst(), Duration::from_secs(5));
        assert_eq!(config.timing.queue_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_json_roundtrip_preserves_values() {
        let config = ExperimentConfig {
            bw_innocent: 1.0,
            max_queue: 20,
            ..ExperimentConfig::new("/tmp/bb")
        };
        let parsed = ExperimentConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_nested_sections_default_when_missing() {
        let json = r#"{
            "bw_server": 10.0, "bw_attacker": 10.0, "bw_innocent": 1.0,
            "delay_ms": 3.0, "max_queue": 20, "duration_secs": 6,
            "congestion_control": "cubic", "output_dir": "out",
            "measurement": { "burst_size": 5 }
        }"#;
        let config = ExperimentConfig::from_json(json).unwrap();
        assert_eq!(config.measurement.burst_size, 5);
        assert_eq!(config.measurement.inter_burst_ms, 5_000);
        assert_eq!(config.timing, Timing::default());
        assert_eq!(config.web.port, 80);
        assert_eq!(config.namespace_prefix, "bb");
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            ExperimentConfig::from_json("{ not json"),
            Err(ExperimentError::Serialization(_))
        ));
    }
}
