//! Error types for the experiment orchestrator

use std::path::PathBuf;

use thiserror::Error;

/// Invalid link parameters; raised before anything touches the system
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    #[error("{field} must be positive and finite, got {value}")]
    NonPositive { field: &'static str, value: f64 },
}

/// One fetch attempt failed; the sample is dropped
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to launch fetch: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Fetch timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Fetch failed: {0}")]
    Failed(String),

    #[error("Unparseable fetch output: {0:?}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Invalid topology: {0}")]
    Topology(#[from] TopologyError),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Failed to launch {role}: {source}")]
    Launch {
        role: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot use output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Emulation platform error: {0}")]
    Platform(#[from] network_sim::RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Experiment aborted")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, ExperimentError>;
