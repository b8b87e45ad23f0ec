//! Type definitions for network emulation

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Qdisc error: {0}")]
    Qdisc(#[from] crate::qdisc::QdiscError),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Network has not been started")]
    NotStarted,
}

impl RuntimeError {
    /// The kernel lacks a qdisc kind needed for shaping (sch_tbf, sch_netem)
    pub fn is_unsupported_qdisc(&self) -> bool {
        matches!(
            self,
            RuntimeError::Qdisc(crate::qdisc::QdiscError::Unsupported(_))
        )
    }
}

/// Shaping applied to both ends of an emulated link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkParams {
    /// Bandwidth in megabits per second
    pub bandwidth_mbit: f64,
    /// One-way propagation delay in milliseconds
    pub delay_ms: f64,
    /// Queue depth limit in packets (None = qdisc default)
    pub max_queue: Option<u32>,
}

impl LinkParams {
    pub fn new(bandwidth_mbit: f64, delay_ms: f64) -> Self {
        Self {
            bandwidth_mbit,
            delay_ms,
            max_queue: None,
        }
    }

    pub fn with_max_queue(mut self, packets: u32) -> Self {
        self.max_queue = Some(packets);
        self
    }

    /// Reject values the kernel shaper cannot express
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if !(self.bandwidth_mbit.is_finite() && self.bandwidth_mbit > 0.0) {
            return Err(RuntimeError::InvalidParams(format!(
                "bandwidth must be positive, got {} Mbit/s",
                self.bandwidth_mbit
            )));
        }
        if !(self.delay_ms.is_finite() && self.delay_ms > 0.0) {
            return Err(RuntimeError::InvalidParams(format!(
                "delay must be positive, got {} ms",
                self.delay_ms
            )));
        }
        if self.max_queue == Some(0) {
            return Err(RuntimeError::InvalidParams(
                "queue limit must be at least one packet".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rate_bps(&self) -> u64 {
        (self.bandwidth_mbit * 1_000_000.0).round() as u64
    }

    pub fn delay_us(&self) -> u32 {
        (self.delay_ms * 1000.0).round() as u32
    }
}
