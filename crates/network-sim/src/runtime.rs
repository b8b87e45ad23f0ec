//! Link parameter application
//!
//! Translates declarative link parameters into qdisc configuration.
//! Parameters are fixed once applied; there is no dynamic scheduling.

use log::info;

use crate::qdisc::{NetemConfig, QdiscManager};
use crate::types::{LinkParams, RuntimeError};

impl From<&LinkParams> for NetemConfig {
    fn from(params: &LinkParams) -> Self {
        NetemConfig {
            delay_us: params.delay_us(),
            rate_bps: params.rate_bps(),
            limit_packets: params.max_queue,
        }
    }
}

/// Apply link parameters to a network interface
pub async fn apply_link_params(
    qdisc_manager: &QdiscManager,
    namespace: Option<&str>,
    interface: &str,
    params: &LinkParams,
) -> Result<(), RuntimeError> {
    params.validate()?;

    qdisc_manager
        .configure_interface(namespace, interface, NetemConfig::from(params))
        .await?;

    info!(
        "Applied parameters to {}: {} Mbit/s, {}ms delay, queue {}",
        interface,
        params.bandwidth_mbit,
        params.delay_ms,
        params
            .max_queue
            .map(|q| q.to_string())
            .unwrap_or_else(|| "default".to_string())
    );

    Ok(())
}

/// Remove link shaping from a network interface
pub async fn remove_link_params(
    qdisc_manager: &QdiscManager,
    namespace: Option<&str>,
    interface: &str,
) -> Result<(), RuntimeError> {
    qdisc_manager.clear_interface(namespace, interface).await?;
    Ok(())
}
