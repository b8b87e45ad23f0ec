//! Qdisc management for traffic control

use log::{debug, info, warn};
use std::fmt;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// CAP_NET_ADMIN bit in the capability sets of /proc/<pid>/status
const CAP_NET_ADMIN: u32 = 12;

#[derive(Error, Debug)]
pub enum QdiscError {
    #[error("Command error: {0}")]
    Command(#[from] std::io::Error),

    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Permission denied (requires root privileges)")]
    PermissionDenied,

    #[error("Qdisc kind not supported by this kernel: {0}")]
    Unsupported(String),

    #[error("tc failed: {0}")]
    Failed(String),

    #[error("No backlog counter in qdisc statistics for {0}")]
    NoBacklog(String),
}

/// Network emulation configuration for one interface
#[derive(Debug, Clone, PartialEq)]
pub struct NetemConfig {
    pub delay_us: u32,
    pub rate_bps: u64,
    /// netem queue limit in packets
    pub limit_packets: Option<u32>,
}

impl fmt::Display for NetemConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NetemConfig {{ delay: {}us, rate: {} bps, limit: {} }}",
            self.delay_us,
            self.rate_bps,
            self.limit_packets
                .map(|l| format!("{}p", l))
                .unwrap_or_else(|| "default".to_string())
        )
    }
}

impl NetemConfig {
    /// Root token bucket shaping the interface, or None when unshaped
    pub fn tbf_args(&self, interface: &str) -> Option<Vec<String>> {
        if self.rate_bps == 0 {
            return None;
        }
        let rate_kbit = (self.rate_bps / 1000).max(1);
        // Sensible defaults for burst/latency
        let burst_bytes = 32 * 1024;
        let latency_ms = 50u32;
        Some(vec![
            "qdisc".into(),
            "add".into(),
            "dev".into(),
            interface.into(),
            "root".into(),
            "handle".into(),
            "1:".into(),
            "tbf".into(),
            "rate".into(),
            format!("{}kbit", rate_kbit),
            "burst".into(),
            format!("{}b", burst_bytes),
            "latency".into(),
            format!("{}ms", latency_ms),
        ])
    }

    /// netem stage, attached under the tbf when one exists
    pub fn netem_args(&self, interface: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["qdisc".into(), "add".into(), "dev".into(), interface.into()];
        if self.rate_bps > 0 {
            args.extend(["parent".into(), "1:1".into(), "handle".into(), "10:".into()]);
        } else {
            args.extend(["root".into(), "handle".into(), "10:".into()]);
        }
        args.push("netem".into());
        if self.delay_us > 0 {
            args.push("delay".into());
            args.push(format!("{}us", self.delay_us));
        }
        if let Some(limit) = self.limit_packets {
            args.push("limit".into());
            args.push(limit.to_string());
        }
        args
    }
}

/// Build a `tc` invocation, optionally inside a named network namespace
pub fn tc_command(namespace: Option<&str>) -> Command {
    match namespace {
        Some(ns) => {
            let mut cmd = Command::new("ip");
            cmd.args(["netns", "exec", ns, "tc"]);
            cmd
        }
        None => Command::new("tc"),
    }
}

/// Manager for qdisc traffic control
#[derive(Debug, Clone, Default)]
pub struct QdiscManager {}

impl QdiscManager {
    pub fn new() -> Self {
        Self {}
    }

    /// Whether this process holds CAP_NET_ADMIN
    pub async fn has_net_admin(&self) -> bool {
        match tokio::fs::read_to_string("/proc/self/status").await {
            Ok(status) => parse_cap_eff(&status)
                .map(|caps| caps & (1u64 << CAP_NET_ADMIN) != 0)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Configure network interface with traffic control parameters
    pub async fn configure_interface(
        &self,
        namespace: Option<&str>,
        interface: &str,
        config: NetemConfig,
    ) -> Result<(), QdiscError> {
        info!("Configuring interface {} with {}", interface, config);

        // Best-effort: delete existing root qdisc (ignore failure)
        let del_status = tc_command(namespace)
            .args(["qdisc", "del", "dev", interface, "root"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match del_status {
            Ok(status) if !status.success() => {
                debug!("No existing qdisc to delete on {} ({})", interface, status);
            }
            Ok(_) => debug!("Deleted existing root qdisc on {}", interface),
            Err(e) => warn!("Failed to run tc delete on {}: {}", interface, e),
        }

        if let Some(tbf_args) = config.tbf_args(interface) {
            run_tc(namespace, interface, &tbf_args).await?;
        }

        let netem_args = config.netem_args(interface);
        debug!("Applying netem with args: {:?}", netem_args);
        run_tc(namespace, interface, &netem_args).await
    }

    /// Remove any qdisc configuration from the interface (restore defaults)
    pub async fn clear_interface(
        &self,
        namespace: Option<&str>,
        interface: &str,
    ) -> Result<(), QdiscError> {
        let status = tc_command(namespace)
            .args(["qdisc", "del", "dev", interface, "root"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            debug!("No qdisc to delete on {} or insufficient permissions", interface);
        }
        Ok(())
    }

    /// Instantaneous queue occupancy of the interface root qdisc, in packets
    pub async fn backlog_packets(
        &self,
        namespace: Option<&str>,
        interface: &str,
    ) -> Result<u64, QdiscError> {
        let output = tc_command(namespace)
            .args(["-s", "qdisc", "show", "dev", interface])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(classify_failure(
                interface,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_backlog_packets(&stdout).ok_or_else(|| QdiscError::NoBacklog(interface.to_string()))
    }
}

async fn run_tc(namespace: Option<&str>, interface: &str, args: &[String]) -> Result<(), QdiscError> {
    let output = tc_command(namespace)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(classify_failure(
            interface,
            &String::from_utf8_lossy(&output.stderr),
        ))
    }
}

fn classify_failure(interface: &str, stderr: &str) -> QdiscError {
    if stderr.contains("Cannot find device") || stderr.contains("No such device") {
        QdiscError::InterfaceNotFound(interface.to_string())
    } else if stderr.contains("Operation not permitted") || stderr.contains("Permission denied") {
        QdiscError::PermissionDenied
    } else if stderr.contains("qdisc kind is unknown") || stderr.contains("Unknown qdisc") {
        QdiscError::Unsupported(stderr.trim().to_string())
    } else {
        QdiscError::Failed(stderr.trim().to_string())
    }
}

/// Extract the packet backlog of the first (root) qdisc from `tc -s qdisc show`
///
/// tc prints lines such as ` backlog 45420b 30p requeues 0`.
pub fn parse_backlog_packets(stats: &str) -> Option<u64> {
    stats.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|t| *t == "backlog")?;
        tokens
            .take(2)
            .find_map(|t| t.strip_suffix('p').and_then(|n| n.parse::<u64>().ok()))
    })
}

fn parse_cap_eff(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|hex| u64::from_str_radix(hex.trim(), 16).ok())
}
