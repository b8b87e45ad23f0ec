//! Veth link management across namespaces (Linux only)

#![cfg(target_os = "linux")]

use crate::nsapi::Namespace;
use crate::qdisc::QdiscManager;
use crate::runtime;
use crate::types::{LinkParams, RuntimeError};
use std::process::Stdio;
use tokio::process::Command;

/// One host-to-switch link: host end addressed, switch end enslaved to the bridge
#[derive(Debug, Clone)]
pub struct VethPairConfig {
    pub host_if: String,
    pub switch_if: String,
    pub host_ns: Namespace,
    pub switch_ns: Namespace,
    pub bridge: String,
    pub host_ip_cidr: String,
    pub params: LinkParams,
}

#[derive(Debug, Clone)]
pub struct VethPair {
    pub host_if: String,
    pub switch_if: String,
    pub host_ns: Namespace,
    pub switch_ns: Namespace,
}

impl VethPair {
    pub async fn create(qdisc: &QdiscManager, cfg: &VethPairConfig) -> Result<Self, RuntimeError> {
        // Both ends are created directly inside their namespaces, so names
        // never collide with interfaces in the root namespace.
        exec_ok(
            "ip",
            &[
                "link",
                "add",
                &cfg.host_if,
                "netns",
                cfg.host_ns.name(),
                "type",
                "veth",
                "peer",
                "name",
                &cfg.switch_if,
                "netns",
                cfg.switch_ns.name(),
            ],
        )
        .await?;

        cfg.switch_ns
            .exec_ok("ip", &["link", "set", &cfg.switch_if, "master", &cfg.bridge])
            .await?;
        cfg.switch_ns
            .exec_ok("ip", &["link", "set", &cfg.switch_if, "up"])
            .await?;

        cfg.host_ns
            .exec_ok("ip", &["addr", "add", &cfg.host_ip_cidr, "dev", &cfg.host_if])
            .await?;
        cfg.host_ns
            .exec_ok("ip", &["link", "set", &cfg.host_if, "up"])
            .await?;

        // Shape both directions with the same parameters
        for (ns, iface) in [(&cfg.host_ns, &cfg.host_if), (&cfg.switch_ns, &cfg.switch_if)] {
            runtime::apply_link_params(qdisc, Some(ns.name()), iface, &cfg.params).await?;
        }

        Ok(Self {
            host_if: cfg.host_if.clone(),
            switch_if: cfg.switch_if.clone(),
            host_ns: cfg.host_ns.clone(),
            switch_ns: cfg.switch_ns.clone(),
        })
    }

    pub async fn delete(self) -> std::io::Result<()> {
        // Deleting one end drops both
        let _ = self
            .host_ns
            .command("ip")
            .args(["link", "del", "dev", &self.host_if])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(())
    }
}

async fn exec_ok(cmd: &str, args: &[&str]) -> std::io::Result<()> {
    let out = Command::new(cmd).args(args).output().await?;
    if out.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&out.stderr);
        Err(std::io::Error::other(format!(
            "{} {:?} failed: {}",
            cmd, args, stderr
        )))
    }
}
