//! Emulated network built from a [`TopologySpec`] (Linux only)
//!
//! Every node lives in its own network namespace. A switch is a Linux
//! bridge inside its namespace, each link is a veth pair whose ends are
//! shaped with tbf + netem.

#![cfg(target_os = "linux")]

use std::net::Ipv4Addr;
use std::process::{Output, Stdio};

use log::{debug, info, warn};
use tokio::process::Command;

use crate::link::{VethPair, VethPairConfig};
use crate::nsapi::Namespace;
use crate::qdisc::QdiscManager;
use crate::topo::{NodeKind, TopologySpec};
use crate::types::{LinkParams, RuntimeError};

/// Naming and addressing choices for an emulated network
#[derive(Debug, Clone)]
pub struct NetworkOptions {
    /// Prefix for namespace names; stale namespaces with this prefix are removed on start
    pub prefix: String,
    /// First three octets of the host subnet
    pub subnet: [u8; 3],
    pub prefix_len: u8,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            prefix: "bb".to_string(),
            subnet: [10, 0, 0],
            prefix_len: 24,
        }
    }
}

/// A host or switch of the emulated network
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    kind: NodeKind,
    namespace: Option<Namespace>,
    ip: Option<Ipv4Addr>,
    interface: Option<String>,
}

impl Node {
    /// A node that runs commands in the caller's own namespace
    pub fn local(name: impl Into<String>, ip: Option<Ipv4Addr>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Host,
            namespace: None,
            ip,
            interface: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.ip
    }

    /// Host interface or switch bridge name
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn namespace_name(&self) -> Option<&str> {
        self.namespace.as_ref().map(Namespace::name)
    }

    /// Build a command that runs `program` on this node
    pub fn command(&self, program: &str) -> Command {
        match &self.namespace {
            Some(ns) => ns.command(program),
            None => Command::new(program),
        }
    }

    pub async fn exec(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
        self.command(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
    }
}

#[derive(Debug, Clone)]
struct PlannedLink {
    host: String,
    switch: String,
    host_if: String,
    switch_if: String,
    params: LinkParams,
}

/// Result of an all-pairs reachability check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingSummary {
    pub sent: usize,
    pub received: usize,
}

impl PingSummary {
    pub fn dropped_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            100.0 * (self.sent - self.received) as f64 / self.sent as f64
        }
    }
}

/// Running (or ready to run) emulated network
pub struct Network {
    options: NetworkOptions,
    nodes: Vec<Node>,
    links: Vec<PlannedLink>,
    veths: Vec<VethPair>,
    qdisc: QdiscManager,
    /// Namespaces may exist and must be removed on stop
    provisioned: bool,
    running: bool,
}

impl Network {
    /// Plan names and addresses for `spec`; nothing is created until [`Network::start`]
    pub fn instantiate(spec: TopologySpec, options: NetworkOptions) -> Result<Self, RuntimeError> {
        spec.validate()?;

        let mut nodes = Vec::with_capacity(spec.nodes.len());
        let mut host_index = 0u8;
        for node in &spec.nodes {
            let namespace = Namespace::from_existing(format!("{}-{}", options.prefix, node.name));
            let (ip, interface) = match node.kind {
                NodeKind::Host => {
                    host_index = host_index.checked_add(1).ok_or_else(|| {
                        RuntimeError::InvalidParams("too many hosts for one subnet".to_string())
                    })?;
                    let [a, b, c] = options.subnet;
                    (
                        Some(Ipv4Addr::new(a, b, c, host_index)),
                        Some(format!("{}-eth0", node.name)),
                    )
                }
                NodeKind::Switch => (None, Some(node.name.clone())),
            };
            nodes.push(Node {
                name: node.name.clone(),
                kind: node.kind,
                namespace: Some(namespace),
                ip,
                interface,
            });
        }

        let mut links = Vec::with_capacity(spec.links.len());
        for link in &spec.links {
            let port = links.iter().filter(|l: &&PlannedLink| l.switch == link.switch).count() + 1;
            links.push(PlannedLink {
                host: link.host.clone(),
                switch: link.switch.clone(),
                host_if: format!("{}-eth0", link.host),
                switch_if: format!("{}-eth{}", link.switch, port),
                params: link.params.clone(),
            });
        }

        Ok(Self {
            options,
            nodes,
            links,
            veths: Vec::new(),
            qdisc: QdiscManager::new(),
            provisioned: false,
            running: false,
        })
    }

    pub fn is_started(&self) -> bool {
        self.running
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Host)
    }

    /// The switch a host hangs off and the switch-side port facing it
    pub fn switch_port(&self, host: &str) -> Option<(&Node, &str)> {
        let link = self.links.iter().find(|l| l.host == host)?;
        let switch = self.node(&link.switch)?;
        Some((switch, link.switch_if.as_str()))
    }

    /// One line per host: `name host-if:switch-port`
    pub fn dump_connections(&self) -> Vec<String> {
        self.links
            .iter()
            .map(|l| format!("{} {}:{}", l.host, l.host_if, l.switch_if))
            .collect()
    }

    fn namespace_of(&self, name: &str) -> Result<Namespace, RuntimeError> {
        self.node(name)
            .and_then(|n| n.namespace.clone())
            .ok_or_else(|| RuntimeError::UnknownNode(name.to_string()))
    }

    /// Remove namespaces left behind by an earlier run with the same prefix
    pub async fn cleanup_stale(&self) -> usize {
        let prefix = format!("{}-", self.options.prefix);
        let stale = match Namespace::list_with_prefix(&prefix).await {
            Ok(names) => names,
            Err(e) => {
                warn!("Could not list namespaces: {}", e);
                return 0;
            }
        };
        for name in &stale {
            debug!("Force cleaning stale namespace: {}", name);
            let _ = Namespace::from_existing(name.clone()).delete().await;
        }
        stale.len()
    }

    /// Create namespaces, bridges and shaped links
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        if self.running {
            return Ok(());
        }

        let cleaned = self.cleanup_stale().await;
        if cleaned > 0 {
            info!("Cleaned up {} stale namespaces", cleaned);
        }

        self.provisioned = true;
        for node in &self.nodes {
            let Some(ns) = &node.namespace else { continue };
            let ns = Namespace::ensure(ns.name().to_string()).await?;
            if node.kind == NodeKind::Switch {
                ns.exec_ok("ip", &["link", "add", "name", &node.name, "type", "bridge"])
                    .await?;
                ns.exec_ok("ip", &["link", "set", &node.name, "up"]).await?;
            }
            debug!("Created node {} in {}", node.name, ns.name());
        }

        let links = self.links.clone();
        for link in &links {
            let host = self
                .node(&link.host)
                .ok_or_else(|| RuntimeError::UnknownNode(link.host.clone()))?;
            let ip = host
                .ip
                .ok_or_else(|| RuntimeError::InvalidParams(format!("{} has no address", host.name)))?;
            let cfg = VethPairConfig {
                host_if: link.host_if.clone(),
                switch_if: link.switch_if.clone(),
                host_ns: self.namespace_of(&link.host)?,
                switch_ns: self.namespace_of(&link.switch)?,
                bridge: link.switch.clone(),
                host_ip_cidr: format!("{}/{}", ip, self.options.prefix_len),
                params: link.params.clone(),
            };
            let pair = VethPair::create(&self.qdisc, &cfg).await?;
            self.veths.push(pair);
        }

        self.running = true;
        info!(
            "Network started: {} nodes, {} links",
            self.nodes.len(),
            self.links.len()
        );
        Ok(())
    }

    /// Tear the network down; safe to call repeatedly
    pub async fn stop(&mut self) -> Result<(), RuntimeError> {
        if !self.provisioned {
            return Ok(());
        }
        for pair in self.veths.drain(..) {
            let _ = pair.delete().await;
        }
        for node in &self.nodes {
            if let Some(ns) = &node.namespace {
                if let Err(e) = ns.delete().await {
                    debug!("Namespace {} may not exist: {}", ns.name(), e);
                }
            }
        }
        self.provisioned = false;
        self.running = false;
        info!("Network stopped");
        Ok(())
    }

    /// Ping every ordered pair of hosts once
    pub async fn ping_all(&self) -> Result<PingSummary, RuntimeError> {
        if !self.running {
            return Err(RuntimeError::NotStarted);
        }
        let mut summary = PingSummary::default();
        for src in self.hosts() {
            for dst in self.hosts().filter(|d| d.name != src.name) {
                let Some(ip) = dst.ip else { continue };
                summary.sent += 1;
                let out = src
                    .exec("ping", &["-c", "1", "-W", "1", &ip.to_string()])
                    .await?;
                if out.status.success() {
                    summary.received += 1;
                } else {
                    debug!("{} -> {} unreachable", src.name, dst.name);
                }
            }
        }
        info!(
            "Results: {:.0}% dropped ({}/{} received)",
            summary.dropped_pct(),
            summary.received,
            summary.sent
        );
        Ok(summary)
    }

    /// Set a sysctl in the root namespace and in every host namespace
    pub async fn sysctl(&self, key: &str, value: &str) -> Result<(), RuntimeError> {
        let assignment = format!("{}={}", key, value);
        let mut failures = Vec::new();

        let root = Command::new("sysctl")
            .args(["-w", &assignment])
            .stdout(Stdio::null())
            .output()
            .await?;
        if !root.status.success() {
            failures.push(format!(
                "root: {}",
                String::from_utf8_lossy(&root.stderr).trim()
            ));
        }

        if self.provisioned {
            for host in self.hosts() {
                let out = host.exec("sysctl", &["-w", &assignment]).await?;
                if !out.status.success() {
                    failures.push(format!(
                        "{}: {}",
                        host.name,
                        String::from_utf8_lossy(&out.stderr).trim()
                    ));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::CommandFailed(format!(
                "sysctl {}: {}",
                assignment,
                failures.join("; ")
            )))
        }
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        // Best-effort synchronous cleanup without requiring a Tokio runtime
        if self.provisioned {
            for node in &self.nodes {
                if let Some(ns) = &node.namespace {
                    ns.delete_blocking();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TopologySpec {
        let mut spec = TopologySpec::new();
        spec.add_switch("s0")
            .add_host("attacker")
            .add_host("innocent")
            .add_host("server")
            .add_link("attacker", "s0", LinkParams::new(1.5, 3.0))
            .add_link("innocent", "s0", LinkParams::new(1.5, 3.0).with_max_queue(100))
            .add_link("server", "s0", LinkParams::new(1.5, 3.0));
        spec
    }

    #[test]
    fn test_instantiate_plans_names_and_addresses() {
        let net = Network::instantiate(spec(), NetworkOptions::default()).unwrap();
        assert!(!net.is_started());

        let innocent = net.node("innocent").unwrap();
        assert_eq!(innocent.ip(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(innocent.interface(), Some("innocent-eth0"));
        assert_eq!(innocent.namespace_name(), Some("bb-innocent"));

        let (switch, port) = net.switch_port("innocent").unwrap();
        assert_eq!(switch.name(), "s0");
        assert_eq!(port, "s0-eth2");
        assert_eq!(net.hosts().count(), 3);
        assert!(net.node("s0").unwrap().ip().is_none());
    }

    #[test]
    fn test_dump_connections() {
        let net = Network::instantiate(spec(), NetworkOptions::default()).unwrap();
        assert_eq!(
            net.dump_connections(),
            vec![
                "attacker attacker-eth0:s0-eth1",
                "innocent innocent-eth0:s0-eth2",
                "server server-eth0:s0-eth3",
            ]
        );
    }

    #[test]
    fn test_instantiate_rejects_invalid_spec() {
        let mut bad = spec();
        bad.links[0].params.bandwidth_mbit = 0.0;
        assert!(Network::instantiate(bad, NetworkOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut net = Network::instantiate(spec(), NetworkOptions::default()).unwrap();
        assert!(net.stop().await.is_ok());
        assert!(net.stop().await.is_ok());
        assert!(matches!(net.ping_all().await, Err(RuntimeError::NotStarted)));
    }

    #[test]
    fn test_local_node_runs_in_caller_namespace() {
        let node = Node::local("probe", None);
        assert_eq!(node.namespace_name(), None);
        assert_eq!(node.command("true").as_std().get_program(), "true");
    }
}
