//! Traffic generators and probes launched on the emulated hosts

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use network_sim::{Network, Node};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, Result};
use crate::fetch::Fetcher;
use crate::process::{ProcessHandle, StopOutcome};
use crate::topology::{Role, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficRole {
    /// Static HTTP server answering the measurement fetches
    WebServer,
    /// iperf sink for the bulk flows
    BulkServer,
    /// Long-lived flow from the innocent host
    BulkFlow,
    /// Competing flow from the attacker host
    AttackerFlow,
    /// Continuous ping from the innocent host
    LatencyProbe,
}

impl TrafficRole {
    pub const ALL: [TrafficRole; 5] = [
        TrafficRole::WebServer,
        TrafficRole::BulkServer,
        TrafficRole::BulkFlow,
        TrafficRole::AttackerFlow,
        TrafficRole::LatencyProbe,
    ];

    /// Host the process runs on
    pub fn source(self) -> Role {
        match self {
            TrafficRole::WebServer | TrafficRole::BulkServer => Role::Server,
            TrafficRole::BulkFlow | TrafficRole::LatencyProbe => Role::Innocent,
            TrafficRole::AttackerFlow => Role::Attacker,
        }
    }

    /// Host the traffic is aimed at, if any
    pub fn target(self) -> Option<Role> {
        match self {
            TrafficRole::WebServer | TrafficRole::BulkServer => None,
            _ => Some(Role::Server),
        }
    }

    /// Command-line fragment identifying this role's processes system-wide
    pub fn kill_pattern(self) -> &'static str {
        match self {
            TrafficRole::WebServer => "http.server",
            TrafficRole::BulkServer => "iperf -s",
            TrafficRole::BulkFlow | TrafficRole::AttackerFlow => "iperf -c",
            TrafficRole::LatencyProbe => "ping -i",
        }
    }

    fn label(self) -> &'static str {
        match self {
            TrafficRole::WebServer => "webserver",
            TrafficRole::BulkServer => "iperf-server",
            TrafficRole::BulkFlow => "iperf-innocent",
            TrafficRole::AttackerFlow => "iperf-attacker",
            TrafficRole::LatencyProbe => "ping",
        }
    }
}

impl std::fmt::Display for TrafficRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug)]
pub struct TrafficHandle {
    role: TrafficRole,
    command: String,
    target: Option<String>,
    process: ProcessHandle,
}

impl TrafficHandle {
    pub fn from_process(role: TrafficRole, target: Option<String>, process: ProcessHandle) -> Self {
        Self {
            role,
            command: process.command_line().to_string(),
            target,
            process,
        }
    }

    pub fn role(&self) -> TrafficRole {
        self.role
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Name of the target host
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn kill_pattern(&self) -> &'static str {
        self.role.kill_pattern()
    }

    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        self.process.try_exit()
    }

    pub fn is_stopped(&self) -> bool {
        self.process.is_stopped()
    }

    pub async fn stop(&mut self, grace: Duration) -> StopOutcome {
        self.process.stop(grace).await
    }
}

fn host<'a>(network: &'a Network, topology: &Topology, role: Role) -> Result<&'a Node> {
    let name = topology
        .host(role)
        .map(|h| h.name.as_str())
        .unwrap_or(role.host_name());
    network
        .node(name)
        .ok_or_else(|| ExperimentError::Precondition(format!("no host for role {}", role)))
}

fn address(node: &Node) -> Result<Ipv4Addr> {
    node.ip()
        .ok_or_else(|| ExperimentError::Precondition(format!("{} has no address", node.name())))
}

pub fn web_url(server: Ipv4Addr, port: u16) -> String {
    if port == 80 {
        format!("http://{}/index.html", server)
    } else {
        format!("http://{}:{}/index.html", server, port)
    }
}

pub fn webroot(config: &ExperimentConfig) -> PathBuf {
    config.output_path("www")
}

/// Page of exactly `bytes` bytes
pub fn page_body(bytes: usize) -> String {
    const HEAD: &str = "<!DOCTYPE html>\n<html><body><pre>\n";
    const TAIL: &str = "</pre></body></html>\n";
    if bytes < HEAD.len() + TAIL.len() {
        return "x".repeat(bytes);
    }
    let mut body = String::with_capacity(bytes);
    body.push_str(HEAD);
    let fill = bytes - HEAD.len() - TAIL.len();
    for i in 0..fill {
        body.push(if i % 64 == 63 { '\n' } else { 'x' });
    }
    body.push_str(TAIL);
    body
}

/// Write the page served to the measurement fetches
pub async fn prepare_webroot(config: &ExperimentConfig) -> Result<PathBuf> {
    let root = webroot(config);
    tokio::fs::create_dir_all(&root).await?;
    tokio::fs::write(root.join("index.html"), page_body(config.web.page_bytes)).await?;
    Ok(root)
}

/// Launch the process for `role` on its host without waiting for it
pub fn start_traffic(
    role: TrafficRole,
    config: &ExperimentConfig,
    network: &Network,
    topology: &Topology,
) -> Result<TrafficHandle> {
    if !network.is_started() {
        return Err(ExperimentError::Precondition(format!(
            "{} started before the network",
            role
        )));
    }

    let source = host(network, topology, role.source())?;
    let server = host(network, topology, Role::Server)?;
    let server_ip = address(server)?.to_string();
    let duration = config.duration_secs.to_string();

    let mut stdout = None;
    let cmd = match role {
        TrafficRole::WebServer => {
            let mut cmd = source.command("python3");
            cmd.args(["-m", "http.server", &config.web.port.to_string()])
                .args(["--bind", &server_ip])
                .arg("--directory")
                .arg(webroot(config));
            cmd
        }
        TrafficRole::BulkServer => {
            let mut cmd = source.command("iperf");
            cmd.args(["-s", "-w", "16m"]);
            cmd
        }
        TrafficRole::BulkFlow | TrafficRole::AttackerFlow => {
            let mut cmd = source.command("iperf");
            cmd.args(["-c", &server_ip, "-t", &duration]);
            cmd
        }
        TrafficRole::LatencyProbe => {
            stdout = Some(config.output_path("ping.txt"));
            let mut cmd = source.command("ping");
            cmd.args(["-i", "0.1", "-w", &duration, &server_ip]);
            cmd
        }
    };

    let process = ProcessHandle::spawn(role.label(), cmd, stdout.as_deref()).map_err(|e| {
        ExperimentError::Launch {
            role: role.to_string(),
            source: e,
        }
    })?;
    let target = role.target().map(|r| r.host_name().to_string());
    info!(role = %role, host = source.name(), pid = process.pid(), "traffic started");
    Ok(TrafficHandle::from_process(role, target, process))
}

/// Warn about every process that has already exited; returns them
pub fn check_early_exits(handles: &mut [TrafficHandle]) -> Vec<(TrafficRole, ExitStatus)> {
    let mut exited = Vec::new();
    for handle in handles.iter_mut() {
        if let Some(status) = handle.try_exit() {
            warn!(
                role = %handle.role(),
                command = handle.command(),
                %status,
                "traffic process exited early"
            );
            exited.push((handle.role(), status));
        }
    }
    exited
}

/// Poll the responder until one fetch succeeds or `grace` runs out
pub async fn wait_for_responder(
    fetcher: &dyn Fetcher,
    grace: Duration,
    poll: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        match fetcher.fetch().await {
            Ok(latency) => {
                debug!(endpoint = %fetcher.endpoint(), latency, "responder reachable");
                return Ok(());
            }
            Err(e) if start.elapsed() >= grace => {
                return Err(ExperimentError::DependencyUnavailable(format!(
                    "{} unreachable after {:?}: {}",
                    fetcher.endpoint(),
                    grace,
                    e
                )));
            }
            Err(e) => debug!("responder not ready: {}", e),
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::topology;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyFetcher {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn fetch(&self) -> std::result::Result<f64, FetchError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                Err(FetchError::Failed("connection refused".to_string()))
            } else {
                Ok(0.01)
            }
        }

        fn endpoint(&self) -> String {
            "http://10.0.0.3/index.html".to_string()
        }
    }

    #[test]
    fn test_role_endpoints_and_patterns() {
        assert_eq!(TrafficRole::WebServer.source(), Role::Server);
        assert_eq!(TrafficRole::WebServer.target(), None);
        assert_eq!(TrafficRole::BulkFlow.source(), Role::Innocent);
        assert_eq!(TrafficRole::AttackerFlow.source(), Role::Attacker);
        assert_eq!(TrafficRole::LatencyProbe.target(), Some(Role::Server));
        assert_eq!(TrafficRole::BulkServer.kill_pattern(), "iperf -s");
        assert_eq!(TrafficRole::AttackerFlow.kill_pattern(), "iperf -c");
        assert_eq!(TrafficRole::ALL.len(), 5);
    }

    #[test]
    fn test_web_url() {
        let ip = Ipv4Addr::new(10, 0, 0, 3);
        assert_eq!(web_url(ip, 80), "http://10.0.0.3/index.html");
        assert_eq!(web_url(ip, 8080), "http://10.0.0.3:8080/index.html");
    }

    #[test]
    fn test_page_body_has_exact_size() {
        assert_eq!(page_body(100 * 1024).len(), 100 * 1024);
        assert_eq!(page_body(10), "x".repeat(10));
        assert!(page_body(4096).starts_with("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn test_prepare_webroot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExperimentConfig::new(dir.path());
        config.web.page_bytes = 2048;
        let root = prepare_webroot(&config).await.unwrap();
        assert_eq!(std::fs::metadata(root.join("index.html")).unwrap().len(), 2048);
    }

    #[test]
    fn test_start_before_network_is_precondition_error() {
        let config = ExperimentConfig::new("out");
        let topo = topology::build(&config).unwrap();
        let network =
            Network::instantiate(topo.spec(), network_sim::NetworkOptions::default()).unwrap();
        let err = start_traffic(TrafficRole::BulkFlow, &config, &network, &topo).unwrap_err();
        assert!(matches!(err, ExperimentError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_check_early_exits() {
        let mut handles = vec![
            TrafficHandle::from_process(
                TrafficRole::BulkFlow,
                Some("server".to_string()),
                ProcessHandle::spawn("gone", tokio::process::Command::new("false"), None).unwrap(),
            ),
            TrafficHandle::from_process(
                TrafficRole::LatencyProbe,
                Some("server".to_string()),
                ProcessHandle::spawn("alive", {
                    let mut cmd = tokio::process::Command::new("sleep");
                    cmd.arg("303.5");
                    cmd
                }, None)
                .unwrap(),
            ),
        ];
        tokio::time::sleep(Duration::from_millis(300)).await;

        let exited = check_early_exits(&mut handles);
        assert_eq!(exited.len(), 1);
        assert_eq!(exited[0].0, TrafficRole::BulkFlow);
        assert!(!exited[0].1.success());

        for handle in &mut handles {
            handle.stop(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_responder_tolerates_slow_start() {
        let fetcher = FlakyFetcher {
            failures_left: AtomicUsize::new(3),
        };
        let res =
            wait_for_responder(&fetcher, Duration::from_secs(3), Duration::from_millis(200)).await;
        assert!(res.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_responder_gives_up() {
        let fetcher = FlakyFetcher {
            failures_left: AtomicUsize::new(usize::MAX),
        };
        let res =
            wait_for_responder(&fetcher, Duration::from_secs(3), Duration::from_millis(200)).await;
        assert!(matches!(res, Err(ExperimentError::DependencyUnavailable(_))));
    }
}
