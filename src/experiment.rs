//! One bufferbloat run from topology to teardown

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use network_sim::{Network, NetworkOptions};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, Result};
use crate::fetch::{CurlFetcher, Fetcher};
use crate::measure::{self, MeasurementReport};
use crate::monitor::{start_monitor, CwndSource, MonitorHandle, MonitorParams};
use crate::teardown::{sweep, sweep_patterns, teardown, TeardownReport};
use crate::topology::{self, Role, Topology};
use crate::traffic::{self, start_traffic, TrafficHandle, TrafficRole};

const RESPONDER_POLL: Duration = Duration::from_millis(200);

pub type Timestamp = DateTime<Utc>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub measurement: MeasurementReport,
    /// Traffic processes found dead shortly after launch
    pub early_exits: Vec<TrafficRole>,
    /// Packet loss of the all-pairs ping after start, in percent
    pub connectivity_drop_pct: Option<f64>,
    pub teardown: TeardownReport,
}

/// Everything started so far; released by [`Session::close`] or, failing that, on drop
#[derive(Default)]
struct Session {
    network: Option<Network>,
    monitors: Vec<MonitorHandle>,
    traffic: Vec<TrafficHandle>,
    early_exits: Vec<TrafficRole>,
    connectivity_drop_pct: Option<f64>,
    closed: bool,
}

impl Session {
    async fn close(&mut self, grace: Duration) -> TeardownReport {
        let report = teardown(
            &mut self.monitors,
            &mut self.traffic,
            self.network.as_mut(),
            grace,
        )
        .await;
        self.closed = true;
        report
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Child processes die with their handles and the network removes its
        // namespaces on drop; this only catches helpers forked behind our back
        warn!("run ended without teardown, sweeping processes");
        sweep(&sweep_patterns(&self.monitors));
    }
}

pub struct Experiment {
    config: ExperimentConfig,
}

impl Experiment {
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Run to completion; teardown happens on every path past topology construction
    pub async fn run(&self) -> Result<ExperimentReport> {
        let config = &self.config;
        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(|source| ExperimentError::OutputDir {
                path: config.output_dir.clone(),
                source,
            })?;
        let topology = topology::build(config)?;
        write_json(&config.output_path("config.json"), config).await?;

        let started_at = Utc::now();
        let mut session = Session::default();
        let outcome = until_interrupted(self.drive(&topology, &mut session), interrupted()).await;
        self.conclude(started_at, session, outcome).await
    }

    /// Tear the session down and, if the run succeeded, write the summary
    async fn conclude(
        &self,
        started_at: Timestamp,
        mut session: Session,
        outcome: Result<MeasurementReport>,
    ) -> Result<ExperimentReport> {
        let config = &self.config;
        let teardown = session.close(config.timing.stop_grace()).await;

        let measurement = match outcome {
            Ok(measurement) => measurement,
            Err(e) => {
                error!("Experiment failed: {}", e);
                return Err(e);
            }
        };

        let report = ExperimentReport {
            started_at,
            finished_at: Utc::now(),
            measurement,
            early_exits: std::mem::take(&mut session.early_exits),
            connectivity_drop_pct: session.connectivity_drop_pct,
            teardown,
        };
        write_json(&config.output_path("summary.json"), &report).await?;
        Ok(report)
    }

    async fn drive(&self, topology: &Topology, session: &mut Session) -> Result<MeasurementReport> {
        let config = &self.config;
        let options = NetworkOptions {
            prefix: config.namespace_prefix.clone(),
            ..NetworkOptions::default()
        };
        let network = session
            .network
            .insert(Network::instantiate(topology.spec(), options)?);
        network.start().await?;

        if let Err(e) = network
            .sysctl("net.ipv4.tcp_congestion_control", &config.congestion_control)
            .await
        {
            warn!("Could not select congestion control {}: {}", config.congestion_control, e);
        }

        for line in network.dump_connections() {
            info!("{}", line);
        }
        match network.ping_all().await {
            Ok(summary) => {
                if summary.received < summary.sent {
                    warn!("Connectivity check lost {:.0}% of pings", summary.dropped_pct());
                }
                session.connectivity_drop_pct = Some(summary.dropped_pct());
            }
            Err(e) => warn!("Connectivity check failed: {}", e),
        }

        // Monitors first, so the flows are observed from their first packet
        match start_monitor(MonitorParams::CongestionWindow {
            source: CwndSource::detect(),
            output: config.output_path("cwnd.txt"),
        })
        .await
        {
            Ok(handle) => session.monitors.push(handle),
            Err(e) => warn!("Congestion-window monitor unavailable: {}", e),
        }

        let innocent = Role::Innocent.host_name();
        let (switch, port) = network.switch_port(innocent).ok_or_else(|| {
            ExperimentError::Precondition(format!("no switch port facing {}", innocent))
        })?;
        session.monitors.push(
            start_monitor(MonitorParams::QueueLength {
                namespace: switch.namespace_name().map(str::to_string),
                interface: port.to_string(),
                interval: config.timing.queue_interval(),
                output: config.output_path("q.txt"),
            })
            .await?,
        );

        traffic::prepare_webroot(config).await?;
        session
            .traffic
            .push(start_traffic(TrafficRole::WebServer, config, network, topology)?);

        let client = network
            .node(innocent)
            .ok_or_else(|| ExperimentError::Precondition(format!("no host {}", innocent)))?;
        let server_ip = network
            .node(Role::Server.host_name())
            .and_then(|n| n.ip())
            .ok_or_else(|| ExperimentError::Precondition("server has no address".to_string()))?;
        let fetcher = CurlFetcher::new(
            client.clone(),
            traffic::web_url(server_ip, config.web.port),
            config.measurement.fetch_timeout(),
        );
        self.await_responder(&fetcher).await?;

        let mut roles = vec![TrafficRole::BulkServer, TrafficRole::BulkFlow];
        if config.attacker_flow {
            roles.push(TrafficRole::AttackerFlow);
        }
        roles.push(TrafficRole::LatencyProbe);
        for role in roles {
            match start_traffic(role, config, network, topology) {
                Ok(handle) => session.traffic.push(handle),
                Err(e @ ExperimentError::Launch { .. }) => warn!("{}", e),
                Err(e) => return Err(e),
            }
        }

        self.measure(&fetcher, session).await
    }

    async fn await_responder(&self, fetcher: &dyn Fetcher) -> Result<()> {
        traffic::wait_for_responder(fetcher, self.config.timing.responder_grace(), RESPONDER_POLL)
            .await
    }

    /// Let the load settle, note early exits, then run the fetch loop
    async fn measure(&self, fetcher: &dyn Fetcher, session: &mut Session) -> Result<MeasurementReport> {
        let config = &self.config;
        tokio::time::sleep(config.timing.settle()).await;
        session.early_exits = traffic::check_early_exits(&mut session.traffic)
            .into_iter()
            .map(|(role, _)| role)
            .collect();

        info!("Measuring fetch latency for {}s", config.duration_secs);
        Ok(measure::run(config, fetcher).await)
    }
}

/// Race `work` against `interrupt`; an interrupt wins as [`ExperimentError::Aborted`]
async fn until_interrupted<T>(
    work: impl Future<Output = Result<T>>,
    interrupt: impl Future<Output = ()>,
) -> Result<T> {
    tokio::select! {
        outcome = work => outcome,
        _ = interrupt => {
            warn!("Interrupted, tearing down");
            Err(ExperimentError::Aborted)
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM; a handler that cannot be installed never fires
async fn interrupted() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Cannot handle SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
