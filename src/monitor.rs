//! Background monitors: queue-length sampler and congestion-window reader
//!
//! The queue sampler is a tokio task polling `tc` for the backlog of one
//! interface; the congestion-window reader is an external process copying
//! a kernel event stream into a file. Both only communicate through their
//! output file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use network_sim::qdisc::QdiscManager;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{ExperimentError, Result};
use crate::process::ProcessHandle;

const LEGACY_TCPPROBE: &str = "/proc/net/tcpprobe";
const TRACEFS_CANDIDATES: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    QueueLength,
    CongestionWindow,
}

/// Where congestion-window samples come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CwndSource {
    /// `tcp:tcp_probe` tracepoint under a tracefs mount
    Tracepoint { tracefs: PathBuf },
    /// The `tcp_probe` module of older kernels
    LegacyTcpProbe,
    /// Any line-oriented file or pipe
    Stream(PathBuf),
}

impl CwndSource {
    /// Prefer the tracepoint, fall back to the legacy module
    pub fn detect() -> Self {
        let candidates: Vec<&Path> = TRACEFS_CANDIDATES.iter().map(Path::new).collect();
        Self::detect_in(&candidates)
    }

    pub fn detect_in(tracefs_candidates: &[&Path]) -> Self {
        tracefs_candidates
            .iter()
            .find(|root| root.join("events/tcp/tcp_probe").is_dir())
            .map(|root| CwndSource::Tracepoint {
                tracefs: root.to_path_buf(),
            })
            .unwrap_or(CwndSource::LegacyTcpProbe)
    }

    /// Command line of the reader attached to this source
    pub fn kill_pattern(&self) -> String {
        format!("cat {}", self.stream_path().display())
    }

    fn stream_path(&self) -> PathBuf {
        match self {
            CwndSource::Tracepoint { tracefs } => tracefs.join("trace_pipe"),
            CwndSource::LegacyTcpProbe => PathBuf::from(LEGACY_TCPPROBE),
            CwndSource::Stream(path) => path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MonitorParams {
    QueueLength {
        /// Namespace holding the interface; `None` for the caller's own
        namespace: Option<String>,
        interface: String,
        interval: Duration,
        output: PathBuf,
    },
    CongestionWindow {
        source: CwndSource,
        output: PathBuf,
    },
}

impl MonitorParams {
    pub fn kind(&self) -> MonitorKind {
        match self {
            MonitorParams::QueueLength { .. } => MonitorKind::QueueLength,
            MonitorParams::CongestionWindow { .. } => MonitorKind::CongestionWindow,
        }
    }
}

/// Task id for samplers, pid for readers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorIdentity {
    Task(u64),
    Process(u32),
}

enum Backing {
    Sampler {
        id: u64,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<u64>,
    },
    Reader {
        process: ProcessHandle,
        tracepoint: Option<PathBuf>,
    },
    Stopped,
}

pub struct MonitorHandle {
    kind: MonitorKind,
    target: String,
    output: PathBuf,
    identity: Option<MonitorIdentity>,
    backing: Backing,
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("output", &self.output)
            .field("identity", &self.identity)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl MonitorHandle {
    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    /// Interface or event source being sampled
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn identity(&self) -> Option<MonitorIdentity> {
        self.identity
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.backing, Backing::Stopped)
    }

    /// Command-line pattern of a process-backed monitor, for the teardown sweep
    pub fn kill_pattern(&self) -> Option<String> {
        match self.kind {
            MonitorKind::CongestionWindow => Some(format!("cat {}", self.target)),
            MonitorKind::QueueLength => None,
        }
    }
}

/// Launch a monitor and return as soon as it runs
///
/// The interface of a queue sampler must already exist; this is not checked.
pub async fn start_monitor(params: MonitorParams) -> Result<MonitorHandle> {
    match params {
        MonitorParams::QueueLength {
            namespace,
            interface,
            interval,
            output,
        } => {
            let file = File::create(&output).await?;
            let (shutdown, rx) = oneshot::channel();
            let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
            let task = tokio::spawn(sample_queue(
                QdiscManager::new(),
                namespace,
                interface.clone(),
                interval,
                BufWriter::new(file),
                rx,
            ));
            info!(interface = %interface, ?interval, "queue sampler started");
            Ok(MonitorHandle {
                kind: MonitorKind::QueueLength,
                target: interface,
                output,
                identity: Some(MonitorIdentity::Task(id)),
                backing: Backing::Sampler { id, shutdown, task },
            })
        }
        MonitorParams::CongestionWindow { source, output } => {
            let tracepoint = prepare_cwnd_source(&source).await?;
            let stream = source.stream_path();
            let mut cmd = Command::new("cat");
            cmd.arg(&stream);
            let process = ProcessHandle::spawn("cwnd", cmd, Some(&output)).map_err(|e| {
                ExperimentError::Launch {
                    role: "congestion-window reader".to_string(),
                    source: e,
                }
            })?;
            info!(source = %stream.display(), "congestion-window reader started");
            Ok(MonitorHandle {
                kind: MonitorKind::CongestionWindow,
                target: stream.display().to_string(),
                output,
                identity: process.pid().map(MonitorIdentity::Process),
                backing: Backing::Reader {
                    process,
                    tracepoint,
                },
            })
        }
    }
}

/// Stop a monitor; calling it again is a no-op
pub async fn stop_monitor(handle: &mut MonitorHandle, grace: Duration) {
    match std::mem::replace(&mut handle.backing, Backing::Stopped) {
        Backing::Stopped => {}
        Backing::Sampler {
            id,
            shutdown,
            mut task,
        } => {
            let _ = shutdown.send(());
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(samples)) => debug!(id, samples, "queue sampler stopped"),
                Ok(Err(e)) => warn!(id, "queue sampler task failed: {}", e),
                Err(_) => {
                    warn!(id, "queue sampler did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        Backing::Reader {
            mut process,
            tracepoint,
        } => {
            let outcome = process.stop(grace).await;
            debug!(?outcome, "congestion-window reader stopped");
            if let Some(enable) = tracepoint {
                if let Err(e) = tokio::fs::write(&enable, "0").await {
                    debug!("could not disable tcp_probe tracepoint: {}", e);
                }
            }
        }
    }
}

/// Arm the kernel probe; returns the tracepoint switch to reset on stop
async fn prepare_cwnd_source(source: &CwndSource) -> Result<Option<PathBuf>> {
    match source {
        CwndSource::Tracepoint { tracefs } => {
            let enable = tracefs.join("events/tcp/tcp_probe/enable");
            tokio::fs::write(&enable, "1").await?;
            Ok(Some(enable))
        }
        CwndSource::LegacyTcpProbe => {
            // Reload so earlier options do not stick
            let _ = Command::new("rmmod").arg("tcp_probe").output().await;
            let out = Command::new("modprobe")
                .args(["tcp_probe", "full=1"])
                .output()
                .await?;
            if !out.status.success() {
                return Err(ExperimentError::DependencyUnavailable(format!(
                    "tcp_probe module: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                )));
            }
            Ok(None)
        }
        CwndSource::Stream(_) => Ok(None),
    }
}

/// `<unix-seconds>,<packets>` with microsecond resolution
pub fn queue_sample_line(at: DateTime<Utc>, packets: u64) -> String {
    format!(
        "{}.{:06},{}\n",
        at.timestamp(),
        at.timestamp_subsec_micros(),
        packets
    )
}

async fn sample_queue(
    qdisc: QdiscManager,
    namespace: Option<String>,
    interface: String,
    interval: Duration,
    mut out: BufWriter<File>,
    mut shutdown: oneshot::Receiver<()>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut written = 0u64;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let packets = match qdisc.backlog_packets(namespace.as_deref(), &interface).await {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(interface = %interface, "backlog sample failed: {}", e);
                        continue;
                    }
                };
                let line = queue_sample_line(Utc::now(), packets);
                if let Err(e) = out.write_all(line.as_bytes()).await {
                    warn!("queue sample write failed: {}", e);
                    break;
                }
                // Keep the file current while the run is in progress
                let _ = out.flush().await;
                written += 1;
            }
        }
    }

    let _ = out.flush().await;
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_queue_sample_line_format() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(queue_sample_line(at, 42), "1700000000.123456,42\n");
    }

    #[test]
    fn test_detect_prefers_tracepoint() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let tracefs = dir.path().join("tracing");
        std::fs::create_dir_all(tracefs.join("events/tcp/tcp_probe")).unwrap();

        assert_eq!(
            CwndSource::detect_in(&[&missing, &tracefs]),
            CwndSource::Tracepoint {
                tracefs: tracefs.clone()
            }
        );
        assert_eq!(CwndSource::detect_in(&[&missing]), CwndSource::LegacyTcpProbe);
        assert_eq!(
            CwndSource::Tracepoint { tracefs }.kill_pattern(),
            format!("cat {}", dir.path().join("tracing/trace_pipe").display())
        );
    }

    #[tokio::test]
    async fn test_queue_sampler_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("q.txt");
        let mut handle = start_monitor(MonitorParams::QueueLength {
            namespace: None,
            interface: "bbtest-missing0".to_string(),
            interval: Duration::from_millis(20),
            output: output.clone(),
        })
        .await
        .unwrap();

        assert_eq!(handle.kind(), MonitorKind::QueueLength);
        assert_eq!(handle.target(), "bbtest-missing0");
        assert!(matches!(handle.identity(), Some(MonitorIdentity::Task(_))));
        assert!(output.exists());
        assert!(handle.kill_pattern().is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_monitor(&mut handle, Duration::from_secs(1)).await;
        assert!(handle.is_stopped());

        let second = tokio::time::timeout(
            Duration::from_millis(50),
            stop_monitor(&mut handle, Duration::from_secs(1)),
        )
        .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_stream_reader_copies_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("events");
        std::fs::write(&source, "cwnd 10\ncwnd 12\n").unwrap();
        let output = dir.path().join("cwnd.txt");

        let mut handle = start_monitor(MonitorParams::CongestionWindow {
            source: CwndSource::Stream(source.clone()),
            output: output.clone(),
        })
        .await
        .unwrap();
        assert_eq!(handle.kind(), MonitorKind::CongestionWindow);
        assert!(matches!(handle.identity(), Some(MonitorIdentity::Process(_))));
        assert_eq!(
            handle.kill_pattern(),
            Some(format!("cat {}", source.display()))
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        stop_monitor(&mut handle, Duration::from_secs(1)).await;
        stop_monitor(&mut handle, Duration::from_secs(1)).await;
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "cwnd 10\ncwnd 12\n");
    }
}
