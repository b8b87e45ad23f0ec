//! External processes launched by the experiment
//!
//! A [`ProcessHandle`] owns one child. Stopping sends SIGTERM, waits for a
//! grace period, then kills. [`kill_matching`] sweeps the whole system by
//! command-line pattern, which also reaches orphans of an earlier run.

use std::fs::File;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// `stop` was already called
    AlreadyStopped,
    /// The process had exited on its own
    AlreadyExited,
    /// The process honored SIGTERM within the grace period
    Terminated,
    /// The process had to be killed
    Killed,
}

#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    command_line: String,
    pid: Option<u32>,
    child: Option<Child>,
}

impl ProcessHandle {
    /// Spawn `command`, sending stdout to `stdout` when given and discarding it otherwise
    pub fn spawn(
        label: impl Into<String>,
        mut command: Command,
        stdout: Option<&Path>,
    ) -> std::io::Result<Self> {
        let label = label.into();
        let command_line = render(&command);
        let out = match stdout {
            Some(path) => Stdio::from(File::create(path)?),
            None => Stdio::null(),
        };
        command
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn()?;
        let pid = child.id();
        debug!(%label, pid, command = %command_line, "spawned process");
        Ok(Self {
            label,
            command_line,
            pid,
            child: Some(child),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_stopped(&self) -> bool {
        self.child.is_none()
    }

    /// Exit status if the process has already exited
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        self.child.as_mut()?.try_wait().ok().flatten()
    }

    /// Soft stop with a forceful fallback; safe to call repeatedly
    pub async fn stop(&mut self, grace: Duration) -> StopOutcome {
        let Some(mut child) = self.child.take() else {
            return StopOutcome::AlreadyStopped;
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(label = %self.label, %status, "process already exited");
            return StopOutcome::AlreadyExited;
        }

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(label = %self.label, pid, "SIGTERM failed: {}", e);
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => StopOutcome::Terminated,
            Err(_) => {
                warn!(label = %self.label, "process ignored SIGTERM, killing");
                if let Err(e) = child.kill().await {
                    debug!(label = %self.label, "kill failed: {}", e);
                }
                StopOutcome::Killed
            }
        }
    }
}

fn render(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pids of every process whose command line contains `pattern`, excluding this one
pub fn find_matching(pattern: &str) -> Vec<u32> {
    let own = std::process::id();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut pids = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own {
            continue;
        }
        // Processes can vanish between listing and reading
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        if cmdline_matches(&raw, pattern) {
            pids.push(pid);
        }
    }
    pids
}

fn cmdline_matches(raw: &[u8], pattern: &str) -> bool {
    if raw.is_empty() {
        return false;
    }
    let cmdline = String::from_utf8_lossy(raw).replace('\0', " ");
    cmdline.trim_end().contains(pattern)
}

/// SIGKILL every process matching `pattern`; returns how many were signalled
pub fn kill_matching(pattern: &str) -> usize {
    let mut killed = 0;
    for pid in find_matching(pattern) {
        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {
                debug!(pid, pattern, "killed stray process");
                killed += 1;
            }
            Err(e) => debug!(pid, pattern, "could not kill: {}", e),
        }
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper(arg: &str) -> Command {
        let mut cmd = Command::new("sleep");
        cmd.arg(arg);
        cmd
    }

    #[test]
    fn test_cmdline_matching() {
        assert!(cmdline_matches(b"iperf\0-s\0-w\016m\0", "iperf -s"));
        assert!(!cmdline_matches(b"iperf\0-c\010.0.0.3\0", "iperf -s"));
        assert!(!cmdline_matches(b"", "iperf"));
    }

    #[tokio::test]
    async fn test_stop_terminates_then_is_idempotent() {
        let mut handle = ProcessHandle::spawn("sleeper", sleeper("301.25"), None).unwrap();
        assert!(handle.pid().is_some());
        assert_eq!(handle.command_line(), "sleep 301.25");
        assert!(handle.try_exit().is_none());

        let outcome = handle.stop(Duration::from_secs(2)).await;
        assert_eq!(outcome, StopOutcome::Terminated);
        assert!(handle.is_stopped());
        assert_eq!(handle.stop(Duration::from_secs(2)).await, StopOutcome::AlreadyStopped);
    }

    #[tokio::test]
    async fn test_stop_kills_process_ignoring_sigterm() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "trap '' TERM; while :; do sleep 0.1; done"]);
        let mut handle = ProcessHandle::spawn("stubborn", cmd, None).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let outcome = handle.stop(Duration::from_millis(300)).await;
        assert_eq!(outcome, StopOutcome::Killed);
    }

    #[tokio::test]
    async fn test_stop_after_exit() {
        let mut handle = ProcessHandle::spawn("short", Command::new("true"), None).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(handle.try_exit().is_some_and(|s| s.success()));
        assert_eq!(handle.stop(Duration::from_secs(1)).await, StopOutcome::AlreadyExited);
    }

    #[tokio::test]
    async fn test_stdout_goes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let mut handle = ProcessHandle::spawn("echo", cmd, Some(&path)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop(Duration::from_secs(1)).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn test_kill_matching_reaches_untracked_process() {
        // Spawned without a handle, like an orphan of an earlier run
        let mut orphan = std::process::Command::new("sleep")
            .arg("302.75")
            .spawn()
            .unwrap();

        let pids = find_matching("sleep 302.75");
        assert_eq!(pids, vec![orphan.id()]);
        assert_eq!(kill_matching("sleep 302.75"), 1);

        let status = orphan.wait().unwrap();
        assert!(!status.success());
        assert!(find_matching("sleep 302.75").is_empty());
    }
}
