//! Namespace management APIs (Linux only)

#![cfg(target_os = "linux")]

use std::io::{Error, Result};
use std::process::Stdio;

use tokio::process::Command;

/// Represents a Linux network namespace by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
}

impl Namespace {
    /// Construct a Namespace handle for an existing namespace name (no creation)
    pub fn from_existing(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Create a namespace (idempotent: succeeds if it already exists)
    pub async fn ensure(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let out = Command::new("ip")
            .args(["netns", "add", &name])
            .output()
            .await?;
        if !out.status.success() {
            // tolerate "File exists"
            let stderr = String::from_utf8_lossy(&out.stderr);
            if !stderr.contains("File exists") {
                return Err(Error::other(format!(
                    "ip netns add {} failed: {}",
                    name, stderr
                )));
            }
        }
        let ns = Self { name };
        ns.exec_ok("ip", &["link", "set", "lo", "up"]).await?;
        Ok(ns)
    }

    /// Delete the namespace (best effort)
    pub async fn delete(&self) -> Result<()> {
        let _ = Command::new("ip")
            .args(["netns", "del", &self.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(())
    }

    /// Synchronous best-effort delete, usable from Drop without a runtime
    pub fn delete_blocking(&self) {
        let _ = std::process::Command::new("ip")
            .args(["netns", "del", &self.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a command that runs `program` inside the namespace via `ip netns exec`
    pub fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new("ip");
        cmd.args(["netns", "exec", &self.name, program]);
        cmd
    }

    /// Execute a command inside the namespace and collect its output
    pub async fn exec(&self, cmd: &str, args: &[&str]) -> Result<std::process::Output> {
        self.command(cmd).args(args).stdin(Stdio::null()).output().await
    }

    /// Execute a command inside the namespace, failing on non-zero exit
    pub async fn exec_ok(&self, cmd: &str, args: &[&str]) -> Result<()> {
        let out = self.exec(cmd, args).await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(Error::other(format!(
                "{} {:?} in {} failed: {}",
                cmd,
                args,
                self.name,
                String::from_utf8_lossy(&out.stderr).trim()
            )))
        }
    }

    /// Names of all namespaces starting with `prefix`
    pub async fn list_with_prefix(prefix: &str) -> Result<Vec<String>> {
        let out = Command::new("ip").args(["netns", "list"]).output().await?;
        Ok(parse_netns_list(&String::from_utf8_lossy(&out.stdout), prefix))
    }
}

/// `ip netns list` prints `name` or `name (id: 3)` per line
fn parse_netns_list(listing: &str, prefix: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| name.starts_with(prefix))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_netns_list() {
        let listing = "bb-server (id: 2)\nbb-innocent (id: 1)\nother\nbb-s0\n";
        assert_eq!(
            parse_netns_list(listing, "bb-"),
            vec!["bb-server", "bb-innocent", "bb-s0"]
        );
        assert!(parse_netns_list("", "bb-").is_empty());
    }

    #[test]
    fn test_command_wraps_ip_netns_exec() {
        let ns = Namespace::from_existing("bb-server");
        let cmd = ns.command("iperf");
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "ip");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["netns", "exec", "bb-server", "iperf"]);
    }
}
