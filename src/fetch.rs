//! Application-level fetch of the server's web page

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use network_sim::Node;

use crate::error::FetchError;

/// Something that can fetch a resource and report how long it took
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Latency of one fetch in seconds
    async fn fetch(&self) -> Result<f64, FetchError>;

    fn endpoint(&self) -> String;
}

/// Times a page download with curl from inside a node
pub struct CurlFetcher {
    node: Node,
    url: String,
    timeout: Duration,
}

impl CurlFetcher {
    pub fn new(node: Node, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            node,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Fetcher for CurlFetcher {
    async fn fetch(&self) -> Result<f64, FetchError> {
        let max_time = format!("{:.3}", self.timeout.as_secs_f64());
        let mut cmd = self.node.command("curl");
        cmd.args([
            "-s",
            "-o",
            "/dev/null",
            "-w",
            "%{time_total}\n",
            "--max-time",
            &max_time,
            &self.url,
        ])
        .stdin(Stdio::null())
        .kill_on_drop(true);

        // curl enforces --max-time itself; the outer bound covers a stuck namespace exec
        let output = tokio::time::timeout(self.timeout + Duration::from_secs(1), cmd.output())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;
        if !output.status.success() {
            return Err(FetchError::Failed(format!(
                "curl {} exited with {}",
                self.url, output.status
            )));
        }
        parse_latency_sample(&String::from_utf8_lossy(&output.stdout))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// Parse the total transfer time printed by `curl -w %{time_total}`
pub fn parse_latency_sample(raw: &str) -> Result<f64, FetchError> {
    let first = raw.lines().map(str::trim).find(|l| !l.is_empty());
    let Some(first) = first else {
        return Err(FetchError::Parse(raw.to_string()));
    };
    // Some locales print a decimal comma
    let value: f64 = first
        .replace(',', ".")
        .parse()
        .map_err(|_| FetchError::Parse(raw.to_string()))?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(FetchError::Parse(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latency_sample() {
        assert_eq!(parse_latency_sample("0.123456").unwrap(), 0.123456);
        assert_eq!(parse_latency_sample("  1.5\n").unwrap(), 1.5);
        assert_eq!(parse_latency_sample("\n0,250\n").unwrap(), 0.25);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_latency_sample(""), Err(FetchError::Parse(_))));
        assert!(matches!(parse_latency_sample("curl: (7)"), Err(FetchError::Parse(_))));
        assert!(matches!(parse_latency_sample("-0.5"), Err(FetchError::Parse(_))));
        assert!(matches!(parse_latency_sample("NaN"), Err(FetchError::Parse(_))));
        assert!(matches!(parse_latency_sample("inf"), Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_fetch_error() {
        let fetcher = CurlFetcher::new(
            Node::local("probe", None),
            "http://127.0.0.1:9/index.html",
            Duration::from_secs(2),
        );
        assert_eq!(fetcher.endpoint(), "http://127.0.0.1:9/index.html");
        // Refused connection, or curl missing entirely
        assert!(fetcher.fetch().await.is_err());
    }
}
