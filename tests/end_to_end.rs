//! Full run against a real emulated network
//!
//! Needs root (CAP_NET_ADMIN), iproute2, tc, iperf, curl and python3:
//! `cargo test --features netns-tests --test end_to_end`

#![cfg(all(target_os = "linux", feature = "netns-tests"))]

use bufferbloat::process::find_matching;
use bufferbloat::{topology, Experiment, ExperimentConfig, TrafficRole};

#[tokio::test]
async fn test_bottleneck_run_produces_all_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        bw_server: 10.0,
        bw_attacker: 10.0,
        bw_innocent: 1.0,
        delay_ms: 3.0,
        max_queue: 20,
        duration_secs: 6,
        namespace_prefix: "bbe2e".to_string(),
        ..ExperimentConfig::new(dir.path())
    };

    let topo = topology::build(&config).unwrap();
    assert_eq!(topo.hosts.len(), 3);
    assert_eq!(topo.switch, "s0");

    let report = Experiment::new(config).run().await.unwrap();
    assert!(report.measurement.summary.count >= 1);
    assert!(report.measurement.bursts >= 2);
    assert!(report.teardown.network_stopped);

    let nonempty = |name: &str| {
        std::fs::metadata(dir.path().join(name))
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    };
    assert!(nonempty("cwnd.txt"));
    assert!(nonempty("q.txt"));
    assert!(nonempty("ping.txt"));
    assert!(nonempty("summary.json"));

    for role in [
        TrafficRole::WebServer,
        TrafficRole::BulkServer,
        TrafficRole::BulkFlow,
        TrafficRole::LatencyProbe,
    ] {
        assert!(find_matching(role.kill_pattern()).is_empty(), "{} survived", role);
    }
}
