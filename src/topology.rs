//! Star topology of the experiment: one switch, three hosts

use network_sim::{LinkParams, TopologySpec};
use serde::{Deserialize, Serialize};

use crate::config::ExperimentConfig;
use crate::error::TopologyError;

pub const SWITCH: &str = "s0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Attacker,
    Innocent,
}

impl Role {
    /// Host name used for this role in the emulated network
    pub fn host_name(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Attacker => "attacker",
            Role::Innocent => "innocent",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.host_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostNode {
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub host: Role,
    pub switch: String,
    pub params: LinkParams,
}

/// Declarative description handed to the emulation platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub switch: String,
    pub hosts: Vec<HostNode>,
    pub links: Vec<Link>,
}

fn positive(field: &'static str, value: f64) -> Result<f64, TopologyError> {
    // NaN fails this comparison as well
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(TopologyError::NonPositive { field, value })
    }
}

/// Build the experiment topology from `config`
///
/// Links are declared attacker, innocent, server, so the switch port
/// facing the innocent host is `s0-eth2`. Only that link carries the
/// queue-depth limit.
pub fn build(config: &ExperimentConfig) -> Result<Topology, TopologyError> {
    let bw_attacker = positive("bw_attacker", config.bw_attacker)?;
    let bw_innocent = positive("bw_innocent", config.bw_innocent)?;
    let bw_server = positive("bw_server", config.bw_server)?;
    let delay = positive("delay_ms", config.delay_ms)?;
    if config.max_queue == 0 {
        return Err(TopologyError::NonPositive {
            field: "max_queue",
            value: 0.0,
        });
    }

    let links = vec![
        Link {
            host: Role::Attacker,
            switch: SWITCH.to_string(),
            params: LinkParams::new(bw_attacker, delay),
        },
        Link {
            host: Role::Innocent,
            switch: SWITCH.to_string(),
            params: LinkParams::new(bw_innocent, delay).with_max_queue(config.max_queue),
        },
        Link {
            host: Role::Server,
            switch: SWITCH.to_string(),
            params: LinkParams::new(bw_server, delay),
        },
    ];
    let hosts = links
        .iter()
        .map(|l| HostNode {
            name: l.host.host_name().to_string(),
            role: l.host,
        })
        .collect();

    Ok(Topology {
        switch: SWITCH.to_string(),
        hosts,
        links,
    })
}

impl Topology {
    pub fn host(&self, role: Role) -> Option<&HostNode> {
        self.hosts.iter().find(|h| h.role == role)
    }

    pub fn link(&self, role: Role) -> Option<&Link> {
        self.links.iter().find(|l| l.host == role)
    }

    /// Translate into the platform's topology description
    pub fn spec(&self) -> TopologySpec {
        let mut spec = TopologySpec::new();
        spec.add_switch(self.switch.clone());
        for host in &self.hosts {
            spec.add_host(host.name.clone());
        }
        for link in &self.links {
            spec.add_link(link.host.host_name(), link.switch.clone(), link.params.clone());
        }
        spec
    }
}
