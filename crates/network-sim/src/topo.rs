//! Declarative topology description consumed by [`crate::Network`]

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{LinkParams, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Host,
    Switch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
}

/// A link between a host and a switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub host: String,
    pub switch: String,
    pub params: LinkParams,
}

/// Nodes and links in declaration order; order determines addressing and port numbers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<LinkSpec>,
}

impl TopologySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_switch(&mut self, name: impl Into<String>) -> &mut Self {
        self.nodes.push(NodeSpec {
            name: name.into(),
            kind: NodeKind::Switch,
        });
        self
    }

    pub fn add_host(&mut self, name: impl Into<String>) -> &mut Self {
        self.nodes.push(NodeSpec {
            name: name.into(),
            kind: NodeKind::Host,
        });
        self
    }

    pub fn add_link(
        &mut self,
        host: impl Into<String>,
        switch: impl Into<String>,
        params: LinkParams,
    ) -> &mut Self {
        self.links.push(LinkSpec {
            host: host.into(),
            switch: switch.into(),
            params,
        });
        self
    }

    pub fn hosts(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Host)
    }

    pub fn switches(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Switch)
    }

    fn kind_of(&self, name: &str) -> Option<NodeKind> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.kind)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(RuntimeError::InvalidParams("empty node name".to_string()));
            }
            if !names.insert(node.name.as_str()) {
                return Err(RuntimeError::InvalidParams(format!(
                    "Duplicate node name: {}",
                    node.name
                )));
            }
        }

        let mut linked_hosts = HashSet::new();
        for link in &self.links {
            match self.kind_of(&link.host) {
                Some(NodeKind::Host) => {}
                Some(NodeKind::Switch) => {
                    return Err(RuntimeError::InvalidParams(format!(
                        "link endpoint {} must be a host",
                        link.host
                    )))
                }
                None => return Err(RuntimeError::UnknownNode(link.host.clone())),
            }
            match self.kind_of(&link.switch) {
                Some(NodeKind::Switch) => {}
                Some(NodeKind::Host) => {
                    return Err(RuntimeError::InvalidParams(format!(
                        "link endpoint {} must be a switch",
                        link.switch
                    )))
                }
                None => return Err(RuntimeError::UnknownNode(link.switch.clone())),
            }
            if !linked_hosts.insert(link.host.as_str()) {
                return Err(RuntimeError::InvalidParams(format!(
                    "host {} has more than one link",
                    link.host
                )));
            }
            link.params.validate()?;
        }
        Ok(())
    }
}
