//! Network emulation library
//!
//! Builds small emulated topologies (hosts and switches in Linux network
//! namespaces, veth links shaped with tbf + netem) from a declarative
//! [`TopologySpec`] and exposes per-node command execution.

pub mod qdisc;
pub mod runtime;
pub mod topo;
pub mod types;

pub use runtime::{apply_link_params, remove_link_params};
pub use topo::{LinkSpec, NodeKind, NodeSpec, TopologySpec};
pub use types::{LinkParams, RuntimeError};

#[cfg(target_os = "linux")]
pub mod link;
#[cfg(target_os = "linux")]
pub mod net;
#[cfg(target_os = "linux")]
pub mod nsapi;
#[cfg(target_os = "linux")]
pub use link::{VethPair, VethPairConfig};
#[cfg(target_os = "linux")]
pub use net::{Network, NetworkOptions, Node, PingSummary};
#[cfg(target_os = "linux")]
pub use nsapi::Namespace;
