//! Vendor-neutral topology records extracted from one device's state

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque descriptive payload (disk, port) carried as-is from the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(pub Value);

/// A network interface of a compute node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRef {
    pub name: Option<String>,
    pub mac_address: Option<String>,
    /// Raw `connectedTo` string as reported
    pub connected_to: Option<String>,
    /// Switch id resolved from `connectedTo`
    pub connected_switch: Option<String>,
    /// Switch port resolved from `connectedTo`
    pub connected_port: Option<String>,
}

/// A server / computer system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeRecord {
    pub id: String,
    pub name: String,
    pub management_address: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceRef>,
    #[serde(default)]
    pub disks: Vec<Descriptor>,
}

/// A switch / bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ports: Vec<Descriptor>,
}

/// A connection from a compute interface to a switch port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    pub source_id: String,
    pub target_id: String,
    pub source_interface: Option<String>,
    pub target_port: Option<String>,
    pub status: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl LinkRecord {
    /// Endpoints as an unordered pair, smaller id first
    pub fn endpoint_pair(&self) -> (&str, &str) {
        if self.source_id <= self.target_id {
            (&self.source_id, &self.target_id)
        } else {
            (&self.target_id, &self.source_id)
        }
    }
}

/// One record of a device's extracted topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TopologyRecord {
    Compute(ComputeRecord),
    Network(NetworkRecord),
    Link(LinkRecord),
}

impl TopologyRecord {
    /// Id of a node record; links have none
    pub fn node_id(&self) -> Option<&str> {
        match self {
            TopologyRecord::Compute(c) => Some(&c.id),
            TopologyRecord::Network(n) => Some(&n.id),
            TopologyRecord::Link(_) => None,
        }
    }

    pub fn is_node(&self) -> bool {
        self.node_id().is_some()
    }
}
