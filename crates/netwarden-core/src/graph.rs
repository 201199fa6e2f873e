//! Global topology graph reconciled from per-device snapshots
//!
//! Every poll leaves one snapshot per device, each describing the network as
//! that device sees it. `build_graph` folds those partial views together with
//! the inventory into a single node/link graph:
//!
//! - every inventory device is a node, even when its snapshot is missing or
//!   failed;
//! - compute/network records naming an inventory device (by id or identifying
//!   name) enrich that device's node instead of creating a second one;
//! - other records become discovered nodes, where the first snapshot to report
//!   a field owns it and later snapshots only fill gaps;
//! - links collapse by unordered endpoint pair, first seen wins.
//!
//! Snapshots are folded in device-id order so the result does not depend on
//! the order the store hands them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::device::{Device, DeviceId, DeviceType, ReachabilityStatus};
use crate::snapshot::{DeviceHealth, DeviceSnapshot};
use crate::topology::{
    ComputeRecord, Descriptor, InterfaceRef, LinkRecord, NetworkRecord, TopologyRecord,
};

/// Where a graph node came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeOrigin {
    /// Configured in the inventory
    Inventory,
    /// Reported by some device's topology
    Discovered,
    /// Only known as a link endpoint
    Inferred,
}

/// A node of the global graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceType,
    pub origin: NodeOrigin,
    pub status: ReachabilityStatus,
    /// Management address, from the inventory or the reported record
    #[serde(rename = "ip")]
    pub address: Option<String>,
    pub port: Option<u16>,
    #[serde(flatten)]
    pub health: DeviceHealth,
    pub interfaces: Vec<InterfaceRef>,
    pub disks: Vec<Descriptor>,
    pub ports: Vec<Descriptor>,
    /// Failure reason of the device's last poll
    pub detail: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    /// Device whose snapshot first reported this node
    pub reported_by: Option<DeviceId>,
}

impl NodeView {
    fn bare(id: &str, origin: NodeOrigin) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            kind: DeviceType::Other,
            origin,
            status: ReachabilityStatus::Online,
            address: None,
            port: None,
            health: DeviceHealth::default(),
            interfaces: Vec::new(),
            disks: Vec::new(),
            ports: Vec::new(),
            detail: None,
            captured_at: None,
            reported_by: None,
        }
    }

    fn from_device(device: &Device) -> Self {
        Self {
            name: device.identifying_name().to_string(),
            kind: device.declared_type,
            address: Some(device.address.clone()),
            port: Some(device.port),
            ..Self::bare(device.id.as_str(), NodeOrigin::Inventory)
        }
    }

    /// Fill absent fields from a compute record, never overwriting
    fn absorb_compute(&mut self, record: &ComputeRecord, reporter: &DeviceId) {
        if self.kind == DeviceType::Other {
            self.kind = DeviceType::Server;
        }
        if self.address.is_none() {
            self.address = record.management_address.clone();
        }
        if self.interfaces.is_empty() {
            self.interfaces = record.interfaces.clone();
        }
        if self.disks.is_empty() {
            self.disks = record.disks.clone();
        }
        self.absorb_name(&record.name, reporter);
    }

    /// Fill absent fields from a network record, never overwriting
    fn absorb_network(&mut self, record: &NetworkRecord, reporter: &DeviceId) {
        if self.kind == DeviceType::Other {
            self.kind = DeviceType::Switch;
        }
        if self.ports.is_empty() {
            self.ports = record.ports.clone();
        }
        self.absorb_name(&record.name, reporter);
    }

    fn absorb_name(&mut self, name: &str, reporter: &DeviceId) {
        // Non-inventory names default to the id until something better shows up
        if self.origin != NodeOrigin::Inventory && self.name == self.id && !name.is_empty() {
            self.name = name.to_string();
        }
        if self.reported_by.is_none() && self.origin != NodeOrigin::Inventory {
            self.reported_by = Some(reporter.clone());
        }
    }
}

/// A deduplicated link of the global graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkView {
    #[serde(rename = "source")]
    pub source_id: String,
    #[serde(rename = "target")]
    pub target_id: String,
    pub source_interface: Option<String>,
    pub target_port: Option<String>,
    pub status: String,
    pub label: String,
    pub reported_by: DeviceId,
}

impl LinkView {
    fn from_record(record: &LinkRecord, reporter: &DeviceId) -> Self {
        let label = record
            .label
            .clone()
            .unwrap_or_else(|| synthesize_label(record));
        Self {
            source_id: record.source_id.clone(),
            target_id: record.target_id.clone(),
            source_interface: record.source_interface.clone(),
            target_port: record.target_port.clone(),
            status: record.status.clone(),
            label,
            reported_by: reporter.clone(),
        }
    }

    fn endpoint_pair(&self) -> (String, String) {
        if self.source_id <= self.target_id {
            (self.source_id.clone(), self.target_id.clone())
        } else {
            (self.target_id.clone(), self.source_id.clone())
        }
    }
}

fn synthesize_label(record: &LinkRecord) -> String {
    match (&record.source_interface, &record.target_port) {
        (Some(iface), Some(port)) => format!("{} -> {}", iface, port),
        (Some(iface), None) => iface.clone(),
        (None, Some(port)) => port.clone(),
        (None, None) => String::new(),
    }
}

/// Reconciled node/link graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Nodes keyed by id
    #[serde(with = "node_list")]
    nodes: BTreeMap<String, NodeView>,
    links: Vec<LinkView>,
}

impl Graph {
    pub fn get_node(&self, id: &str) -> Option<&NodeView> {
        self.nodes.get(id)
    }

    /// All nodes, ordered by id
    pub fn nodes(&self) -> impl Iterator<Item = &NodeView> {
        self.nodes.values()
    }

    pub fn links(&self) -> &[LinkView] {
        &self.links
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Node map on the wire: a plain list ordered by id
mod node_list {
    use super::NodeView;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        nodes: &BTreeMap<String, NodeView>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<&NodeView> = nodes.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, NodeView>, D::Error> {
        let list = Vec::<NodeView>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|n| (n.id.clone(), n)).collect())
    }
}

/// Merge the inventory and all per-device snapshots into one graph
pub fn build_graph(inventory: &[Device], snapshots: &[DeviceSnapshot]) -> Graph {
    let mut nodes: BTreeMap<String, NodeView> = BTreeMap::new();

    for device in inventory {
        nodes.insert(device.id.0.clone(), NodeView::from_device(device));
    }

    let mut ordered: Vec<&DeviceSnapshot> = snapshots.iter().collect();
    ordered.sort_by(|a, b| a.device_id.cmp(&b.device_id));

    // Reachability of the polled device itself
    for snapshot in &ordered {
        if let Some(node) = nodes.get_mut(snapshot.device_id.as_str()) {
            node.status = snapshot.reachability_status;
            node.health = snapshot.health.clone();
            node.detail = snapshot.detail.clone();
            node.captured_at = Some(snapshot.captured_at);
        }
    }

    let mut links = Vec::new();
    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();

    for snapshot in &ordered {
        let reporter = &snapshot.device_id;
        for record in &snapshot.topology {
            match record {
                TopologyRecord::Compute(compute) => {
                    let key = resolve_node_id(inventory, &compute.id);
                    node_entry(&mut nodes, &key).absorb_compute(compute, reporter);
                }
                TopologyRecord::Network(network) => {
                    let key = resolve_node_id(inventory, &network.id);
                    node_entry(&mut nodes, &key).absorb_network(network, reporter);
                }
                TopologyRecord::Link(link) => {
                    let mut view = LinkView::from_record(link, reporter);
                    view.source_id = resolve_node_id(inventory, &view.source_id);
                    view.target_id = resolve_node_id(inventory, &view.target_id);
                    if seen_pairs.insert(view.endpoint_pair()) {
                        links.push(view);
                    }
                }
            }
        }
    }

    for link in &links {
        for endpoint in [&link.source_id, &link.target_id] {
            nodes.entry(endpoint.clone()).or_insert_with(|| {
                let mut node = NodeView::bare(endpoint, NodeOrigin::Inferred);
                node.reported_by = Some(link.reported_by.clone());
                node
            });
        }
    }

    Graph { nodes, links }
}

/// Map a reported id onto the inventory device it names, if any
fn resolve_node_id(inventory: &[Device], record_id: &str) -> String {
    inventory
        .iter()
        .find(|d| d.id.as_str() == record_id)
        .or_else(|| inventory.iter().find(|d| d.matches(record_id)))
        .map(|d| d.id.0.clone())
        .unwrap_or_else(|| record_id.to_string())
}

fn node_entry<'a>(nodes: &'a mut BTreeMap<String, NodeView>, id: &str) -> &'a mut NodeView {
    nodes
        .entry(id.to_string())
        .or_insert_with(|| NodeView::bare(id, NodeOrigin::Discovered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Credentials;

    fn device(id: &str) -> Device {
        Device::new(
            id,
            "10.0.0.1",
            Credentials::Password {
                user: "admin".to_string(),
                secret: "admin".to_string(),
            },
        )
    }

    fn compute(id: &str, address: Option<&str>) -> TopologyRecord {
        TopologyRecord::Compute(ComputeRecord {
            id: id.to_string(),
            name: format!("{}-name", id),
            management_address: address.map(str::to_string),
            interfaces: Vec::new(),
            disks: Vec::new(),
        })
    }

    fn switch(id: &str) -> TopologyRecord {
        TopologyRecord::Network(NetworkRecord {
            id: id.to_string(),
            name: id.to_string(),
            ports: Vec::new(),
        })
    }

    fn link(source: &str, target: &str, iface: &str) -> TopologyRecord {
        TopologyRecord::Link(LinkRecord {
            source_id: source.to_string(),
            target_id: target.to_string(),
            source_interface: Some(iface.to_string()),
            target_port: Some("P1".to_string()),
            status: "UP".to_string(),
            label: None,
        })
    }

    fn snapshot(device: &str, topology: Vec<TopologyRecord>) -> DeviceSnapshot {
        DeviceSnapshot::online(DeviceId::from(device), topology, DeviceHealth::default())
    }

    fn node_ids(graph: &Graph) -> Vec<&str> {
        graph.nodes().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_inventory_without_snapshots() {
        let graph = build_graph(&[device("dev1"), device("dev2")], &[]);
        assert_eq!(node_ids(&graph), vec!["dev1", "dev2"]);
        assert!(graph
            .nodes()
            .all(|n| n.status == ReachabilityStatus::Online && n.origin == NodeOrigin::Inventory));
        assert!(graph.links().is_empty());
    }

    #[test]
    fn test_offline_device_still_listed() {
        let failed = DeviceSnapshot::placeholder(
            DeviceId::from("dev1"),
            ReachabilityStatus::Offline,
            "connection refused",
        );
        let graph = build_graph(&[device("dev1")], &[failed]);

        let node = graph.get_node("dev1").unwrap();
        assert_eq!(node.status, ReachabilityStatus::Offline);
        assert_eq!(node.detail.as_deref(), Some("connection refused"));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_record_merges_into_inventory_node() {
        let graph = build_graph(
            &[device("dev1")],
            &[snapshot("dev1", vec![compute("dev1", Some("192.168.0.5"))])],
        );

        assert_eq!(graph.node_count(), 1);
        let node = graph.get_node("dev1").unwrap();
        assert_eq!(node.origin, NodeOrigin::Inventory);
        assert_eq!(node.kind, DeviceType::Server);
        // Inventory address wins over the reported one
        assert_eq!(node.address.as_deref(), Some("10.0.0.1"));
        assert_eq!(node.name, "dev1");
    }

    #[test]
    fn test_record_matches_identifying_name() {
        let mut named = device("dev1");
        named.name = "core-sw".to_string();
        let graph = build_graph(&[named], &[snapshot("dev1", vec![switch("core-sw")])]);

        assert_eq!(node_ids(&graph), vec!["dev1"]);
        assert_eq!(graph.get_node("dev1").unwrap().kind, DeviceType::Switch);
    }

    #[test]
    fn test_first_writer_wins_for_discovered_nodes() {
        let graph = build_graph(
            &[],
            &[
                snapshot("devB", vec![compute("srv9", Some("10.9.9.2"))]),
                snapshot("devA", vec![compute("srv9", None)]),
                snapshot("devC", vec![compute("srv9", Some("10.9.9.3"))]),
            ],
        );

        let node = graph.get_node("srv9").unwrap();
        assert_eq!(node.origin, NodeOrigin::Discovered);
        assert_eq!(node.reported_by, Some(DeviceId::from("devA")));
        // devA had no address, devB fills the gap, devC loses
        assert_eq!(node.address.as_deref(), Some("10.9.9.2"));
    }

    #[test]
    fn test_duplicate_links_collapse() {
        let graph = build_graph(
            &[],
            &[
                snapshot("dev1", vec![link("srv1", "sw1", "eth0")]),
                snapshot("dev2", vec![link("srv1", "sw1", "eth1")]),
                snapshot("dev3", vec![link("sw1", "srv1", "eth2")]),
            ],
        );

        assert_eq!(graph.links().len(), 1);
        let only = &graph.links()[0];
        assert_eq!(only.reported_by, DeviceId::from("dev1"));
        assert_eq!(only.label, "eth0 -> P1");
    }

    #[test]
    fn test_link_endpoints_always_resolve() {
        let graph = build_graph(&[], &[snapshot("dev1", vec![link("srv1", "sw1", "eth0")])]);

        assert_eq!(node_ids(&graph), vec!["srv1", "sw1"]);
        assert!(graph.nodes().all(|n| n.origin == NodeOrigin::Inferred));
    }

    #[test]
    fn test_link_endpoint_resolves_to_inventory_name() {
        let mut named = device("dev7");
        named.name = "leaf-1".to_string();
        let graph = build_graph(&[named], &[snapshot("dev1", vec![link("srv1", "leaf-1", "eth0")])]);

        assert_eq!(graph.links()[0].target_id, "dev7");
        assert!(graph.get_node("leaf-1").is_none());
    }

    #[test]
    fn test_graph_is_deterministic() {
        let inventory = [device("dev1"), device("dev2")];
        let snapshots = vec![
            snapshot("dev2", vec![switch("sw1"), link("srv1", "sw1", "eth1")]),
            snapshot("dev1", vec![compute("srv1", Some("10.0.0.9")), link("sw1", "srv1", "eth0")]),
        ];
        let mut reversed = snapshots.clone();
        reversed.reverse();

        let first = build_graph(&inventory, &snapshots);
        let second = build_graph(&inventory, &snapshots);
        let shuffled = build_graph(&inventory, &reversed);

        assert_eq!(first, second);
        assert_eq!(first, shuffled);
        assert_eq!(first.links().len(), 1);
        assert_eq!(first.links()[0].label, "eth0 -> P1");
    }

    #[test]
    fn test_graph_serializes_node_list() {
        let graph = build_graph(&[device("dev1")], &[]);
        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json["nodes"][0]["id"], "dev1");
        assert_eq!(json["nodes"][0]["ip"], "10.0.0.1");
        assert_eq!(json["nodes"][0]["status"], "ONLINE");
        assert!(json["links"].as_array().unwrap().is_empty());

        let back: Graph = serde_json::from_value(json).unwrap();
        assert_eq!(back, graph);
    }
}
