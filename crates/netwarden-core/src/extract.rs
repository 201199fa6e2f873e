//! Topology extraction from a normalized device tree
//!
//! Two strategies share one set of rules:
//! - [`Strategy::Scoped`] reads only the well-known equipment locations and is
//!   used when the device honoured the subtree filter
//! - [`Strategy::Exhaustive`] searches the whole tree for known tags and is
//!   used after a full (unfiltered) read
//!
//! Vendor differences are expressed as tag/field aliases in [`ExtractorRules`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, trace};

use crate::snapshot::DeviceHealth;
use crate::topology::{
    ComputeRecord, Descriptor, InterfaceRef, LinkRecord, NetworkRecord, TopologyRecord,
};
use crate::tree::NormalizedNode;

/// Status reported for a link when the interface does not carry one
pub const UNKNOWN_LINK_STATUS: &str = "UNKNOWN";

/// How the device state was read, reported by the session client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadScope {
    /// The server applied the subtree filter
    Filtered,
    /// Unfiltered full read
    Full,
}

/// Where candidate elements are looked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Scoped,
    Exhaustive,
}

impl From<ReadScope> for Strategy {
    fn from(scope: ReadScope) -> Self {
        match scope {
            ReadScope::Filtered => Strategy::Scoped,
            ReadScope::Full => Strategy::Exhaustive,
        }
    }
}

type Path = &'static [&'static str];

/// Tag and field names understood by the extractor
#[derive(Debug, Clone)]
pub struct ExtractorRules {
    /// Element wrapping the reply payload
    pub data_tags: &'static [&'static str],
    /// Scoped locations of compute elements, relative to the data element
    pub compute_paths: &'static [Path],
    /// Scoped locations of switch elements, relative to the data element
    pub network_paths: &'static [Path],
    /// Tags searched for by the exhaustive strategy
    pub compute_tags: &'static [&'static str],
    pub network_tags: &'static [&'static str],
    pub compute_id_fields: &'static [&'static str],
    pub network_id_fields: &'static [&'static str],
    pub name_fields: &'static [&'static str],
    pub management_fields: &'static [&'static str],
    /// Interface locations relative to a compute element
    pub interface_paths: &'static [Path],
    pub interface_name_fields: &'static [&'static str],
    pub mac_fields: &'static [&'static str],
    pub connected_to_fields: &'static [&'static str],
    pub link_status_fields: &'static [&'static str],
    pub disk_paths: &'static [Path],
    pub port_paths: &'static [Path],
}

impl Default for ExtractorRules {
    fn default() -> Self {
        Self {
            data_tags: &["data"],
            compute_paths: &[
                &["equipment", "computerSystems", "computerSystem"],
                &["equipment", "computerSystem"],
            ],
            network_paths: &[
                &["equipment", "switches", "switch"],
                &["equipment", "switch"],
            ],
            compute_tags: &["computerSystem", "computer-system"],
            network_tags: &["switch"],
            compute_id_fields: &["computerSystemId", "computer-system-id"],
            network_id_fields: &["switchId", "switch-id", "id", "name"],
            name_fields: &["name", "hostName", "hostname"],
            management_fields: &["managementIp", "managementAddress", "management-ip", "ipAddress"],
            interface_paths: &[
                &["networkInterfaces", "networkInterface"],
                &["networkInterface"],
                &["interfaces", "interface"],
            ],
            interface_name_fields: &["name", "interfaceId", "id"],
            mac_fields: &["macAddress", "mac-address", "mac"],
            connected_to_fields: &["connectedTo", "connected-to"],
            link_status_fields: &["status", "operStatus", "oper-status"],
            disk_paths: &[&["disks", "disk"], &["disk"], &["storage", "disk"]],
            port_paths: &[&["ports", "port"], &["port"]],
        }
    }
}

/// Switch and port parsed from a `connectedTo` string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub switch_id: Option<String>,
    pub port_id: Option<String>,
}

impl Connection {
    /// Parse `Bridge=S1,BridgePort=P3` style connection strings.
    ///
    /// `Bridge` or `DataBridge` give the switch, `BridgePort` the port; other
    /// keys are ignored and the first occurrence of a key wins.
    pub fn parse(s: &str) -> Self {
        let mut conn = Connection::default();
        for pair in s.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "Bridge" | "DataBridge" if conn.switch_id.is_none() => {
                    conn.switch_id = Some(value.to_string());
                }
                "BridgePort" if conn.port_id.is_none() => {
                    conn.port_id = Some(value.to_string());
                }
                _ => {}
            }
        }
        conn
    }
}

/// Extracts typed topology records from a normalized tree
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    rules: ExtractorRules,
}

impl Extractor {
    pub fn new(rules: ExtractorRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ExtractorRules {
        &self.rules
    }

    /// Extract records in document order: each compute node followed by its
    /// links, then the switches. Records without a resolvable id are dropped.
    pub fn extract(&self, tree: &NormalizedNode, strategy: Strategy) -> Vec<TopologyRecord> {
        let (computes, switches) = match strategy {
            Strategy::Scoped => self.scoped_candidates(tree),
            Strategy::Exhaustive => self.exhaustive_candidates(tree),
        };

        let mut records = Vec::new();
        let mut seen_nodes: HashSet<(bool, String)> = HashSet::new();
        let mut seen_links: HashSet<(String, String, Option<String>)> = HashSet::new();

        for node in computes {
            let Some((compute, links)) = self.compute_record(node) else {
                trace!(tag = node.tag(), "Dropping compute element without id");
                continue;
            };
            if !seen_nodes.insert((true, compute.id.clone())) {
                continue;
            }
            records.push(TopologyRecord::Compute(compute));
            for link in links {
                let key = (
                    link.source_id.clone(),
                    link.target_id.clone(),
                    link.source_interface.clone(),
                );
                if seen_links.insert(key) {
                    records.push(TopologyRecord::Link(link));
                }
            }
        }

        for node in switches {
            let Some(switch) = self.network_record(node) else {
                trace!(tag = node.tag(), "Dropping switch element without id");
                continue;
            };
            if seen_nodes.insert((false, switch.id.clone())) {
                records.push(TopologyRecord::Network(switch));
            }
        }

        debug!(?strategy, records = records.len(), "Extracted topology records");
        records
    }

    fn data_root<'a>(&self, tree: &'a NormalizedNode) -> &'a NormalizedNode {
        if self.rules.data_tags.contains(&tree.tag()) {
            return tree;
        }
        tree.child_any(self.rules.data_tags).unwrap_or(tree)
    }

    fn scoped_candidates<'a>(
        &self,
        tree: &'a NormalizedNode,
    ) -> (Vec<&'a NormalizedNode>, Vec<&'a NormalizedNode>) {
        let data = self.data_root(tree);
        (
            walk_all(data, self.rules.compute_paths),
            walk_all(data, self.rules.network_paths),
        )
    }

    fn exhaustive_candidates<'a>(
        &self,
        tree: &'a NormalizedNode,
    ) -> (Vec<&'a NormalizedNode>, Vec<&'a NormalizedNode>) {
        let mut computes = Vec::new();
        let mut switches = Vec::new();
        tree.find_all(self.rules.compute_tags, &mut computes);
        tree.find_all(self.rules.network_tags, &mut switches);
        (computes, switches)
    }

    fn compute_record(&self, node: &NormalizedNode) -> Option<(ComputeRecord, Vec<LinkRecord>)> {
        let rules = &self.rules;
        let id = node
            .field_any(rules.compute_id_fields)
            .or_else(|| node.own_text())?
            .to_string();
        let name = node.field_any(rules.name_fields).unwrap_or(id.as_str()).to_string();

        let mut interfaces = Vec::new();
        let mut links = Vec::new();
        for iface in walk_all(node, rules.interface_paths) {
            let interface = self.interface_ref(iface);
            if let Some(switch_id) = &interface.connected_switch {
                links.push(LinkRecord {
                    source_id: id.clone(),
                    target_id: switch_id.clone(),
                    source_interface: interface.name.clone(),
                    target_port: interface.connected_port.clone(),
                    status: iface
                        .field_any(rules.link_status_fields)
                        .unwrap_or(UNKNOWN_LINK_STATUS)
                        .to_string(),
                    label: None,
                });
            }
            interfaces.push(interface);
        }

        let disks = walk_all(node, rules.disk_paths)
            .into_iter()
            .map(|d| Descriptor(d.to_json()))
            .collect();

        let record = ComputeRecord {
            management_address: node.field_any(rules.management_fields).map(str::to_string),
            id,
            name,
            interfaces,
            disks,
        };
        Some((record, links))
    }

    fn interface_ref(&self, iface: &NormalizedNode) -> InterfaceRef {
        let rules = &self.rules;
        let connected_to = iface.field_any(rules.connected_to_fields);
        let connection = connected_to.map(Connection::parse).unwrap_or_default();
        InterfaceRef {
            name: iface
                .field_any(rules.interface_name_fields)
                .or_else(|| iface.own_text())
                .map(str::to_string),
            mac_address: iface.field_any(rules.mac_fields).map(str::to_string),
            connected_to: connected_to.map(str::to_string),
            connected_switch: connection.switch_id,
            connected_port: connection.port_id,
        }
    }

    fn network_record(&self, node: &NormalizedNode) -> Option<NetworkRecord> {
        let rules = &self.rules;
        let id = node.field_any(rules.network_id_fields)?.to_string();
        let name = node.field_any(rules.name_fields).unwrap_or(id.as_str()).to_string();
        let ports = walk_all(node, rules.port_paths)
            .into_iter()
            .map(|p| Descriptor(p.to_json()))
            .collect();
        Some(NetworkRecord { id, name, ports })
    }
}

/// Extract with the default rules
pub fn extract(tree: &NormalizedNode, strategy: Strategy) -> Vec<TopologyRecord> {
    Extractor::default().extract(tree, strategy)
}

/// Find resource utilization leaves anywhere in the tree
pub fn extract_health(tree: &NormalizedNode) -> DeviceHealth {
    DeviceHealth {
        uptime: tree.find_field(&["uptime", "sysUpTime"]).map(str::to_string),
        cpu_load: tree
            .find_field(&["cpuLoad", "cpu-load", "cpuUsage", "cpu-usage"])
            .and_then(parse_percent),
        memory_usage: tree
            .find_field(&["memoryUsage", "memory-usage", "memUsage"])
            .and_then(parse_percent),
    }
}

/// Parse `42`, `42%` or `41.6` into a whole percentage
fn parse_percent(s: &str) -> Option<u8> {
    let value: f64 = s.trim().trim_end_matches('%').trim().parse().ok()?;
    if !(0.0..=100.0).contains(&value) {
        return None;
    }
    Some(value.round() as u8)
}

/// Nodes reached by following each path of tags from `root`, in path order
fn walk_all<'a>(root: &'a NormalizedNode, paths: &[Path]) -> Vec<&'a NormalizedNode> {
    let mut out = Vec::new();
    for path in paths {
        let mut frontier = vec![root];
        for tag in path.iter() {
            frontier = frontier
                .into_iter()
                .flat_map(|node| node.children(tag).iter())
                .collect();
        }
        out.extend(frontier);
    }
    out
}
