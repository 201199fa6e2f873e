//! NetWarden Core - Device types, XML normalization, topology extraction and
//! graph reconciliation
//!
//! This crate provides the protocol-independent half of the discovery pipeline:
//! - Device and inventory types for the managed elements
//! - Normalized XML tree built from device state payloads
//! - Topology extraction (compute nodes, switches, links) from that tree
//! - Per-device snapshots and their stores
//! - Reconciliation of all snapshots into one global graph
//! - Alarms raised while polling

pub mod alarm;
pub mod device;
pub mod extract;
pub mod graph;
pub mod inventory;
pub mod snapshot;
pub mod topology;
pub mod tree;

pub use alarm::{Alarm, AlarmLog, AlarmSink, Severity};
pub use device::{Credentials, Device, DeviceId, DeviceType, ReachabilityStatus, NETCONF_PORT};
pub use extract::{extract, extract_health, Extractor, ExtractorRules, ReadScope, Strategy};
pub use graph::{build_graph, Graph, LinkView, NodeOrigin, NodeView};
pub use inventory::{Inventory, MemoryInventory};
pub use snapshot::{
    DeviceHealth, DeviceSnapshot, FileSnapshotStore, MemorySnapshotStore, SnapshotStore,
    StoreError,
};
pub use topology::{ComputeRecord, Descriptor, InterfaceRef, LinkRecord, NetworkRecord, TopologyRecord};
pub use tree::{normalize, NormalizeError, NormalizedNode};
