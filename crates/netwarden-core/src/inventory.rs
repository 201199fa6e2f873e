//! Device inventory seam
//!
//! The inventory is owned by an external collaborator; the discovery pipeline
//! only reads it. `MemoryInventory` is the in-process implementation used by
//! the daemon, seeded from configuration.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::device::{Device, DeviceId};

/// Read access to the configured devices
#[async_trait]
pub trait Inventory: Send + Sync {
    /// All configured devices, ordered by id
    async fn list_devices(&self) -> Vec<Device>;

    async fn get_device(&self, id: &DeviceId) -> Option<Device>;
}

/// In-memory inventory keyed by device id
#[derive(Default)]
pub struct MemoryInventory {
    devices: RwLock<BTreeMap<DeviceId, Device>>,
}

impl MemoryInventory {
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        Self {
            devices: RwLock::new(devices.into_iter().map(|d| (d.id.clone(), d)).collect()),
        }
    }

    /// Add a device, returns false if the id is already taken
    pub async fn add(&self, device: Device) -> bool {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&device.id) {
            return false;
        }
        info!(device = %device.id, address = %device.address, "Device added to inventory");
        devices.insert(device.id.clone(), device);
        true
    }

    /// Remove a device by id, returns true if it existed
    pub async fn remove(&self, id: &DeviceId) -> bool {
        let removed = self.devices.write().await.remove(id).is_some();
        if removed {
            info!(device = %id, "Device removed from inventory");
        }
        removed
    }
}

#[async_trait]
impl Inventory for MemoryInventory {
    async fn list_devices(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    async fn get_device(&self, id: &DeviceId) -> Option<Device> {
        self.devices.read().await.get(id).cloned()
    }
}
