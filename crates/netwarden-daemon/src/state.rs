//! Application state management

use anyhow::{Context, Result};
use netwarden_core::{
    build_graph, AlarmLog, Device, DeviceId, FileSnapshotStore, Graph, Inventory,
    MemoryInventory, SnapshotStore,
};
use netwarden_discovery::{Poller, Scheduler, TriggerOutcome};
use netwarden_netconf::{Connector, SshConnector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Configured devices
    pub inventory: Arc<MemoryInventory>,
    /// Latest snapshot per device
    pub store: Arc<dyn SnapshotStore>,
    /// Alarms raised by the poller
    pub alarms: Arc<AlarmLog>,
    /// Polls devices and records snapshots and alarms
    pub poller: Poller,
    /// Poll scheduler (daily and on-demand runs)
    pub scheduler: Arc<Scheduler>,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create application state from configuration, polling over SSH and
    /// storing snapshots on disk
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let store = FileSnapshotStore::new(&config.store.path)
            .await
            .with_context(|| format!("Failed to open snapshot store at {}", config.store.path))?;
        info!(path = %config.store.path, "Snapshot store opened");

        let connector = Arc::new(SshConnector::new(config.session_config()));
        Self::with_parts(config, connector, Arc::new(store))
    }

    /// Assemble state around the given connector and store
    pub fn with_parts(
        config: Config,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Arc<Self>> {
        let inventory = Arc::new(MemoryInventory::new(config.inventory_devices()?));
        let alarms = Arc::new(AlarmLog::new());

        let poller = Poller::new(connector, store.clone(), alarms.clone(), config.poller_config());
        let scheduler = Arc::new(Scheduler::new(
            poller.clone(),
            inventory.clone(),
            config.scheduler_config(),
        ));

        Ok(Arc::new(Self {
            inventory,
            store,
            alarms,
            poller,
            scheduler,
            config,
        }))
    }

    /// Reconcile the inventory and the stored snapshots of its devices.
    ///
    /// Snapshots of devices no longer in the inventory (a poll that finished
    /// after its device was removed, or an API-added device lost on restart)
    /// are left out and deleted from the store.
    pub async fn graph(&self) -> Result<Graph> {
        let devices = self.inventory.list_devices().await;
        let known: HashSet<&DeviceId> = devices.iter().map(|d| &d.id).collect();

        let (snapshots, orphans): (Vec<_>, Vec<_>) = self
            .store
            .all()
            .await?
            .into_iter()
            .partition(|s| known.contains(&s.device_id));

        for orphan in &orphans {
            match self.store.remove(&orphan.device_id).await {
                Ok(_) => info!(device = %orphan.device_id, "Dropped snapshot of removed device"),
                Err(e) => warn!(device = %orphan.device_id, error = %e, "Failed to remove orphan snapshot"),
            }
        }

        Ok(build_graph(&devices, &snapshots))
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.inventory.list_devices().await
    }

    /// Add a device and ask for a poll; `None` if the id is taken
    pub async fn add_device(&self, device: Device) -> Option<TriggerOutcome> {
        let id = device.id.clone();
        if !self.inventory.add(device).await {
            return None;
        }
        let outcome = self.scheduler.trigger_now();
        debug!(device = %id, poll = ?outcome, "Poll requested for new device");
        Some(outcome)
    }

    /// Remove a device together with its snapshot and alarms
    pub async fn remove_device(&self, id: &DeviceId) -> bool {
        if !self.inventory.remove(id).await {
            return false;
        }
        if let Err(e) = self.store.remove(id).await {
            warn!(device = %id, error = %e, "Failed to remove snapshot");
        }
        let cleared = self.alarms.remove_device(id).await;
        debug!(device = %id, alarms_cleared = cleared, "Device state cleared");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use netwarden_core::{
        DeviceHealth, DeviceSnapshot, MemorySnapshotStore, NetworkRecord, ReadScope,
        TopologyRecord,
    };
    use netwarden_netconf::{ConnectError, DeviceSession, RawResponse, ReadError};
    use std::time::Duration;

    const SWITCH_STATE: &str = r#"<rpc-reply><data><equipment><switches><switch>
        <switchId>ghost-sw</switchId>
    </switch></switches></equipment></data></rpc-reply>"#;

    /// Opens after a delay and reports one switch
    struct SlowSwitch {
        delay: Duration,
    }

    struct SwitchSession;

    #[async_trait]
    impl DeviceSession for SwitchSession {
        async fn read(&mut self, _scope_filter: Option<&str>) -> Result<RawResponse, ReadError> {
            Ok(RawResponse {
                xml: SWITCH_STATE.as_bytes().to_vec(),
                scope: ReadScope::Filtered,
            })
        }

        async fn close(self: Box<Self>) {}
    }

    #[async_trait]
    impl Connector for SlowSwitch {
        async fn open(&self, _device: &Device) -> Result<Box<dyn DeviceSession>, ConnectError> {
            tokio::time::sleep(self.delay).await;
            Ok(Box::new(SwitchSession))
        }
    }

    fn config() -> Config {
        toml::from_str(
            r#"
[[device]]
id = "dev1"
address = "10.0.0.1"
username = "admin"
password = "admin"
"#,
        )
        .unwrap()
    }

    fn state(delay: Duration, store: Arc<MemorySnapshotStore>) -> Arc<AppState> {
        AppState::with_parts(config(), Arc::new(SlowSwitch { delay }), store).unwrap()
    }

    #[tokio::test]
    async fn test_polled_records_reach_graph() {
        let state = state(Duration::ZERO, Arc::new(MemorySnapshotStore::new()));
        state.scheduler.run_once().await;

        let graph = state.graph().await.unwrap();
        let ids: Vec<_> = graph.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["dev1", "ghost-sw"]);
    }

    #[tokio::test]
    async fn test_remove_during_poll_leaves_no_snapshot() {
        let store = Arc::new(MemorySnapshotStore::new());
        let state = state(Duration::from_millis(200), store.clone());

        let run = tokio::spawn({
            let state = state.clone();
            async move { state.scheduler.run_once().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.remove_device(&DeviceId::from("dev1")).await);
        run.await.unwrap();

        // The in-flight poll wrote its snapshot after the removal
        assert_eq!(store.all().await.unwrap().len(), 1);

        let graph = state.graph().await.unwrap();
        assert_eq!(graph.node_count(), 0);
        assert!(graph.links().is_empty());
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_of_unknown_device_is_dropped() {
        let store = Arc::new(MemorySnapshotStore::new());
        let stale = TopologyRecord::Network(NetworkRecord {
            id: "old-sw".to_string(),
            name: "old-sw".to_string(),
            ports: Vec::new(),
        });
        store
            .put(&DeviceSnapshot::online(
                DeviceId::from("api-added"),
                vec![stale],
                DeviceHealth::default(),
            ))
            .await
            .unwrap();

        let state = state(Duration::ZERO, store.clone());
        let graph = state.graph().await.unwrap();
        assert!(graph.get_node("old-sw").is_none());
        assert_eq!(graph.node_count(), 1);
        assert!(store.get(&DeviceId::from("api-added")).await.unwrap().is_none());
    }
}
