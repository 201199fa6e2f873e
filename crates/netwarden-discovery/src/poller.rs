//! Device poller: one NETCONF read per device, one snapshot per poll
//!
//! Every poll ends in exactly one persisted snapshot. A device that cannot be
//! reached gets an OFFLINE placeholder; a device that answered but yielded no
//! topology gets a WARNING placeholder. Placeholders never carry partial
//! topology.

use netwarden_core::alarm::{Alarm, AlarmSink};
use netwarden_core::device::{Device, ReachabilityStatus};
use netwarden_core::extract::{extract_health, Extractor, Strategy};
use netwarden_core::snapshot::{DeviceSnapshot, SnapshotStore};
use netwarden_core::tree::normalize;
use netwarden_netconf::{Connector, RawResponse, DEFAULT_SCOPE_FILTER};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Default number of devices polled at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Default CPU load (percent) above which an alarm is raised
pub const DEFAULT_CPU_ALARM_THRESHOLD: u8 = 80;

/// Poller configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Subtree filter for the scoped read; `None` always reads everything
    pub scope_filter: Option<String>,
    pub max_concurrency: usize,
    pub cpu_alarm_threshold: u8,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            scope_filter: Some(DEFAULT_SCOPE_FILTER.to_string()),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cpu_alarm_threshold: DEFAULT_CPU_ALARM_THRESHOLD,
        }
    }
}

/// Polls devices and persists their snapshots
#[derive(Clone)]
pub struct Poller {
    connector: Arc<dyn Connector>,
    store: Arc<dyn SnapshotStore>,
    alarms: Arc<dyn AlarmSink>,
    extractor: Arc<Extractor>,
    config: Arc<PollerConfig>,
}

impl Poller {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn SnapshotStore>,
        alarms: Arc<dyn AlarmSink>,
        config: PollerConfig,
    ) -> Self {
        Self {
            connector,
            store,
            alarms,
            extractor: Arc::new(Extractor::default()),
            config: Arc::new(config),
        }
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll one device, persist and return its snapshot
    pub async fn poll_one(&self, device: &Device) -> DeviceSnapshot {
        let previous = match self.store.get(&device.id).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(device = %device.id, error = %e, "Failed to load previous snapshot");
                None
            }
        };

        let snapshot = self.capture(device).await;

        if let Err(e) = self.store.put(&snapshot).await {
            warn!(device = %device.id, error = %e, "Failed to persist snapshot");
        }
        self.raise_alarms(previous.as_ref(), &snapshot).await;

        info!(
            device = %device.id,
            status = ?snapshot.reachability_status,
            records = snapshot.topology.len(),
            "Device polled"
        );
        snapshot
    }

    /// Poll every device with bounded concurrency. Snapshots are persisted
    /// as each device completes and returned ordered by device id.
    pub async fn poll_all(&self, devices: &[Device]) -> Vec<DeviceSnapshot> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        info!(devices = devices.len(), "Starting poll");

        for device in devices {
            let poller = self.clone();
            let device = device.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                Some(poller.poll_one(&device).await)
            });
        }

        let mut snapshots = Vec::with_capacity(devices.len());
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Poll task failed"),
            }
        }
        snapshots.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        let online = snapshots
            .iter()
            .filter(|s| s.reachability_status == ReachabilityStatus::Online)
            .count();
        info!(
            polled = snapshots.len(),
            online = online,
            failed = snapshots.len() - online,
            "Poll complete"
        );
        snapshots
    }

    /// Open, read, close. Never fails: errors become placeholders.
    async fn capture(&self, device: &Device) -> DeviceSnapshot {
        let mut session = match self.connector.open(device).await {
            Ok(session) => session,
            Err(e) => {
                warn!(device = %device.id, error = %e, "Failed to open session");
                return DeviceSnapshot::placeholder(
                    device.id.clone(),
                    ReachabilityStatus::Offline,
                    e.to_string(),
                );
            }
        };

        let result = session.read(self.config.scope_filter.as_deref()).await;
        session.close().await;

        match result {
            Ok(response) => self.snapshot_from_response(device, &response),
            Err(e) => {
                warn!(device = %device.id, error = %e, "Failed to read device state");
                DeviceSnapshot::placeholder(
                    device.id.clone(),
                    ReachabilityStatus::Warning,
                    e.to_string(),
                )
            }
        }
    }

    fn snapshot_from_response(&self, device: &Device, response: &RawResponse) -> DeviceSnapshot {
        let tree = match normalize(&response.xml) {
            Ok(tree) => tree,
            Err(e) => {
                warn!(device = %device.id, error = %e, "Unparseable device state");
                return DeviceSnapshot::placeholder(
                    device.id.clone(),
                    ReachabilityStatus::Warning,
                    format!("Malformed response: {}", e),
                );
            }
        };

        let strategy = Strategy::from(response.scope);
        let mut records = self.extractor.extract(&tree, strategy);
        if records.is_empty() && strategy == Strategy::Scoped {
            debug!(device = %device.id, "Scoped extraction found nothing, searching whole tree");
            records = self.extractor.extract(&tree, Strategy::Exhaustive);
        }

        if records.is_empty() {
            return DeviceSnapshot::placeholder(
                device.id.clone(),
                ReachabilityStatus::Warning,
                "No topology records in device state",
            );
        }
        DeviceSnapshot::online(device.id.clone(), records, extract_health(&tree))
    }

    async fn raise_alarms(&self, previous: Option<&DeviceSnapshot>, snapshot: &DeviceSnapshot) {
        let was_offline = previous
            .map(|p| p.reachability_status == ReachabilityStatus::Offline)
            .unwrap_or(false);
        if snapshot.reachability_status == ReachabilityStatus::Offline && !was_offline {
            self.alarms
                .emit(Alarm::unreachable(snapshot.device_id.clone()))
                .await;
        }

        let threshold = self.config.cpu_alarm_threshold;
        let was_high = previous
            .and_then(|p| p.health.cpu_load)
            .map(|load| load > threshold)
            .unwrap_or(false);
        if let Some(load) = snapshot.health.cpu_load {
            if load > threshold && !was_high {
                self.alarms
                    .emit(Alarm::high_cpu(snapshot.device_id.clone(), load))
                    .await;
            }
        }
    }
}
