//! Per-device snapshots and their persistence
//!
//! A snapshot is the latest captured state of one device. Stores keep exactly
//! one snapshot per device id and replace it wholesale on every write; there
//! is no history.
//!
//! `FileSnapshotStore` keeps one JSON file per device, named after the
//! hex-encoded device id, and writes through a temporary sibling that is
//! renamed into place so readers never observe a partial file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::device::{DeviceId, ReachabilityStatus};
use crate::topology::TopologyRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Resource utilization reported by a device, when available
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub uptime: Option<String>,
    /// Percent
    pub cpu_load: Option<u8>,
    /// Percent
    pub memory_usage: Option<u8>,
}

/// Latest captured state of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub device_id: DeviceId,
    pub reachability_status: ReachabilityStatus,
    #[serde(default)]
    pub topology: Vec<TopologyRecord>,
    #[serde(default)]
    pub health: DeviceHealth,
    /// Why the poll failed, for placeholder snapshots
    #[serde(default)]
    pub detail: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    /// Snapshot of a successful poll
    pub fn online(device_id: DeviceId, topology: Vec<TopologyRecord>, health: DeviceHealth) -> Self {
        Self {
            device_id,
            reachability_status: ReachabilityStatus::Online,
            topology,
            health,
            detail: None,
            captured_at: Utc::now(),
        }
    }

    /// Placeholder for a failed poll: no topology, no health, only a reason
    pub fn placeholder(
        device_id: DeviceId,
        status: ReachabilityStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            reachability_status: status,
            topology: Vec::new(),
            health: DeviceHealth::default(),
            detail: Some(detail.into()),
            captured_at: Utc::now(),
        }
    }
}

/// Keyed, replace-only storage of the latest snapshot per device
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the snapshot stored for `snapshot.device_id`
    async fn put(&self, snapshot: &DeviceSnapshot) -> Result<(), StoreError>;

    async fn get(&self, id: &DeviceId) -> Result<Option<DeviceSnapshot>, StoreError>;

    /// Every stored snapshot, ordered by device id
    async fn all(&self) -> Result<Vec<DeviceSnapshot>, StoreError>;

    /// Delete a device's snapshot, returns true if one existed
    async fn remove(&self, id: &DeviceId) -> Result<bool, StoreError>;
}

/// Snapshot store held in memory
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<BTreeMap<DeviceId, DeviceSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, snapshot: &DeviceSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.device_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, id: &DeviceId) -> Result<Option<DeviceSnapshot>, StoreError> {
        Ok(self.snapshots.read().await.get(id).cloned())
    }

    async fn all(&self) -> Result<Vec<DeviceSnapshot>, StoreError> {
        Ok(self.snapshots.read().await.values().cloned().collect())
    }

    async fn remove(&self, id: &DeviceId) -> Result<bool, StoreError> {
        Ok(self.snapshots.write().await.remove(id).is_some())
    }
}

/// Snapshot store backed by one JSON file per device
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    base_dir: PathBuf,
}

impl FileSnapshotStore {
    /// Open (creating if needed) a store in `base_dir`
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the file holding a device's snapshot
    pub fn snapshot_path(&self, id: &DeviceId) -> PathBuf {
        self.base_dir.join(format!("{}.json", hex::encode(id.as_str())))
    }

    fn temp_path(&self, id: &DeviceId) -> PathBuf {
        self.base_dir
            .join(format!(".{}.json.tmp", hex::encode(id.as_str())))
    }

    async fn read_file(path: &Path) -> Result<Option<DeviceSnapshot>, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn put(&self, snapshot: &DeviceSnapshot) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(snapshot)?;
        let temp = self.temp_path(&snapshot.device_id);
        let path = self.snapshot_path(&snapshot.device_id);

        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &path).await?;

        debug!(device = %snapshot.device_id, path = %path.display(), "Stored snapshot");
        Ok(())
    }

    async fn get(&self, id: &DeviceId) -> Result<Option<DeviceSnapshot>, StoreError> {
        Self::read_file(&self.snapshot_path(id)).await
    }

    async fn all(&self) -> Result<Vec<DeviceSnapshot>, StoreError> {
        let mut snapshots = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_snapshot {
                continue;
            }
            match Self::read_file(&path).await {
                Ok(Some(snapshot)) => {
                    snapshots.insert(snapshot.device_id.clone(), snapshot);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot");
                }
            }
        }

        Ok(snapshots.into_values().collect())
    }

    async fn remove(&self, id: &DeviceId) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.snapshot_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
