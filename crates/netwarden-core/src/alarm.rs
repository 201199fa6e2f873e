//! Alarms raised by the poller

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::device::DeviceId;

/// Message of the alarm raised when a device becomes unreachable
pub const UNREACHABLE_MESSAGE: &str = "Device Unreachable (NETCONF Fail)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    /// `alm-` followed by 8 hex characters
    pub id: String,
    pub severity: Severity,
    pub device_id: DeviceId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alarm {
    pub fn new(severity: Severity, device_id: DeviceId, message: impl Into<String>) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("alm-{}", &uuid[..8]),
            severity,
            device_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn unreachable(device_id: DeviceId) -> Self {
        Self::new(Severity::Critical, device_id, UNREACHABLE_MESSAGE)
    }

    pub fn high_cpu(device_id: DeviceId, load: u8) -> Self {
        Self::new(Severity::Major, device_id, format!("High CPU Load: {}%", load))
    }
}

/// Receiver of alarms
#[async_trait]
pub trait AlarmSink: Send + Sync {
    async fn emit(&self, alarm: Alarm);
}

/// In-memory alarm log, oldest first
#[derive(Default)]
pub struct AlarmLog {
    alarms: RwLock<Vec<Alarm>>,
}

impl AlarmLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<Alarm> {
        self.alarms.read().await.clone()
    }

    /// Acknowledge (delete) an alarm, returns true if it existed
    pub async fn remove(&self, id: &str) -> bool {
        let mut alarms = self.alarms.write().await;
        let before = alarms.len();
        alarms.retain(|a| a.id != id);
        let removed = alarms.len() != before;
        if removed {
            info!(alarm = %id, "Alarm cleared");
        }
        removed
    }

    /// Drop every alarm of a device, returns how many were removed
    pub async fn remove_device(&self, device_id: &DeviceId) -> usize {
        let mut alarms = self.alarms.write().await;
        let before = alarms.len();
        alarms.retain(|a| &a.device_id != device_id);
        before - alarms.len()
    }
}

#[async_trait]
impl AlarmSink for AlarmLog {
    async fn emit(&self, alarm: Alarm) {
        warn!(
            alarm = %alarm.id,
            device = %alarm.device_id,
            severity = ?alarm.severity,
            "{}",
            alarm.message
        );
        self.alarms.write().await.push(alarm);
    }
}
