//! Configuration loading and validation

use anyhow::{bail, Context, Result};
use netwarden_core::device::{Credentials, Device, DeviceId, DeviceType, NETCONF_PORT};
use netwarden_discovery::{
    PollerConfig, SchedulerConfig, DEFAULT_CPU_ALARM_THRESHOLD, DEFAULT_MAX_CONCURRENCY,
};
use netwarden_netconf::{SessionConfig, DEFAULT_SCOPE_FILTER};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub netconf: NetconfConfig,
    #[serde(default)]
    pub poller: PollerSection,
    #[serde(default)]
    pub store: StoreConfig,
    /// Inventory seed
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Seconds between scheduled polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Poll all devices once at startup
    #[serde(default)]
    pub poll_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            poll_interval_secs: default_poll_interval(),
            poll_on_start: false,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_poll_interval() -> u64 {
    86400 // daily
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetconfConfig {
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub read_timeout_secs: u64,
    /// Subtree filter for the scoped read; empty disables scoping
    #[serde(default = "default_scope_filter")]
    pub scope_filter: String,
    /// Accepted host key fingerprints; empty accepts any host key
    #[serde(default)]
    pub known_host_keys: Vec<String>,
}

impl Default for NetconfConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_timeout(),
            read_timeout_secs: default_timeout(),
            scope_filter: default_scope_filter(),
            known_host_keys: Vec::new(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_scope_filter() -> String {
    DEFAULT_SCOPE_FILTER.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// CPU load percentage above which a MAJOR alarm is raised
    #[serde(default = "default_cpu_alarm_threshold")]
    pub cpu_alarm_threshold: u8,
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            cpu_alarm_threshold: default_cpu_alarm_threshold(),
        }
    }
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_cpu_alarm_threshold() -> u8 {
    DEFAULT_CPU_ALARM_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one snapshot file per device
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "./snapshots".to_string()
}

/// A device entry of the inventory seed.
///
/// Secrets are read from the file but never written back out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
    #[serde(default = "default_netconf_port")]
    pub port: u16,
    #[serde(default, rename = "type")]
    pub device_type: DeviceType,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Inline private key
    #[serde(default, skip_serializing)]
    pub ssh_key: Option<String>,
    /// Private key read from a file
    #[serde(default)]
    pub ssh_key_path: Option<String>,
}

fn default_netconf_port() -> u16 {
    NETCONF_PORT
}

impl DeviceConfig {
    /// Resolve credentials and build the inventory device
    pub fn to_device(&self) -> Result<Device> {
        let credentials = match (&self.ssh_key, &self.ssh_key_path, &self.password) {
            (Some(key), _, _) => Credentials::PrivateKey {
                user: self.username.clone(),
                key_material: key.clone(),
            },
            (None, Some(path), _) => Credentials::PrivateKey {
                user: self.username.clone(),
                key_material: std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read SSH key for device '{}': {}", self.id, path))?,
            },
            (None, None, Some(password)) => Credentials::Password {
                user: self.username.clone(),
                secret: password.clone(),
            },
            (None, None, None) => bail!(
                "Device '{}' needs one of password, ssh_key or ssh_key_path",
                self.id
            ),
        };

        Ok(Device {
            id: DeviceId::new(self.id.clone()),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            address: self.address.clone(),
            port: self.port,
            credentials,
            declared_type: self.device_type,
        })
    }
}

impl Config {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_secs(self.netconf.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.netconf.read_timeout_secs),
            known_host_keys: self.netconf.known_host_keys.clone(),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        let filter = self.netconf.scope_filter.trim();
        PollerConfig {
            scope_filter: (!filter.is_empty()).then(|| filter.to_string()),
            max_concurrency: self.poller.max_concurrency,
            cpu_alarm_threshold: self.poller.cpu_alarm_threshold,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.daemon.poll_interval_secs.max(1)),
            poll_on_start: self.daemon.poll_on_start,
        }
    }

    /// Inventory seed devices, rejecting duplicate ids
    pub fn inventory_devices(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = Vec::with_capacity(self.devices.len());
        for entry in &self.devices {
            let device = entry.to_device()?;
            if devices.iter().any(|d| d.id == device.id) {
                bail!("Duplicate device id '{}' in configuration", device.id);
            }
            devices.push(device);
        }
        Ok(devices)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), devices = config.devices.len(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
