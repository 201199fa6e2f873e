//! Device types for the managed-element inventory

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default NETCONF-over-SSH port
pub const NETCONF_PORT: u16 = 830;

/// Stable identifier of an inventory device
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Declared role of a device in the inventory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceType {
    Server,
    Switch,
    #[default]
    #[serde(other)]
    Other,
}

/// Reachability of a device as observed by its latest poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReachabilityStatus {
    /// Session opened and topology was extracted
    #[default]
    Online,
    /// Session opened but the device yielded nothing usable
    Warning,
    /// Session could not be opened
    Offline,
}

/// Credentials used to open a management session.
///
/// Secret material is accepted on input but never serialized back out.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "authType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Credentials {
    Password {
        user: String,
        #[serde(skip_serializing, default)]
        secret: String,
    },
    #[serde(alias = "KEY")]
    PrivateKey {
        user: String,
        #[serde(skip_serializing, default, rename = "keyMaterial")]
        key_material: String,
    },
}

impl Credentials {
    pub fn user(&self) -> &str {
        match self {
            Credentials::Password { user, .. } | Credentials::PrivateKey { user, .. } => user,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .finish_non_exhaustive(),
            Credentials::PrivateKey { user, .. } => f
                .debug_struct("PrivateKey")
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

/// A managed element as known to the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable inventory key
    pub id: DeviceId,
    /// Human-readable identifying name (defaults to the id)
    #[serde(default)]
    pub name: String,
    /// Management address (hostname or IP)
    pub address: String,
    /// NETCONF port
    #[serde(default = "default_port")]
    pub port: u16,
    pub credentials: Credentials,
    #[serde(default, rename = "type")]
    pub declared_type: DeviceType,
}

fn default_port() -> u16 {
    NETCONF_PORT
}

impl Device {
    /// Create a device with a password credential on the default port
    pub fn new(id: impl Into<String>, address: impl Into<String>, credentials: Credentials) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: DeviceId(id),
            address: address.into(),
            port: NETCONF_PORT,
            credentials,
            declared_type: DeviceType::Other,
        }
    }

    /// Name used when matching discovered records against this device
    pub fn identifying_name(&self) -> &str {
        if self.name.is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }

    /// Whether a discovered record id refers to this device
    pub fn matches(&self, record_id: &str) -> bool {
        self.id.as_str() == record_id || self.identifying_name() == record_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password() -> Credentials {
        Credentials::Password {
            user: "admin".to_string(),
            secret: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_identifying_name_falls_back_to_id() {
        let mut device = Device::new("dev1", "10.0.0.1", password());
        device.name.clear();
        assert_eq!(device.identifying_name(), "dev1");
        assert!(device.matches("dev1"));

        device.name = "core-sw".to_string();
        assert!(device.matches("core-sw"));
        assert!(device.matches("dev1"));
        assert!(!device.matches("other"));
    }

    #[test]
    fn test_credentials_never_serialize_secrets() {
        let device = Device::new("dev1", "10.0.0.1", password());
        let json = serde_json::to_string(&device).unwrap();
        assert!(json.contains("\"user\":\"admin\""));
        assert!(!json.contains("hunter2"));
        assert!(!format!("{:?}", device).contains("hunter2"));
    }

    #[test]
    fn test_device_deserializes_with_defaults() {
        let json = r#"{
            "id": "srv1",
            "address": "192.168.1.10",
            "credentials": { "authType": "KEY", "user": "root", "keyMaterial": "---KEY---" },
            "type": "SERVER"
        }"#;
        let device: Device = serde_json::from_str(json).unwrap();
        assert_eq!(device.port, NETCONF_PORT);
        assert_eq!(device.declared_type, DeviceType::Server);
        assert!(matches!(
            device.credentials,
            Credentials::PrivateKey { ref key_material, .. } if key_material == "---KEY---"
        ));
    }

    #[test]
    fn test_unknown_device_type() {
        let ty: DeviceType = serde_json::from_str("\"FIREWALL\"").unwrap();
        assert_eq!(ty, DeviceType::Other);
    }
}
