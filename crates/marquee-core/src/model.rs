// ── Inputs consumed by the supervisor ──

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// One configured device: a unique name and the settings document
/// forwarded verbatim to the receiver application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(default = "empty_settings")]
    pub settings: serde_json::Value,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, settings: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }
}

fn empty_settings() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// A complete configuration snapshot. Devices absent from a snapshot are
/// treated as removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
}

impl DeviceConfig {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self { devices }
    }
}

/// A resolved (or half-resolved) service announcement from discovery.
///
/// Either field may be missing; such events are logged and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub name: Option<String>,
    pub address: Option<SocketAddr>,
}

impl DiscoveryEvent {
    pub fn resolved(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: Some(name.into()),
            address: Some(address),
        }
    }
}
