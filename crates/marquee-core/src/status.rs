// ── Status/control facade ──
//
// Read side: a per-device record built from registry snapshots. Write
// side: forced refresh. This is all the HTTP layer ever touches.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::CoreError;
use crate::supervisor::Supervisor;

/// Registry state for one known device (configured, discovered, or both).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub name: String,
    pub settings: Option<serde_json::Value>,
    pub address: Option<SocketAddr>,
    /// Start of the current connection attempt or session.
    pub connected_since: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    pub fn is_configured(&self) -> bool {
        self.settings.is_some()
    }

    pub fn is_discovered(&self) -> bool {
        self.address.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected_since.is_some()
    }

    pub fn view(&self, now: DateTime<Utc>) -> DeviceStatusView {
        DeviceStatusView {
            name: self.name.clone(),
            settings: self.settings.clone(),
            ip_address: self.address.map(|a| a.ip().to_string()),
            port: self.address.map(|a| a.port()),
            duration: self
                .connected_since
                .map(|since| format_duration((now - since).to_std().unwrap_or_default())),
        }
    }
}

/// Serializable form served to the status page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusView {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Render a connection age like `1d2h3m4s`.
///
/// Larger units are omitted while the total is below them; seconds are
/// always present.
pub fn format_duration(duration: Duration) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let total = duration.as_secs();
    let mut out = String::new();
    if total >= DAY {
        out.push_str(&format!("{}d", total / DAY));
    }
    if total >= HOUR {
        out.push_str(&format!("{}h", total % DAY / HOUR));
    }
    if total >= MINUTE {
        out.push_str(&format!("{}m", total % HOUR / MINUTE));
    }
    out.push_str(&format!("{}s", total % MINUTE));
    out
}

// ── Facade ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct StatusFacade {
    supervisor: Supervisor,
}

impl StatusFacade {
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }

    /// Every known device, ordered by name.
    pub fn devices(&self) -> Vec<DeviceStatusView> {
        let now = Utc::now();
        self.supervisor
            .snapshot()
            .iter()
            .map(|status| status.view(now))
            .collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DeviceStatus>>> {
        self.supervisor.subscribe()
    }

    /// Force a reconnect of one device, or of every connected device.
    ///
    /// Returns as soon as the request is queued.
    pub fn refresh(&self, name: Option<String>) -> Result<(), CoreError> {
        self.supervisor.refresh(name)
    }
}
