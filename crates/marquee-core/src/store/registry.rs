// ── Per-device state maps ──
//
// Three independent maps keyed by device name (settings, address,
// connection) plus the retry memory used by backoff. Every mutation that
// changes what a reader could see rebuilds the status snapshot and pushes
// it through a `watch` channel.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backoff::RetryState;
use crate::status::DeviceStatus;

/// A connection attempt or live session for one device.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Distinguishes this session's closure from any earlier one.
    pub id: u64,
    pub birth: DateTime<Utc>,
    pub cancel: CancellationToken,
    /// Set when the supervisor tears the session down on purpose.
    pub reload_requested: bool,
}

impl ConnectionHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            birth: Utc::now(),
            cancel: CancellationToken::new(),
            reload_requested: false,
        }
    }

    /// Request teardown with an immediate retry once it has closed.
    pub fn reload(&mut self) {
        self.reload_requested = true;
        self.cancel.cancel();
    }
}

pub struct Registry {
    settings: HashMap<String, serde_json::Value>,
    addresses: HashMap<String, SocketAddr>,
    connections: HashMap<String, ConnectionHandle>,
    retries: HashMap<String, RetryState>,
    snapshot: watch::Sender<Arc<Vec<DeviceStatus>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            settings: HashMap::new(),
            addresses: HashMap::new(),
            connections: HashMap::new(),
            retries: HashMap::new(),
            snapshot,
        }
    }

    // ── Settings ────────────────────────────────────────────────────

    pub fn settings(&self, name: &str) -> Option<&serde_json::Value> {
        self.settings.get(name)
    }

    /// Store `settings` for `name`. Returns `false` if they were already
    /// structurally equal to what was stored.
    pub fn upsert_settings(&mut self, name: &str, settings: serde_json::Value) -> bool {
        if self.settings.get(name) == Some(&settings) {
            return false;
        }
        self.settings.insert(name.to_owned(), settings);
        self.publish();
        true
    }

    pub fn remove_settings(&mut self, name: &str) -> bool {
        let removed = self.settings.remove(name).is_some();
        if removed {
            self.publish();
        }
        removed
    }

    pub fn configured_names(&self) -> impl Iterator<Item = &str> {
        self.settings.keys().map(String::as_str)
    }

    // ── Addresses ───────────────────────────────────────────────────

    pub fn address(&self, name: &str) -> Option<SocketAddr> {
        self.addresses.get(name).copied()
    }

    /// Returns `false` if the address was unchanged. Addresses are only
    /// ever overwritten, never removed.
    pub fn upsert_address(&mut self, name: &str, address: SocketAddr) -> bool {
        if self.addresses.get(name) == Some(&address) {
            return false;
        }
        self.addresses.insert(name.to_owned(), address);
        self.publish();
        true
    }

    // ── Connections ─────────────────────────────────────────────────

    pub fn connection_mut(&mut self, name: &str) -> Option<&mut ConnectionHandle> {
        self.connections.get_mut(name)
    }

    pub fn has_connection(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    /// Panics in debug builds if `name` already has a handle.
    pub fn insert_connection(&mut self, name: &str, handle: ConnectionHandle) {
        let previous = self.connections.insert(name.to_owned(), handle);
        debug_assert!(previous.is_none(), "second connection for {name}");
        self.publish();
    }

    /// Remove the handle for `name` if it is still the one identified by
    /// `id`. A stale id leaves the map untouched.
    pub fn remove_connection(&mut self, name: &str, id: u64) -> Option<ConnectionHandle> {
        if self.connections.get(name).is_none_or(|h| h.id != id) {
            return None;
        }
        let handle = self.connections.remove(name);
        self.publish();
        handle
    }

    pub fn connections_mut(&mut self) -> impl Iterator<Item = (&str, &mut ConnectionHandle)> {
        self.connections.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ── Retry memory ────────────────────────────────────────────────

    pub fn retry_state_mut(&mut self, name: &str) -> &mut RetryState {
        self.retries.entry(name.to_owned()).or_default()
    }

    // ── Snapshots ───────────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<Vec<DeviceStatus>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DeviceStatus>>> {
        self.snapshot.subscribe()
    }

    fn publish(&self) {
        let names: BTreeSet<&String> = self.settings.keys().chain(self.addresses.keys()).collect();
        let statuses = names
            .into_iter()
            .map(|name| DeviceStatus {
                name: name.clone(),
                settings: self.settings.get(name).cloned(),
                address: self.addresses.get(name).copied(),
                connected_since: self.connections.get(name).map(|h| h.birth),
            })
            .collect();
        self.snapshot.send_replace(Arc::new(statuses));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, last], 8009))
    }

    #[test]
    fn settings_compare_structurally() {
        let mut registry = Registry::new();
        assert!(registry.upsert_settings("a", json!({"url": "x", "n": [1, 2]})));
        assert!(!registry.upsert_settings("a", json!({"n": [1, 2], "url": "x"})));
        assert!(registry.upsert_settings("a", json!({"url": "y"})));
        assert!(registry.remove_settings("a"));
        assert!(!registry.remove_settings("a"));
    }

    #[test]
    fn snapshot_is_union_ordered_by_name() {
        let mut registry = Registry::new();
        registry.upsert_address("zeta", addr(3));
        registry.upsert_settings("alpha", json!({}));
        registry.upsert_address("alpha", addr(1));
        registry.upsert_settings("mid", json!({"k": 1}));

        let snapshot = registry.snapshot();
        let names: Vec<&str> = snapshot.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);

        assert!(snapshot[0].is_configured() && snapshot[0].is_discovered());
        assert!(snapshot[1].is_configured() && !snapshot[1].is_discovered());
        assert!(!snapshot[2].is_configured() && snapshot[2].is_discovered());
    }

    #[test]
    fn stale_connection_id_is_ignored() {
        let mut registry = Registry::new();
        registry.upsert_settings("a", json!({}));
        registry.insert_connection("a", ConnectionHandle::new(7));
        assert!(registry.snapshot()[0].is_connected());

        assert!(registry.remove_connection("a", 6).is_none());
        assert!(registry.has_connection("a"));
        assert!(registry.remove_connection("a", 7).is_some());
        assert!(!registry.snapshot()[0].is_connected());
    }

    #[test]
    fn subscribers_see_updates() {
        let mut registry = Registry::new();
        let mut rx = registry.subscribe();
        registry.upsert_address("a", addr(9));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update()[0].address, Some(addr(9)));

        // Unchanged address: nothing published.
        registry.upsert_address("a", addr(9));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn reload_cancels_and_flags() {
        let mut handle = ConnectionHandle::new(1);
        handle.reload();
        assert!(handle.reload_requested);
        assert!(handle.cancel.is_cancelled());
    }
}
