//! Shared tunnel status table
//!
//! One entry per tunnel, one state per port mapping. Written by the tunnel
//! executors and the port conflict guard, read by the control socket. A
//! single `RwLock` protects the whole table so a snapshot never mixes two
//! instants.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tunn_core::{PortState, TunnelStatus};

use crate::tunnel::StatusCallback;

type PortTable = BTreeMap<String, PortState>;

/// Concurrency-safe table of per-tunnel, per-port states
#[derive(Debug, Default)]
pub struct StatusStore {
    tunnels: RwLock<BTreeMap<String, PortTable>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every listed port of `name` as `pending`, keeping existing states
    pub fn ensure_tunnel<S: AsRef<str>>(&self, name: &str, ports: &[S]) {
        let mut tunnels = self.tunnels.write().unwrap_or_else(PoisonError::into_inner);
        let table = tunnels.entry(name.to_string()).or_default();
        for port in ports {
            table
                .entry(port.as_ref().to_string())
                .or_insert(PortState::Pending);
        }
    }

    /// Record a state for one port, creating the tunnel entry if needed
    pub fn update(&self, name: &str, port: &str, state: PortState) {
        let mut tunnels = self.tunnels.write().unwrap_or_else(PoisonError::into_inner);
        let table = tunnels.entry(name.to_string()).or_default();
        if let Some(previous) = table.get(port) {
            if !previous.can_transition_to(&state) {
                tracing::debug!(
                    tunnel = name,
                    port,
                    from = %previous,
                    to = %state,
                    "Out-of-order port state transition"
                );
            }
        }
        table.insert(port.to_string(), state);
    }

    /// Independent copy of every tunnel and its ports, sorted by name
    pub fn snapshot(&self) -> Vec<TunnelStatus> {
        let tunnels = self.tunnels.read().unwrap_or_else(PoisonError::into_inner);
        tunnels
            .iter()
            .map(|(name, ports)| TunnelStatus {
                name: name.clone(),
                ports: ports.clone(),
            })
            .collect()
    }

    /// State of one port, if known
    pub fn get(&self, name: &str, port: &str) -> Option<PortState> {
        let tunnels = self.tunnels.read().unwrap_or_else(PoisonError::into_inner);
        tunnels.get(name).and_then(|ports| ports.get(port)).cloned()
    }

    /// Status callback writing into this store
    pub fn reporter(self: &Arc<Self>) -> StatusCallback {
        let store = Arc::clone(self);
        Arc::new(move |tunnel: &str, port: &str, state: PortState| {
            store.update(tunnel, port, state);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_independent() {
        let store = StatusStore::new();
        store.ensure_tunnel("db", &["5432", "5433"]);
        store.update("db", "5432", PortState::Active);
        store.update("cache", "6379", PortState::Connecting);

        let mut snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);

        for tunnel in &mut snapshot {
            for state in tunnel.ports.values_mut() {
                *state = PortState::error("mutated");
            }
            tunnel.ports.insert("9999".to_string(), PortState::Active);
        }
        snapshot.clear();

        let again = store.snapshot();
        assert_eq!(again.len(), 2);
        let db = again.iter().find(|t| t.name == "db").unwrap();
        assert_eq!(db.ports["5432"], PortState::Active);
        assert_eq!(db.ports["5433"], PortState::Pending);
        assert!(!db.ports.contains_key("9999"));
        let cache = again.iter().find(|t| t.name == "cache").unwrap();
        assert_eq!(cache.ports["6379"], PortState::Connecting);
    }

    #[test]
    fn test_ensure_tunnel_is_idempotent() {
        let store = StatusStore::new();
        store.ensure_tunnel("api", &["3000:3000", "4000"]);
        store.update("api", "3000:3000", PortState::Active);
        store.update("api", "4000", PortState::error("boom"));

        store.ensure_tunnel("api", &["3000:3000", "4000", "5000"]);

        assert_eq!(store.get("api", "3000:3000"), Some(PortState::Active));
        assert_eq!(store.get("api", "4000"), Some(PortState::error("boom")));
        assert_eq!(store.get("api", "5000"), Some(PortState::Pending));
    }

    #[test]
    fn test_update_creates_tunnel() {
        let store = StatusStore::new();
        store.update("web", "8080", PortState::Connecting);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "web");
        assert_eq!(snapshot[0].ports["8080"], PortState::Connecting);
    }

    #[test]
    fn test_reporter_writes_into_store() {
        let store = Arc::new(StatusStore::new());
        let report = store.reporter();
        report("db", "5432", PortState::Active);
        assert_eq!(store.get("db", "5432"), Some(PortState::Active));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = Arc::new(StatusStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let name = format!("t{}", i);
                    for port in 0..50 {
                        store.update(&name, &port.to_string(), PortState::Connecting);
                        let _ = store.snapshot();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 8);
        assert!(snapshot.iter().all(|t| t.ports.len() == 50));
    }
}
