//! Session registry and keep-alive sweep.
//!
//! A single mutex guards the connection list; every mutation to a
//! per-connection field happens through the `Arc<Connection>` obtained
//! from this registry, so the registry lock and the dialog engine agree
//! on what "the current set of connections" means at any instant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::connection::Connection;

/// Keep-alive timeout: 60 seconds.
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Registry {
    connections: Mutex<Vec<Arc<Connection>>>,
    next_session_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            connections: Mutex::new(Vec::new()),
            next_session_id: AtomicU64::new(0),
        }
    }

    pub async fn add(&self, connection: Arc<Connection>) {
        self.connections.lock().await.push(connection);
    }

    /// Allocate the next monotonic, process-wide session id.
    pub fn allocate_session_id(&self) -> String {
        (self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub async fn find_by_session(&self, session_id: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .await
            .iter()
            .find(|c| c.session_id_matches(session_id))
            .cloned()
    }

    /// Remove a connection by session id, if present.
    pub async fn remove_by_session(&self, session_id: &str) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        let idx = connections
            .iter()
            .position(|c| c.session_id_matches(session_id))?;
        Some(connections.remove(idx))
    }

    /// Remove a specific connection (by identity), used when a
    /// connection tears itself down from inside a feed fan-out loop.
    pub async fn remove(&self, connection: &Arc<Connection>) {
        let mut connections = self.connections.lock().await;
        connections.retain(|c| !Arc::ptr_eq(c, connection));
    }

    /// A point-in-time copy of the registry, safe to iterate while the
    /// registry itself is mutated concurrently.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().await.clone()
    }

    /// Remove every connection whose last keep-alive predates the
    /// timeout, tearing down their transports. Returns `(total,
    /// playing)` counts measured *after* the sweep.
    pub async fn sweep_timeouts(&self) -> (usize, usize) {
        let stale: Vec<Arc<Connection>> = {
            let connections = self.connections.lock().await;
            connections
                .iter()
                .filter(|c| c.is_stale(KEEPALIVE_TIMEOUT))
                .cloned()
                .collect()
        };

        for connection in &stale {
            connection.teardown().await;
        }

        let mut connections = self.connections.lock().await;
        connections.retain(|c| !stale.iter().any(|s| Arc::ptr_eq(s, c)));

        let total = connections.len();
        let playing = connections.iter().filter(|c| c.is_playing()).count();
        (total, playing)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_monotonic_starting_at_one() {
        let registry = Registry::new();
        assert_eq!(registry.allocate_session_id(), "1");
        assert_eq!(registry.allocate_session_id(), "2");
        assert_eq!(registry.allocate_session_id(), "3");
    }
}
