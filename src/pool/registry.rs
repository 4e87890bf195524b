use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::router::EndpointId;

/// Process-wide counter, so ids never collide across managers
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a checked-out connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry of connections currently checked out through a manager
///
/// Maps each outstanding connection to the endpoint pool it was drawn from,
/// so callers can release without tracking provenance themselves.
pub struct ConnectionRegistry {
    /// Checked-out connections (connection -> endpoint)
    outstanding: DashMap<ConnectionId, EndpointId>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            outstanding: DashMap::new(),
        }
    }

    /// Register a new checkout and return its identity
    pub fn register(&self, endpoint: EndpointId) -> ConnectionId {
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        self.outstanding.insert(id, endpoint);
        debug!(connection = %id, endpoint = %endpoint, "Connection registered");
        id
    }

    /// Remove a checkout; `None` if it was not registered
    pub fn unregister(&self, id: ConnectionId) -> Option<EndpointId> {
        self.outstanding.remove(&id).map(|(_, endpoint)| endpoint)
    }

    /// Remove every entry, returning what was outstanding
    pub fn drain(&self) -> Vec<(ConnectionId, EndpointId)> {
        let ids: Vec<ConnectionId> = self.outstanding.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.outstanding.remove(&id))
            .collect()
    }

    /// Number of outstanding connections
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}
