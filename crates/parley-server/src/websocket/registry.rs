//! Live connection set with isolated-failure broadcast.

use std::sync::Arc;

use dashmap::DashMap;
use parley_core::ConnectionId;
use tracing::{debug, info, warn};

use super::connection::{ChatConnection, SendError};

/// Registry of all open chat connections.
///
/// A connection is present iff its state is `Open`. Broadcast works on a
/// snapshot of the live set, so registration and removal may run concurrently
/// with it.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ChatConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Open the connection and add it to the live set.
    ///
    /// A connection that was closed before registration is not added.
    pub fn register(&self, connection: Arc<ChatConnection>) {
        if !connection.mark_open() {
            debug!(conn_id = %connection.id, "skipping registration of closed connection");
            return;
        }
        info!(
            conn_id = %connection.id,
            client_id = %connection.client_id,
            "connection registered"
        );
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    /// Remove the connection and close it. No-op if already absent.
    pub fn deregister(&self, connection: &ChatConnection) {
        let removed = self.connections.remove(&connection.id).is_some();
        let closed = connection.close();
        if removed || closed {
            info!(
                conn_id = %connection.id,
                client_id = %connection.client_id,
                "connection deregistered"
            );
        }
    }

    /// Send `text` to every registered connection.
    ///
    /// A connection whose send fails is deregistered; the others are unaffected.
    /// Returns how many connections accepted the frame.
    pub fn broadcast(&self, text: &str) -> usize {
        let snapshot: Vec<Arc<ChatConnection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let frame = Arc::new(text.to_string());
        let mut delivered = 0;
        for conn in &snapshot {
            match conn.send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        conn_id = %conn.id,
                        client_id = %conn.client_id,
                        error = %e,
                        "broadcast send failed, dropping connection"
                    );
                    self.deregister(conn);
                }
            }
        }
        debug!(recipients = snapshot.len(), delivered, "broadcast");
        delivered
    }

    /// Unicast to one connection. On failure the caller is expected to
    /// deregister it.
    pub fn send_to(&self, connection: &ChatConnection, text: impl Into<String>) -> Result<(), SendError> {
        connection.send(Arc::new(text.into()))
    }

    /// Deregister every connection (server shutdown).
    pub fn close_all(&self) -> usize {
        let snapshot: Vec<Arc<ChatConnection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn in &snapshot {
            self.deregister(conn);
        }
        snapshot.len()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
