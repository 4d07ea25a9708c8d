use std::collections::{HashMap, HashSet};
use std::fmt;

use tokio::time::{Duration, Instant};
use uuid::Uuid;

/// Transport-assigned identity of one live duplex session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authenticated connection and its last heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub user_id: String,
    pub connection_id: ConnectionId,
    pub last_ping: Instant,
}

/// Maps users to their live connections, with a reverse index by connection.
///
/// Every operation is synchronous and never fails: stale references are
/// no-ops because eviction races with heartbeats.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: HashMap<ConnectionId, ConnectionRecord>,
    by_user: HashMap<String, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `connection_id` as belonging to `user_id`.
    ///
    /// Re-registering refreshes the record instead of duplicating it; if the
    /// connection was bound to another user it moves. Returns `true` when the
    /// user had no live connection before.
    pub fn register(&mut self, user_id: &str, connection_id: ConnectionId) -> bool {
        let now = Instant::now();

        if let Some(record) = self.records.get_mut(&connection_id) {
            if record.user_id == user_id {
                record.last_ping = now;
                return false;
            }
        }
        self.unregister(connection_id);

        let came_online = !self.is_online(user_id);
        self.records.insert(
            connection_id,
            ConnectionRecord {
                user_id: user_id.to_string(),
                connection_id,
                last_ping: now,
            },
        );
        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id);
        came_online
    }

    /// Remove the record for `connection_id`, whoever owns it.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<ConnectionRecord> {
        let record = self.records.remove(&connection_id)?;
        if let Some(connections) = self.by_user.get_mut(&record.user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                self.by_user.remove(&record.user_id);
            }
        }
        Some(record)
    }

    pub fn connections_for(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.by_user.get(user_id).cloned().unwrap_or_default()
    }

    /// Refresh `last_ping`. Returns `false` if the connection was already evicted.
    pub fn touch(&mut self, connection_id: ConnectionId) -> bool {
        match self.records.get_mut(&connection_id) {
            Some(record) => {
                record.last_ping = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&ConnectionRecord> {
        self.records.get(&connection_id)
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<&str> {
        self.records
            .get(&connection_id)
            .map(|record| record.user_id.as_str())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user
            .get(user_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    /// Whether the connection has been silent for longer than `timeout`.
    pub fn is_expired(
        &self,
        connection_id: ConnectionId,
        now: Instant,
        timeout: Duration,
    ) -> bool {
        self.records
            .get(&connection_id)
            .is_some_and(|record| now.saturating_duration_since(record.last_ping) > timeout)
    }

    pub fn connection_count(&self) -> usize {
        self.records.len()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_user.clear();
    }
}
