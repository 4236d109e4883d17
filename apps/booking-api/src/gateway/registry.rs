//! Connection registry: which socket belongs to which user.
//!
//! Last connect wins. A user's newest connection becomes the target of every
//! user-addressed event; older connections stay open but only receive topic
//! and global traffic.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Outcome of removing a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Unregistered {
    pub info: ConnectionInfo,
    /// The connection was still the user's active one, so the user is now
    /// offline.
    pub was_active: bool,
}

pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionInfo>,
    /// user id -> active connection id
    by_user: DashMap<String, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// Record a freshly identified connection and make it the user's active
    /// one. Returns the connection it displaced, if any.
    pub fn register(&self, info: ConnectionInfo) -> Option<String> {
        let displaced = self
            .by_user
            .insert(info.user_id.clone(), info.connection_id.clone());
        self.connections.insert(info.connection_id.clone(), info);
        displaced
    }

    pub fn unregister(&self, connection_id: &str) -> Option<Unregistered> {
        let (_, info) = self.connections.remove(connection_id)?;
        let was_active = self
            .by_user
            .remove_if(&info.user_id, |_, active| active == connection_id)
            .is_some();
        Some(Unregistered { info, was_active })
    }

    pub fn get(&self, connection_id: &str) -> Option<ConnectionInfo> {
        self.connections.get(connection_id).map(|c| c.clone())
    }

    /// The connection that currently receives events addressed to `user_id`.
    pub fn active_connection(&self, user_id: &str) -> Option<String> {
        self.by_user.get(user_id).map(|c| c.clone())
    }

    pub fn is_active(&self, connection_id: &str) -> bool {
        self.connections
            .get(connection_id)
            .is_some_and(|info| self.active_connection(&info.user_id).as_deref() == Some(connection_id))
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
