//! Registry of accepted connections not yet claimed by a listener.
//!
//! # Responsibilities
//! - Remember every connection between accept and routing
//! - Forget connections once bound or closed
//! - Force-close all remaining members on endpoint shutdown
//!
//! # Design Decisions
//! - Plain mutex; membership changes on every accept and route
//! - Connections are closed outside the lock

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::net::connection::{Connection, ConnectionId};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Arc<Connection>) {
        self.lock().insert(connection.id(), connection);
    }

    /// Returns `true` if the connection was a member.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Force-close every member and empty the registry. Returns how many
    /// connections were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Connection>> = self.lock().drain().map(|(_, c)| c).collect();
        for connection in &drained {
            connection.close();
        }
        drained.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.members.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
