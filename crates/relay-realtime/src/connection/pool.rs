//! Connection pool: tracks all open streams indexed by tenant.

use std::sync::Arc;

use dashmap::DashMap;

use super::handle::{ConnectionId, StreamConnection};

/// Thread-safe pool of all open stream connections.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    /// Tenant ID → connections (one tenant can have many).
    by_tenant: DashMap<String, Vec<Arc<StreamConnection>>>,
    /// Connection ID → connection for direct lookup.
    by_id: DashMap<ConnectionId, Arc<StreamConnection>>,
}

impl ConnectionPool {
    /// Creates a new empty connection pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to the pool.
    pub fn add(&self, conn: Arc<StreamConnection>) {
        self.by_id.insert(conn.id, conn.clone());
        self.by_tenant
            .entry(conn.tenant_id.clone())
            .or_default()
            .push(conn);
    }

    /// Removes a connection from the pool.
    pub fn remove(&self, conn_id: &ConnectionId) -> Option<Arc<StreamConnection>> {
        let (_, conn) = self.by_id.remove(conn_id)?;
        if let Some(mut connections) = self.by_tenant.get_mut(&conn.tenant_id) {
            connections.retain(|c| c.id != *conn_id);
            if connections.is_empty() {
                drop(connections);
                self.by_tenant
                    .remove_if(&conn.tenant_id, |_, remaining| remaining.is_empty());
            }
        }
        Some(conn)
    }

    /// Gets a specific connection by ID.
    pub fn get(&self, conn_id: &ConnectionId) -> Option<Arc<StreamConnection>> {
        self.by_id.get(conn_id).map(|entry| entry.value().clone())
    }

    /// Gets all connections for a tenant.
    pub fn tenant_connections(&self, tenant_id: &str) -> Vec<Arc<StreamConnection>> {
        self.by_tenant
            .get(tenant_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Returns total number of open connections.
    pub fn connection_count(&self) -> usize {
        self.by_id.len()
    }

    /// Returns number of distinct connected tenants.
    pub fn tenant_count(&self) -> usize {
        self.by_tenant.len()
    }

    /// Returns all connections.
    pub fn all_connections(&self) -> Vec<Arc<StreamConnection>> {
        self.by_id
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
