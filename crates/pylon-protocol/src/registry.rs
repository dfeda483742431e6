//! Concurrent directory of active subscription handles.
//!
//! Two-level mapping: connection id → (operation id → handle). The outer
//! map is sharded (`DashMap`), so mutation never takes a lock wider than
//! one shard, and all per-connection mutation happens under that
//! connection's entry — callers need no external locking.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use pylon_core::{ConnectionId, OperationId};

use crate::handle::SubscriptionHandle;

/// Why a handle could not be registered.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    /// An active handle already exists for this operation id. The registry
    /// never silently overwrites; the caller decides what to do with the
    /// existing one.
    #[error("operation '{0}' is already running")]
    Duplicate(OperationId),

    /// The connection's table is absent: it was never opened, or teardown
    /// already removed it. The caller must drop the handle (and its
    /// stream) without delivering anything.
    #[error("connection '{0}' is not open")]
    ConnectionClosed(ConnectionId),
}

/// Directory of active subscriptions across all connections.
pub struct SubscriptionRegistry {
    connections: DashMap<ConnectionId, HashMap<OperationId, Arc<SubscriptionHandle>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Create the subscription table for a connection. Idempotent; invoked
    /// at transport connect.
    pub fn open_connection(&self, connection_id: ConnectionId) {
        let _ = self.connections.entry(connection_id).or_default();
    }

    /// Whether a connection's table exists.
    pub fn is_open(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Register a handle under `(connection, operation)`.
    ///
    /// Atomic with respect to teardown: a call racing
    /// [`remove_connection`](Self::remove_connection) either lands first
    /// (and the teardown collects the handle) or observes the connection as
    /// closed and fails.
    pub fn add(
        &self,
        connection_id: &ConnectionId,
        handle: Arc<SubscriptionHandle>,
    ) -> Result<(), RegisterError> {
        let Some(mut operations) = self.connections.get_mut(connection_id) else {
            return Err(RegisterError::ConnectionClosed(connection_id.clone()));
        };
        let operation_id = handle.operation_id().clone();
        if operations.contains_key(&operation_id) {
            return Err(RegisterError::Duplicate(operation_id));
        }
        let _ = operations.insert(operation_id, handle);
        Ok(())
    }

    /// Atomic get-and-remove of one handle. The caller is responsible for
    /// closing it; the registry does no blocking work.
    pub fn remove(
        &self,
        connection_id: &ConnectionId,
        operation_id: &OperationId,
    ) -> Option<Arc<SubscriptionHandle>> {
        self.connections
            .get_mut(connection_id)?
            .remove(operation_id)
    }

    /// Atomic remove-all for connection teardown. Returns every handle that
    /// was registered; the caller must close each. Once this returns, no
    /// new handle can be added until the connection is re-opened.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> Vec<Arc<SubscriptionHandle>> {
        let Some((_, operations)) = self.connections.remove(connection_id) else {
            return Vec::new();
        };
        if !operations.is_empty() {
            debug!(
                connection_id = %connection_id,
                count = operations.len(),
                "removed connection subscriptions"
            );
        }
        operations.into_values().collect()
    }

    /// Non-mutating lookup, for diagnostics.
    pub fn get(
        &self,
        connection_id: &ConnectionId,
        operation_id: &OperationId,
    ) -> Option<Arc<SubscriptionHandle>> {
        self.connections
            .get(connection_id)?
            .get(operation_id)
            .cloned()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of active subscriptions on one connection.
    pub fn operation_count(&self, connection_id: &ConnectionId) -> usize {
        self.connections
            .get(connection_id)
            .map_or(0, |operations| operations.len())
    }

    /// Total active subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
