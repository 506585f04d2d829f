/// Peer Connection Registry
///
/// Tracks the live bridged connections by id. Readers run concurrently,
/// writers are exclusive. The lock is only held for map operations, never
/// across transport I/O.

use super::connection::ManagedConnection;
use crate::domain::{ConnectionId, GatewayError, Result};
use metrics::gauge;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct PeerConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ManagedConnection>>>,
}

impl PeerConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a connection under its id
    ///
    /// Ids are random UUIDs; a collision means a bug, reported as `Internal`.
    pub async fn put(&self, id: ConnectionId, conn: Arc<ManagedConnection>) -> Result<()> {
        let count = {
            let mut connections = self.connections.write().await;
            if connections.contains_key(&id) {
                return Err(GatewayError::Internal(format!("connection id collision: {}", id)));
            }
            connections.insert(id, conn);
            connections.len()
        };

        gauge!("gateway_active_connections").set(count as f64);
        info!("Registered connection {} ({} active)", id, count);
        Ok(())
    }

    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<ManagedConnection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Remove a connection; absent ids are a silent no-op
    pub async fn remove(&self, id: &ConnectionId) -> Option<Arc<ManagedConnection>> {
        let (removed, count) = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(id);
            (removed, connections.len())
        };

        if removed.is_some() {
            gauge!("gateway_active_connections").set(count as f64);
            info!("Removed connection {} ({} active)", id, count);
        } else {
            debug!("Connection {} not registered, nothing to remove", id);
        }
        removed
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Take every connection out of the registry
    pub async fn drain(&self) -> Vec<Arc<ManagedConnection>> {
        let drained: Vec<_> = self.connections.write().await.drain().map(|(_, c)| c).collect();
        gauge!("gateway_active_connections").set(0.0);
        drained
    }
}

impl Default for PeerConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::protocols::webrtc::PeerFactory;
    use tokio_util::sync::CancellationToken;

    async fn connection(factory: &PeerFactory) -> Arc<ManagedConnection> {
        Arc::new(ManagedConnection::new(
            ConnectionId::new(),
            factory.create().await.unwrap(),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let factory = PeerFactory::new(&[]).unwrap();
        let registry = PeerConnectionRegistry::new();
        let conn = connection(&factory).await;
        let id = conn.id();

        registry.put(id, conn.clone()).await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(&id).await.is_some());

        let removed = registry.remove(&id).await;
        assert!(removed.is_some());
        assert!(registry.is_empty().await);
        assert!(registry.get(&id).await.is_none());

        conn.release().await;
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let factory = PeerFactory::new(&[]).unwrap();
        let registry = PeerConnectionRegistry::new();
        let conn = connection(&factory).await;
        registry.put(conn.id(), conn.clone()).await.unwrap();

        let before = registry.ids().await;
        assert!(registry.remove(&ConnectionId::new()).await.is_none());
        let after = registry.ids().await;

        assert_eq!(before, after);
        assert_eq!(registry.len().await, 1);

        conn.release().await;
    }

    #[tokio::test]
    async fn test_duplicate_put_is_rejected() {
        let factory = PeerFactory::new(&[]).unwrap();
        let registry = PeerConnectionRegistry::new();
        let conn = connection(&factory).await;

        registry.put(conn.id(), conn.clone()).await.unwrap();
        let result = registry.put(conn.id(), conn.clone()).await;
        assert!(matches!(result, Err(GatewayError::Internal(_))));
        assert_eq!(registry.len().await, 1);

        conn.release().await;
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let factory = PeerFactory::new(&[]).unwrap();
        let registry = PeerConnectionRegistry::new();
        for _ in 0..3 {
            let conn = connection(&factory).await;
            registry.put(conn.id(), conn).await.unwrap();
        }

        let drained = registry.drain().await;
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty().await);

        for conn in drained {
            conn.release().await;
        }
    }
}
