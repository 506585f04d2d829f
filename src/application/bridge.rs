/// Bridge service
///
/// Accepts client offers, negotiates a connection for each and keeps it
/// registered until the lifecycle monitor or shutdown tears it down.

use crate::domain::{ConnectionId, GatewayError, Result};
use crate::infrastructure::protocols::webrtc::{
    parse_offer, ConnectionLifecycleMonitor, NegotiationEngine, PeerConnectionRegistry,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct BridgeService {
    engine: NegotiationEngine,
    registry: Arc<PeerConnectionRegistry>,
    monitor: Arc<ConnectionLifecycleMonitor>,
    shutdown: CancellationToken,
}

impl BridgeService {
    pub fn new(
        engine: NegotiationEngine,
        registry: Arc<PeerConnectionRegistry>,
        monitor: Arc<ConnectionLifecycleMonitor>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            registry,
            monitor,
            shutdown,
        }
    }

    /// Negotiate a new bridged connection for `offer_sdp`
    ///
    /// Returns the new connection's id and the complete answer SDP. Nothing
    /// is registered unless the whole exchange succeeds.
    pub async fn connect(&self, offer_sdp: &str) -> Result<(ConnectionId, String)> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::ShutdownCanceled);
        }

        let offer = parse_offer(offer_sdp)?;
        let negotiated = self
            .engine
            .negotiate(offer, self.shutdown.child_token())
            .await?;

        let connection = negotiated.connection;
        let connection_id = connection.id();
        if let Err(e) = self.registry.put(connection_id, connection.clone()).await {
            connection.release().await;
            return Err(e);
        }

        // The transport may have failed between the answer and registration,
        // in which case its terminal event was already ignored.
        if connection.transport_state().is_terminal() {
            warn!("Connection {} ended before registration", connection_id);
            self.monitor.cleanup(connection_id).await;
        } else if self.shutdown.is_cancelled() {
            self.monitor.cleanup(connection_id).await;
            return Err(GatewayError::ShutdownCanceled);
        }

        info!(
            "Bridged connection {} ({} active)",
            connection_id,
            self.registry.len().await
        );
        Ok((connection_id, negotiated.answer))
    }

    pub fn registry(&self) -> &Arc<PeerConnectionRegistry> {
        &self.registry
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting offers and release every registered connection
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let connections = self.registry.ids().await;
        let count = connections.len();
        for connection_id in connections {
            self.monitor.cleanup(connection_id).await;
        }
        info!("Released {} bridged connections", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::BridgeTracks;
    use crate::infrastructure::protocols::webrtc::PeerFactory;
    use std::time::Duration;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    fn service(shutdown: CancellationToken) -> (BridgeService, Arc<PeerFactory>) {
        let factory = Arc::new(PeerFactory::new(&[]).unwrap());
        service_with(factory, Duration::from_secs(10), shutdown)
    }

    fn service_with(
        factory: Arc<PeerFactory>,
        gather_timeout: Duration,
        shutdown: CancellationToken,
    ) -> (BridgeService, Arc<PeerFactory>) {
        let registry = Arc::new(PeerConnectionRegistry::new());
        let tracks = Arc::new(BridgeTracks::new());
        let (monitor, _) =
            ConnectionLifecycleMonitor::spawn(registry.clone(), tracks.clone(), shutdown.clone());
        let engine = NegotiationEngine::new(
            factory.clone(),
            tracks,
            monitor.clone(),
            gather_timeout,
        );
        (
            BridgeService::new(engine, registry, monitor, shutdown),
            factory,
        )
    }

    async fn client_offer(factory: &PeerFactory) -> String {
        let client = factory.create().await.unwrap();
        client
            .add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .unwrap();
        let offer = client.create_offer(None).await.unwrap();
        let mut gather_complete = client.gathering_complete_promise().await;
        client.set_local_description(offer).await.unwrap();
        let _ = gather_complete.recv().await;
        let sdp = client.local_description().await.unwrap().sdp;
        client.close().await.unwrap();
        sdp
    }

    #[tokio::test]
    async fn test_connect_registers_connection() {
        let (service, factory) = service(CancellationToken::new());
        let offer = client_offer(&factory).await;

        let (id, answer) = service.connect(&offer).await.unwrap();
        assert!(answer.contains("m=audio"));
        assert!(service.registry().contains(&id).await);
        assert_eq!(service.registry().len().await, 1);

        service.shutdown().await;
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_offer() {
        let (service, _) = service(CancellationToken::new());

        let result = service.connect("invalid").await;
        assert!(matches!(result, Err(GatewayError::InvalidOffer(_))));
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_gather_timeout_registers_nothing() {
        let stalled = Arc::new(PeerFactory::new(&["stun:10.255.255.1:3478".to_string()]).unwrap());
        let (service, _) =
            service_with(stalled, Duration::from_millis(1), CancellationToken::new());
        let offer = client_offer(&PeerFactory::new(&[]).unwrap()).await;

        let result = service.connect(&offer).await;

        assert!(matches!(result, Err(GatewayError::Negotiation(_))));
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_connect_after_shutdown() {
        let (service, factory) = service(CancellationToken::new());
        let offer = client_offer(&factory).await;
        service.shutdown().await;

        let result = service.connect(&offer).await;
        assert!(matches!(result, Err(GatewayError::ShutdownCanceled)));
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_connections_get_distinct_ids() {
        let (service, factory) = service(CancellationToken::new());

        let (first, _) = service.connect(&client_offer(&factory).await).await.unwrap();
        let (second, _) = service.connect(&client_offer(&factory).await).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(service.registry().len().await, 2);

        service.shutdown().await;
    }
}
