//! Peer connection factory
//!
//! One `API` instance (media engine + interceptors) is built at startup and
//! shared by every peer connection the gateway creates.

use crate::domain::{GatewayError, Result};
use std::sync::Arc;
use tracing::info;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

pub struct PeerFactory {
    api: API,
    configuration: RTCConfiguration,
}

impl PeerFactory {
    /// Build a factory with a fixed set of ICE server URLs
    pub fn new(ice_servers: &[String]) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| GatewayError::Internal(format!("codec registration failed: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| GatewayError::Internal(format!("interceptor registration failed: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }]
        };

        info!("Peer factory ready ({} ICE server groups)", ice_servers.len());

        Ok(Self {
            api,
            configuration: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
        })
    }

    /// Create a fresh peer connection with the fixed configuration
    pub async fn create(&self) -> Result<Arc<RTCPeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(self.configuration.clone())
            .await
            .map_err(|e| GatewayError::Internal(format!("peer connection creation failed: {}", e)))?;
        Ok(Arc::new(pc))
    }

    pub fn ice_server_urls(&self) -> Vec<String> {
        self.configuration
            .ice_servers
            .iter()
            .flat_map(|s| s.urls.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

    #[test]
    fn test_fixed_ice_configuration() {
        let factory = PeerFactory::new(&["stun:stun.example.com:3478".to_string()]).unwrap();
        assert_eq!(factory.ice_server_urls(), vec!["stun:stun.example.com:3478"]);

        let factory = PeerFactory::new(&[]).unwrap();
        assert!(factory.ice_server_urls().is_empty());
    }

    #[tokio::test]
    async fn test_create_peer_connection() {
        let factory = PeerFactory::new(&[]).unwrap();
        let pc = factory.create().await.unwrap();
        assert_eq!(pc.connection_state(), RTCPeerConnectionState::New);
        pc.close().await.unwrap();
    }
}
