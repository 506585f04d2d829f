//! Live bridged connection handle

use crate::domain::{ConnectionId, ConnectionState};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::peer_connection::RTCPeerConnection;

/// A bridged client connection
///
/// Holds the transport handle together with the token that stops every task
/// working on its behalf. Resources are released at most once.
pub struct ManagedConnection {
    id: ConnectionId,
    peer: Arc<RTCPeerConnection>,
    created_at: DateTime<Utc>,
    state: RwLock<ConnectionState>,
    cancel: CancellationToken,
    released: AtomicBool,
}

impl ManagedConnection {
    pub fn new(id: ConnectionId, peer: Arc<RTCPeerConnection>, cancel: CancellationToken) -> Self {
        Self {
            id,
            peer,
            created_at: Utc::now(),
            state: RwLock::new(ConnectionState::New),
            cancel,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &Arc<RTCPeerConnection> {
        &self.peer
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// State as currently reported by the transport
    pub fn transport_state(&self) -> ConnectionState {
        self.peer.connection_state().into()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Stop pumps and close the transport
    ///
    /// Returns `false` if the connection had already been released.
    pub async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.cancel.cancel();
        if let Err(e) = self.peer.close().await {
            debug!("Closing peer connection {} reported: {}", self.id, e);
        }

        info!(
            "Released connection {} (age {}s)",
            self.id,
            (Utc::now() - self.created_at).num_seconds()
        );
        true
    }
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("released", &self.is_released())
            .finish()
    }
}
