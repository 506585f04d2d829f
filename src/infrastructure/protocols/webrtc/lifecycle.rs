/// Connection Lifecycle Monitor
///
/// Transport state-change callbacks are turned into `StateEvent`s and queued
/// to one monitor task. A terminal state (failed/closed) triggers cleanup:
/// the connection leaves the registry, gives up the inbound bridge track,
/// stops its pumps and closes its transport. Cleanup runs at most once per id.

use super::connection::ManagedConnection;
use super::registry::PeerConnectionRegistry;
use crate::domain::{ConnectionId, ConnectionState};
use crate::infrastructure::media::BridgeTracks;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// A lifecycle transition reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateEvent {
    pub connection_id: ConnectionId,
    pub state: ConnectionState,
}

pub struct ConnectionLifecycleMonitor {
    registry: Arc<PeerConnectionRegistry>,
    tracks: Arc<BridgeTracks>,
    events: mpsc::UnboundedSender<StateEvent>,
}

impl ConnectionLifecycleMonitor {
    /// Create the monitor and spawn its event loop
    ///
    /// The loop ends when `shutdown` is cancelled.
    pub fn spawn(
        registry: Arc<PeerConnectionRegistry>,
        tracks: Arc<BridgeTracks>,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(Self {
            registry,
            tracks,
            events: tx,
        });

        let handle = tokio::spawn(monitor.clone().run(rx, shutdown));
        (monitor, handle)
    }

    /// Forward the transport's state changes for `conn` into the event queue
    pub fn watch(&self, conn: &ManagedConnection) {
        let events = self.events.clone();
        let connection_id = conn.id();

        conn.peer()
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let event = StateEvent {
                    connection_id,
                    state: state.into(),
                };
                // Receiver is gone only after shutdown
                let _ = events.send(event);
                Box::pin(async {})
            }));
    }

    /// Queue an event as if the transport had reported it
    pub fn notify(&self, event: StateEvent) {
        let _ = self.events.send(event);
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<StateEvent>, shutdown: CancellationToken) {
        info!("Connection lifecycle monitor started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        info!("Connection lifecycle monitor stopped");
    }

    /// Apply one state transition
    pub async fn handle_event(&self, event: StateEvent) {
        let StateEvent { connection_id, state } = event;

        let Some(conn) = self.registry.get(&connection_id).await else {
            debug!("State {} for unregistered connection {}, ignoring", state, connection_id);
            return;
        };

        conn.set_state(state).await;
        info!("Connection {} is {}", connection_id, state);

        if state.is_terminal() {
            self.cleanup(connection_id).await;
        }
    }

    /// Tear down a connection
    ///
    /// Safe to call repeatedly: only the call that actually removes the
    /// connection from the registry releases it. Returns whether this call did
    /// the work.
    pub async fn cleanup(&self, connection_id: ConnectionId) -> bool {
        let Some(conn) = self.registry.remove(&connection_id).await else {
            return false;
        };

        self.tracks.inbound().release(connection_id).await;
        conn.release().await;
        info!("Cleaned up connection {}", connection_id);
        true
    }
}
