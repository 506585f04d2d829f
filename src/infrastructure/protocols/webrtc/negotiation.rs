/// Negotiation Engine
///
/// Turns a client's SDP offer into a complete answer. Candidates are never
/// trickled: the answer is returned only once ICE gathering is complete, so
/// it carries every local candidate.

use super::connection::ManagedConnection;
use super::lifecycle::ConnectionLifecycleMonitor;
use super::peer_factory::PeerFactory;
use crate::domain::{ConnectionId, GatewayError, Result};
use crate::infrastructure::media::{BridgeTracks, TrackRelay};
use metrics::counter;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Parse a request body as an SDP offer with at least one media section
pub fn parse_offer(body: &str) -> Result<RTCSessionDescription> {
    let offer = RTCSessionDescription::offer(body.to_owned())
        .map_err(|e| GatewayError::InvalidOffer(e.to_string()))?;

    let parsed = offer
        .unmarshal()
        .map_err(|e| GatewayError::InvalidOffer(e.to_string()))?;
    if parsed.media_descriptions.is_empty() {
        return Err(GatewayError::InvalidOffer(
            "offer has no media sections".to_string(),
        ));
    }

    Ok(offer)
}

/// Outcome of a successful negotiation
pub struct Negotiated {
    pub connection: Arc<ManagedConnection>,
    pub answer: String,
}

pub struct NegotiationEngine {
    factory: Arc<PeerFactory>,
    tracks: Arc<BridgeTracks>,
    monitor: Arc<ConnectionLifecycleMonitor>,
    gather_timeout: Duration,
}

impl NegotiationEngine {
    pub fn new(
        factory: Arc<PeerFactory>,
        tracks: Arc<BridgeTracks>,
        monitor: Arc<ConnectionLifecycleMonitor>,
        gather_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            tracks,
            monitor,
            gather_timeout,
        }
    }

    /// Build a connection for `offer` and produce the final answer
    ///
    /// `cancel` becomes the connection's own token: cancelling it aborts the
    /// handshake and, later, stops the connection's pumps. On any error the
    /// transport is closed before returning.
    pub async fn negotiate(
        &self,
        offer: RTCSessionDescription,
        cancel: CancellationToken,
    ) -> Result<Negotiated> {
        let peer = self.factory.create().await?;
        let connection = Arc::new(ManagedConnection::new(ConnectionId::new(), peer, cancel));
        self.negotiate_connection(connection, offer).await
    }

    /// Run the offer/answer exchange on an already created connection
    pub async fn negotiate_connection(
        &self,
        connection: Arc<ManagedConnection>,
        offer: RTCSessionDescription,
    ) -> Result<Negotiated> {
        debug!("Negotiating connection {}", connection.id());

        match self.handshake(&connection, offer).await {
            Ok(answer) => {
                counter!("gateway_negotiations_total", "outcome" => "success").increment(1);
                info!("Negotiated connection {}", connection.id());
                Ok(Negotiated { connection, answer })
            }
            Err(e) => {
                let outcome = match e {
                    GatewayError::ShutdownCanceled => "canceled",
                    _ => "failed",
                };
                counter!("gateway_negotiations_total", "outcome" => outcome).increment(1);
                warn!("Negotiation for {} aborted: {}", connection.id(), e);
                connection.release().await;
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        connection: &Arc<ManagedConnection>,
        offer: RTCSessionDescription,
    ) -> Result<String> {
        let cancel = connection.cancel_token().clone();
        let pc = connection.peer();

        // Room audio out, client audio in, lifecycle events to the monitor
        TrackRelay::attach_sender(pc, self.tracks.outbound(), cancel.clone()).await?;
        self.register_inbound(connection);
        self.monitor.watch(connection);

        guarded(&cancel, pc.set_remote_description(offer))
            .await?
            .map_err(|e| GatewayError::Negotiation(format!("remote description rejected: {}", e)))?;

        let answer = guarded(&cancel, pc.create_answer(None))
            .await?
            .map_err(|e| GatewayError::Negotiation(format!("create answer failed: {}", e)))?;

        let mut gather_complete = pc.gathering_complete_promise().await;

        guarded(&cancel, pc.set_local_description(answer))
            .await?
            .map_err(|e| GatewayError::Negotiation(format!("local description rejected: {}", e)))?;

        let gathered = guarded(
            &cancel,
            tokio::time::timeout(self.gather_timeout, gather_complete.recv()),
        )
        .await?;
        if gathered.is_err() {
            return Err(GatewayError::Negotiation(format!(
                "ICE gathering did not complete within {:?}",
                self.gather_timeout
            )));
        }

        let local = pc.local_description().await.ok_or_else(|| {
            GatewayError::Negotiation("local description unavailable after ICE gathering".to_string())
        })?;
        Ok(local.sdp)
    }

    /// Pump the first inbound audio track into the inbound bridge track
    fn register_inbound(&self, connection: &ManagedConnection) {
        let tracks = self.tracks.clone();
        let connection_id = connection.id();
        let cancel = connection.cancel_token().clone();
        let started = Arc::new(AtomicBool::new(false));

        connection.peer().on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tracks = tracks.clone();
                let cancel = cancel.clone();
                let started = started.clone();

                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        warn!("Connection {} sent a {} track, ignoring", connection_id, track.kind());
                        return;
                    }
                    if started.swap(true, Ordering::SeqCst) {
                        warn!("Connection {} sent a second audio track, ignoring", connection_id);
                        return;
                    }

                    info!("Connection {} inbound audio (ssrc={})", connection_id, track.ssrc());
                    TrackRelay::start_client_to_room(connection_id, track, tracks, cancel);
                })
            },
        ));
    }
}

/// Run `fut` unless `cancel` fires first
async fn guarded<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(GatewayError::ShutdownCanceled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::protocols::webrtc::PeerConnectionRegistry;
    use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
    use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

    /// Produce a real, fully gathered audio offer from a throwaway client peer
    async fn client_offer(factory: &PeerFactory) -> String {
        let client = factory.create().await.unwrap();
        client
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
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

    fn engine(factory: Arc<PeerFactory>, shutdown: &CancellationToken) -> NegotiationEngine {
        engine_with_timeout(factory, shutdown, Duration::from_secs(10))
    }

    fn engine_with_timeout(
        factory: Arc<PeerFactory>,
        shutdown: &CancellationToken,
        gather_timeout: Duration,
    ) -> NegotiationEngine {
        let registry = Arc::new(PeerConnectionRegistry::new());
        let tracks = Arc::new(BridgeTracks::new());
        let (monitor, _) = ConnectionLifecycleMonitor::spawn(registry, tracks.clone(), shutdown.clone());
        NegotiationEngine::new(factory, tracks, monitor, gather_timeout)
    }

    /// A well-formed offer whose transport parameters the peer refuses
    const OFFER_WITHOUT_FINGERPRINT: &str = "v=0\r\n\
        o=- 0 0 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=ice-ufrag:test\r\n\
        a=ice-pwd:testpassword\r\n\
        a=setup:actpass\r\n\
        a=mid:0\r\n\
        a=sendrecv\r\n\
        a=rtcp-mux\r\n\
        a=rtpmap:111 opus/48000/2\r\n";

    #[test]
    fn test_parse_offer_rejects_garbage() {
        let result = parse_offer("invalid");
        assert!(matches!(result, Err(GatewayError::InvalidOffer(_))));
    }

    #[test]
    fn test_parse_offer_requires_media_section() {
        let sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
        let result = parse_offer(sdp);
        assert!(matches!(result, Err(GatewayError::InvalidOffer(_))));
    }

    #[tokio::test]
    async fn test_negotiate_produces_complete_answer() {
        let factory = Arc::new(PeerFactory::new(&[]).unwrap());
        let shutdown = CancellationToken::new();
        let engine = engine(factory.clone(), &shutdown);

        let offer = parse_offer(&client_offer(&factory).await).unwrap();
        let negotiated = engine.negotiate(offer, shutdown.child_token()).await.unwrap();

        assert!(negotiated.answer.starts_with("v=0"));
        assert!(negotiated.answer.contains("m=audio"));
        assert!(RTCSessionDescription::answer(negotiated.answer.clone()).is_ok());
        assert!(!negotiated.connection.is_released());

        negotiated.connection.release().await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_negotiate_canceled_closes_transport() {
        let factory = Arc::new(PeerFactory::new(&[]).unwrap());
        let shutdown = CancellationToken::new();
        let engine = engine(factory.clone(), &shutdown);

        let offer = parse_offer(&client_offer(&factory).await).unwrap();
        shutdown.cancel();

        let result = engine.negotiate(offer, shutdown.child_token()).await;
        assert!(matches!(result, Err(GatewayError::ShutdownCanceled)));
    }

    #[tokio::test]
    async fn test_gather_timeout_is_negotiation_error() {
        // Unroutable STUN server keeps gathering open past the deadline
        let factory =
            Arc::new(PeerFactory::new(&["stun:10.255.255.1:3478".to_string()]).unwrap());
        let offer_factory = PeerFactory::new(&[]).unwrap();
        let shutdown = CancellationToken::new();
        let engine = engine_with_timeout(factory.clone(), &shutdown, Duration::from_millis(1));

        let offer = parse_offer(&client_offer(&offer_factory).await).unwrap();
        let connection = Arc::new(ManagedConnection::new(
            ConnectionId::new(),
            factory.create().await.unwrap(),
            shutdown.child_token(),
        ));

        let result = engine.negotiate_connection(connection.clone(), offer).await;

        assert!(matches!(result, Err(GatewayError::Negotiation(_))));
        assert!(connection.is_released());
        assert!(connection.cancel_token().is_cancelled());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_rejected_remote_description_releases_transport() {
        let factory = Arc::new(PeerFactory::new(&[]).unwrap());
        let shutdown = CancellationToken::new();
        let engine = engine(factory.clone(), &shutdown);

        let offer = parse_offer(OFFER_WITHOUT_FINGERPRINT).unwrap();
        let connection = Arc::new(ManagedConnection::new(
            ConnectionId::new(),
            factory.create().await.unwrap(),
            shutdown.child_token(),
        ));

        let result = engine.negotiate_connection(connection.clone(), offer).await;

        assert!(matches!(result, Err(GatewayError::Negotiation(_))));
        assert!(connection.is_released());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_guarded_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = guarded(&cancel, std::future::pending::<()>()).await;
        assert_eq!(result, Err(GatewayError::ShutdownCanceled));
    }
}
