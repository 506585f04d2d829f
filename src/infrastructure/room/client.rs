//! Embedded room client
//!
//! The gateway joins the remote room as a single participant over one peer
//! connection: the inbound bridge track is published upstream and whatever
//! audio the room sends down is pumped into the outbound bridge track.
//! Signaling is one HTTP exchange: a fully gathered offer is POSTed with the
//! room token as bearer credential and the response body is the answer.

use crate::config::RoomConfig;
use crate::domain::{ConnectionState, GatewayError, Result};
use crate::infrastructure::media::{BridgeTracks, TrackRelay};
use crate::infrastructure::protocols::webrtc::PeerFactory;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Build the signaling URL from the media server host and endpoint path
pub fn signal_url(host: &str, path: &str) -> String {
    let host = host.trim_end_matches('/');
    let host = if let Some(rest) = host.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = host.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        host.to_string()
    };

    if path.is_empty() {
        host
    } else if path.starts_with('/') {
        format!("{}{}", host, path)
    } else {
        format!("{}/{}", host, path)
    }
}

/// Live link into the remote room
///
/// Joining is a single WHIP-style offer/answer POST. The room-join token is
/// only sent as the bearer credential; the media server's own participant
/// signaling protocol is not spoken. An ingest-only endpoint accepts the
/// published client audio but may never send room audio back, in which case
/// the outbound bridge track stays silent.
pub struct RoomLink {
    peer: Arc<RTCPeerConnection>,
    room_name: String,
    cancel: CancellationToken,
}

impl RoomLink {
    /// Join the room described by `config` using `token`
    pub async fn connect(
        config: &RoomConfig,
        token: &str,
        tracks: Arc<BridgeTracks>,
        factory: &PeerFactory,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let peer = factory.create().await?;
        let link = Self {
            peer,
            room_name: config.room_name.clone(),
            cancel,
        };

        match link.establish(config, token, tracks, timeout).await {
            Ok(()) => {
                info!("Joined room {} as {}", config.room_name, config.identity);
                Ok(link)
            }
            Err(e) => {
                link.close().await;
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        config: &RoomConfig,
        token: &str,
        tracks: Arc<BridgeTracks>,
        timeout: Duration,
    ) -> Result<()> {
        TrackRelay::attach_sender(&self.peer, tracks.inbound().track(), self.cancel.clone()).await?;
        self.subscribe_room_audio(tracks);
        self.watch_state();

        let offer = self
            .peer
            .create_offer(None)
            .await
            .map_err(|e| GatewayError::Room(format!("create offer failed: {}", e)))?;
        let mut gather_complete = self.peer.gathering_complete_promise().await;
        self.peer
            .set_local_description(offer)
            .await
            .map_err(|e| GatewayError::Room(format!("local description rejected: {}", e)))?;
        if tokio::time::timeout(timeout, gather_complete.recv()).await.is_err() {
            return Err(GatewayError::Room(format!(
                "ICE gathering did not complete within {:?}",
                timeout
            )));
        }

        let offer = self
            .peer
            .local_description()
            .await
            .ok_or_else(|| GatewayError::Room("local description unavailable".to_string()))?;

        let url = signal_url(&config.host, &config.signal_path);
        info!("Sending room offer to {}", url);
        let answer = exchange_offer(&url, token, offer.sdp, timeout).await?;

        let answer = RTCSessionDescription::answer(answer)
            .map_err(|e| GatewayError::Room(format!("malformed answer: {}", e)))?;
        self.peer
            .set_remote_description(answer)
            .await
            .map_err(|e| GatewayError::Room(format!("answer rejected: {}", e)))?;

        Ok(())
    }

    fn subscribe_room_audio(&self, tracks: Arc<BridgeTracks>) {
        let cancel = self.cancel.clone();
        let room = self.room_name.clone();

        self.peer.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tracks = tracks.clone();
                let cancel = cancel.clone();
                let room = room.clone();

                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        warn!("Room {} sent a {} track, ignoring", room, track.kind());
                        return;
                    }
                    info!("Subscribed to room {} audio (ssrc={})", room, track.ssrc());
                    TrackRelay::start_room_to_client(track, tracks, cancel);
                })
            },
        ));
    }

    fn watch_state(&self) {
        let room = self.room_name.clone();
        self.peer
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let state = ConnectionState::from(state);
                match state {
                    ConnectionState::Failed => error!("Room {} link failed", room),
                    ConnectionState::Disconnected => warn!("Room {} link disconnected", room),
                    _ => info!("Room {} link is {}", room, state),
                }
                Box::pin(async {})
            }));
    }

    /// Leave the room
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Err(e) = self.peer.close().await {
            warn!("Closing room {} link: {}", self.room_name, e);
        }
        info!("Left room {}", self.room_name);
    }
}

/// POST an offer and return the answer body
async fn exchange_offer(url: &str, token: &str, offer: String, timeout: Duration) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Room(format!("http client: {}", e)))?;

    let response = client
        .post(url)
        .bearer_auth(token)
        .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
        .body(offer)
        .send()
        .await
        .map_err(|e| GatewayError::Room(format!("signaling request failed: {}", e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::Room(format!("reading answer failed: {}", e)))?;

    if !status.is_success() {
        return Err(GatewayError::Room(format!(
            "room server rejected offer ({}): {}",
            status,
            body.trim()
        )));
    }
    if body.trim().is_empty() {
        return Err(GatewayError::Room("room server returned an empty answer".to_string()));
    }

    Ok(body)
}
