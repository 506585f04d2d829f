//! Bridge tracks shared by every connection
//!
//! The gateway has exactly one audio path in each direction:
//! - the outbound track carries room audio and is attached as the sender of
//!   every bridged connection,
//! - the inbound track is published into the room and written by whichever
//!   connection currently owns it.
//!
//! Both are built once at startup and handed out as `Arc<BridgeTracks>`.

use crate::domain::{ConnectionId, GatewayError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

/// Media stream id used for both bridge tracks
pub const BRIDGE_STREAM_ID: &str = "roomgate";

/// Opus capability shared by both bridge tracks
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

/// Process-wide pair of bridge tracks
pub struct BridgeTracks {
    outbound: Arc<TrackLocalStaticRTP>,
    inbound: InboundBridgeTrack,
}

impl BridgeTracks {
    pub fn new() -> Self {
        let outbound = Arc::new(TrackLocalStaticRTP::new(
            opus_capability(),
            "room-audio".to_owned(),
            BRIDGE_STREAM_ID.to_owned(),
        ));
        let inbound = Arc::new(TrackLocalStaticRTP::new(
            opus_capability(),
            "client-audio".to_owned(),
            BRIDGE_STREAM_ID.to_owned(),
        ));

        info!("Created bridge tracks (stream: {})", BRIDGE_STREAM_ID);

        Self {
            outbound,
            inbound: InboundBridgeTrack::new(inbound),
        }
    }

    /// Room audio, fanned out to every attached connection
    pub fn outbound(&self) -> Arc<TrackLocalStaticRTP> {
        self.outbound.clone()
    }

    /// Client audio, published into the room
    pub fn inbound(&self) -> &InboundBridgeTrack {
        &self.inbound
    }
}

impl Default for BridgeTracks {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound track plus its writer gate
///
/// At most one connection forwards client audio at a time. The most recently
/// started pump claims the track; packets from everyone else are dropped.
/// When the owner goes away the next writer takes over.
pub struct InboundBridgeTrack {
    track: Arc<TrackLocalStaticRTP>,
    owner: RwLock<Option<ConnectionId>>,
}

impl InboundBridgeTrack {
    fn new(track: Arc<TrackLocalStaticRTP>) -> Self {
        Self {
            track,
            owner: RwLock::new(None),
        }
    }

    /// Underlying track, for publishing into the room
    pub fn track(&self) -> Arc<TrackLocalStaticRTP> {
        self.track.clone()
    }

    /// Make `id` the current writer, displacing any previous owner
    pub async fn claim(&self, id: ConnectionId) {
        let previous = self.owner.write().await.replace(id);
        match previous {
            Some(prev) if prev != id => {
                info!("Inbound bridge track handed over: {} -> {}", prev, id)
            }
            _ => info!("Inbound bridge track claimed by {}", id),
        }
    }

    /// Give up ownership if `id` holds it
    pub async fn release(&self, id: ConnectionId) -> bool {
        let mut owner = self.owner.write().await;
        if *owner == Some(id) {
            *owner = None;
            debug!("Inbound bridge track released by {}", id);
            true
        } else {
            false
        }
    }

    pub async fn owner(&self) -> Option<ConnectionId> {
        *self.owner.read().await
    }

    /// Write a packet on behalf of `id`
    ///
    /// Returns `Ok(false)` when the packet was dropped because another
    /// connection owns the track.
    pub async fn write_from(&self, id: ConnectionId, packet: &Packet) -> Result<bool> {
        let current = *self.owner.read().await;
        match current {
            Some(owner) if owner == id => {}
            Some(_) => return Ok(false),
            None => {
                let mut owner = self.owner.write().await;
                match *owner {
                    None => *owner = Some(id),
                    Some(other) if other != id => return Ok(false),
                    Some(_) => {}
                }
            }
        }

        self.track
            .write_rtp(packet)
            .await
            .map_err(|e| GatewayError::Internal(format!("inbound bridge write failed: {}", e)))?;
        Ok(true)
    }
}
