//! RTP relay between bridged connections and the bridge tracks
//!
//! Client-to-room audio is moved by a pump task per connection. Room-to-client
//! audio needs no pump: the shared outbound track is attached as each
//! connection's sender and fans out on its own.

use super::bridge::BridgeTracks;
use crate::domain::{ConnectionId, GatewayError, Result};
use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

/// Something RTP packets can be read from
#[async_trait]
pub trait RtpSource: Send + Sync {
    /// Next packet, or `None` once the stream has ended
    async fn read_packet(&self) -> Option<Packet>;
}

/// Something RTP packets can be written to
#[async_trait]
pub trait RtpSink: Send + Sync {
    /// Returns `Ok(false)` if the sink accepted but discarded the packet
    async fn write_packet(&self, packet: &Packet) -> Result<bool>;
}

#[async_trait]
impl RtpSource for TrackRemote {
    async fn read_packet(&self) -> Option<Packet> {
        match self.read_rtp().await {
            Ok((packet, _)) => Some(packet),
            Err(e) => {
                debug!("Remote track {} ended: {}", self.id(), e);
                None
            }
        }
    }
}

/// Writes into the inbound bridge track on behalf of one connection
pub struct InboundSink {
    tracks: Arc<BridgeTracks>,
    connection_id: ConnectionId,
}

impl InboundSink {
    pub fn new(tracks: Arc<BridgeTracks>, connection_id: ConnectionId) -> Self {
        Self {
            tracks,
            connection_id,
        }
    }
}

#[async_trait]
impl RtpSink for InboundSink {
    async fn write_packet(&self, packet: &Packet) -> Result<bool> {
        self.tracks.inbound().write_from(self.connection_id, packet).await
    }
}

/// Writes into the shared outbound bridge track
///
/// The track fans out to every attached connection, so a write error from one
/// of them counts as a drop instead of stopping the room feed.
pub struct OutboundSink {
    track: Arc<TrackLocalStaticRTP>,
}

impl OutboundSink {
    pub fn new(track: Arc<TrackLocalStaticRTP>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl RtpSink for OutboundSink {
    async fn write_packet(&self, packet: &Packet) -> Result<bool> {
        match self.track.write_rtp(packet).await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("Outbound fan-out write failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Direction of a relay flow, used for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirection {
    ClientToRoom,
    RoomToClient,
}

impl RelayDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayDirection::ClientToRoom => "client_to_room",
            RelayDirection::RoomToClient => "room_to_client",
        }
    }
}

/// Why a pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    EndOfStream,
    Canceled,
    SinkFailed,
}

/// Final tally of a pump run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    pub exit: PumpExit,
    pub forwarded: u64,
    pub dropped: u64,
}

/// Track relay operations
pub struct TrackRelay;

impl TrackRelay {
    /// Copy packets from `source` to `sink` until end-of-stream, a sink
    /// error or cancellation. Packets are forwarded unmodified.
    pub async fn pump<S, K>(
        direction: RelayDirection,
        label: &str,
        source: Arc<S>,
        sink: Arc<K>,
        cancel: CancellationToken,
    ) -> PumpReport
    where
        S: RtpSource + ?Sized,
        K: RtpSink + ?Sized,
    {
        let mut forwarded = 0u64;
        let mut dropped = 0u64;

        let exit = loop {
            let packet = tokio::select! {
                _ = cancel.cancelled() => break PumpExit::Canceled,
                packet = source.read_packet() => packet,
            };

            let Some(packet) = packet else {
                break PumpExit::EndOfStream;
            };

            match sink.write_packet(&packet).await {
                Ok(true) => {
                    forwarded += 1;
                    counter!("gateway_relay_packets_total", "direction" => direction.as_str())
                        .increment(1);
                }
                Ok(false) => {
                    dropped += 1;
                    counter!("gateway_relay_dropped_total", "direction" => direction.as_str())
                        .increment(1);
                }
                Err(e) => {
                    warn!("Relay {} ({}) stopped on write error: {}", label, direction.as_str(), e);
                    break PumpExit::SinkFailed;
                }
            }
        };

        info!(
            "Relay {} ({}) finished: {:?}, forwarded={}, dropped={}",
            label,
            direction.as_str(),
            exit,
            forwarded,
            dropped
        );

        PumpReport {
            exit,
            forwarded,
            dropped,
        }
    }

    /// Start the client-to-room pump for a connection's inbound audio
    pub fn start_client_to_room(
        connection_id: ConnectionId,
        remote: Arc<TrackRemote>,
        tracks: Arc<BridgeTracks>,
        cancel: CancellationToken,
    ) -> JoinHandle<PumpReport> {
        let sink = Arc::new(InboundSink::new(tracks.clone(), connection_id));
        tokio::spawn(TrackRelay::client_to_room(
            connection_id,
            remote,
            sink,
            tracks,
            cancel,
        ))
    }

    /// Run a client-to-room pump under the inbound writer gate
    ///
    /// The connection claims the inbound bridge track before the first packet
    /// and gives it up when the pump stops for any reason, so a dead pump never
    /// keeps other connections muted.
    pub async fn client_to_room<S, K>(
        connection_id: ConnectionId,
        source: Arc<S>,
        sink: Arc<K>,
        tracks: Arc<BridgeTracks>,
        cancel: CancellationToken,
    ) -> PumpReport
    where
        S: RtpSource + ?Sized,
        K: RtpSink + ?Sized,
    {
        tracks.inbound().claim(connection_id).await;

        let label = connection_id.to_string();
        let report = TrackRelay::pump(RelayDirection::ClientToRoom, &label, source, sink, cancel).await;

        if tracks.inbound().release(connection_id).await {
            info!("Connection {} gave up the inbound bridge track", connection_id);
        }
        report
    }

    /// Start a pump copying a room track into the outbound bridge track
    pub fn start_room_to_client(
        remote: Arc<TrackRemote>,
        tracks: Arc<BridgeTracks>,
        cancel: CancellationToken,
    ) -> JoinHandle<PumpReport> {
        tokio::spawn(async move {
            let label = format!("room:{}", remote.id());
            let sink = Arc::new(OutboundSink::new(tracks.outbound()));
            TrackRelay::pump(RelayDirection::RoomToClient, &label, remote, sink, cancel).await
        })
    }

    /// Attach a local track as a sender of `pc` and keep its RTCP drained
    ///
    /// Reading RTCP is what lets the interceptors (NACK, reports) run.
    pub async fn attach_sender(
        pc: &Arc<RTCPeerConnection>,
        track: Arc<TrackLocalStaticRTP>,
        cancel: CancellationToken,
    ) -> Result<Arc<RTCRtpSender>> {
        let sender = pc
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| GatewayError::Internal(format!("add_track failed: {}", e)))?;

        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = rtcp_sender.read(&mut buf) => {
                        if result.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(sender)
    }
}
