//! Media relay between bridged clients and the room

pub mod bridge;
pub mod relay;

pub use bridge::{opus_capability, BridgeTracks, InboundBridgeTrack, BRIDGE_STREAM_ID};
pub use relay::{
    InboundSink, OutboundSink, PumpExit, PumpReport, RelayDirection, RtpSink, RtpSource, TrackRelay,
};
