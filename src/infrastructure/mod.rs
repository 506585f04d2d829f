//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - WebRTC peer connection handling
//! - RTP relay between bridged clients and the room
//! - The embedded room client and its access tokens

pub mod media;
pub mod protocols;
pub mod room;
