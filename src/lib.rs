//! RoomGate - a WebRTC gateway that bridges clients into a remote room
//!
//! Clients exchange one SDP offer/answer over HTTP and get a peer connection
//! whose audio is relayed to and from a single embedded room participant.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::GatewayError;
pub use domain::shared::result::Result;
