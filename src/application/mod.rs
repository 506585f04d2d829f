//! Application layer - Use cases and application services
//!
//! This layer orchestrates the WebRTC infrastructure to fulfill the
//! gateway's one use case: bridging a client connection into the room.

pub mod bridge;

pub use bridge::BridgeService;
