//! Domain layer - Core types of the gateway
//!
//! This layer contains:
//! - Connection identity and lifecycle states
//! - Shared error and result types

pub mod connection;
pub mod shared;

// Re-export commonly used types
pub use connection::{ConnectionId, ConnectionState};
pub use shared::{GatewayError, Result};
