//! WebRTC connection handling for bridged clients
pub mod connection;
pub mod lifecycle;
pub mod negotiation;
pub mod peer_factory;
pub mod registry;

pub use connection::ManagedConnection;
pub use lifecycle::{ConnectionLifecycleMonitor, StateEvent};
pub use negotiation::{parse_offer, Negotiated, NegotiationEngine};
pub use peer_factory::PeerFactory;
pub use registry::PeerConnectionRegistry;
