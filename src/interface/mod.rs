//! Interface layer - External interfaces
//!
//! This layer handles:
//! - The HTTP signaling endpoint
//! - Health and metrics endpoints

pub mod api;
