//! Interface layer - External interfaces
//!
//! This layer handles:
//! - The carrier webhook endpoint
//! - The carrier media stream websocket
//! - Call inspection, health and metrics endpoints

pub mod api;
