//! Domain layer - Core call-handling rules
//!
//! This layer contains:
//! - The call state machine, carrier events and carrier actions
//! - The call session model and its store port
//! - Admission rules and their data-source port
//! - Audio ordering and barge-in state
//! - Ports for the speech pipeline, prompt cache and notification engine

pub mod admission;
pub mod audio;
pub mod call;
pub mod call_summary;
pub mod notification;
pub mod pipeline;
pub mod shared;

// Re-export commonly used types
pub use shared::{CallError, Result};
