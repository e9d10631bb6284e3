//! RingDesk - AI phone receptionist call orchestration
//!
//! Receives signed carrier webhooks, drives each call through an explicit
//! state machine, bridges live audio to a speech pipeline and closes calls
//! out with a billing summary and a business notification.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::CallError;
pub use domain::shared::result::Result;
