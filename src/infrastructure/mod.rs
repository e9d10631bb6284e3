//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Session, summary and admission stores (in-memory and PostgreSQL)
//! - The websocket speech pipeline client
//! - The store prompt cache
//! - Notification delivery

pub mod notification;
pub mod persistence;
pub mod pipeline;
pub mod prompts;

pub use notification::{HttpNotificationTrigger, LoggingNotificationTrigger};
pub use pipeline::WsSpeechPipeline;
pub use prompts::InMemoryPromptCache;
