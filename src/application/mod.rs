//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases:
//! - Verifying and routing carrier webhooks
//! - Running the per-call conversation bridge
//! - Declining calls that must not be served
//! - Closing out completed calls

pub mod bridge;
pub mod dispatcher;
pub mod failover;
pub mod finalizer;
pub mod retry;
pub mod signature;
pub mod sweeper;

pub use bridge::{BridgeRegistry, ConversationBridge, OutboundMedia};
pub use dispatcher::{DispatchResult, DispatcherSettings, WebhookDispatcher, WebhookOutcome, WebhookRequest};
pub use failover::FailoverHandler;
pub use finalizer::{FinalizeOutcome, PostCallFinalizer};
pub use retry::{with_retry, RetryPolicy};
pub use signature::SignatureVerifier;
pub use sweeper::spawn_session_sweeper;
