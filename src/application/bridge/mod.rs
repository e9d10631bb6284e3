//! Real-time conversation bridge

pub mod conversation;
pub mod registry;
pub mod writer;

pub use conversation::ConversationBridge;
pub use registry::{BridgeRegistry, ForwardResult, OutboundMedia};
pub use writer::{SessionWrite, SessionWriter};
