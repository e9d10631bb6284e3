//! Audio domain - inbound frame ordering and per-call stream state

pub mod frame;
pub mod reorder;
pub mod stream_state;

pub use frame::AudioFrame;
pub use reorder::{ReorderBuffer, ReorderConfig, ReorderStats};
pub use stream_state::AudioStreamState;
