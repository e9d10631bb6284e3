//! Speech pipeline clients

pub mod ws;

pub use ws::WsSpeechPipeline;
