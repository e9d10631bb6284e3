//! Speech pipeline contract
//!
//! Recognition, reasoning and synthesis are a black box behind
//! [`SpeechPipeline`]. A connection is split into a sink for inbound audio
//! and a channel of pipeline events so the bridge can wait on both at once.

use crate::domain::audio::AudioFrame;
use crate::domain::call::TranscriptFragment;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BusinessId, CallControlId, StoreId};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly phone assistant for a local business. \
Greet the caller, help with orders, bookings and general questions, keep answers short, \
and never invent prices or availability you were not given.";

/// Per-store AI configuration from the store configuration cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePrompts {
    pub system_prompt: String,
    pub business_category: String,
    /// Store-specific phrasing (greeting, locale, sign-off)
    #[serde(default)]
    pub wording: BTreeMap<String, String>,
}

impl StorePrompts {
    /// Safe prompt used when the cache has nothing for a store
    pub fn fallback() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            business_category: "general".to_string(),
            wording: BTreeMap::new(),
        }
    }

    pub fn locale(&self) -> Option<&str> {
        self.wording.get("locale").map(String::as_str)
    }

    pub fn greeting(&self) -> Option<&str> {
        self.wording.get("greeting").map(String::as_str)
    }
}

/// Store configuration cache
#[async_trait]
pub trait PromptCache: Send + Sync {
    async fn get_cached_store_ai_prompts(&self, store_id: &StoreId) -> Result<Option<StorePrompts>>;
}

/// Everything a pipeline needs to start a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSeed {
    pub call_control_id: CallControlId,
    pub business_id: BusinessId,
    pub store_id: StoreId,
    pub caller: String,
    pub prompts: StorePrompts,
}

/// Event emitted by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Caller started speaking
    SpeechStarted,
    /// Caller stopped speaking; a reply is expected
    SpeechEnded,
    Transcript(TranscriptFragment),
    /// Synthesized audio chunk of reply `turn`
    Audio { turn: u64, payload: Bytes },
    PlaybackFinished,
    /// The conversation produced a business activity (order id, booking id...)
    Activity {
        activity_type: String,
        activity_id: String,
    },
    Error(String),
}

/// Inbound half of a pipeline connection
#[async_trait]
pub trait PipelineSink: Send {
    async fn send_audio(&mut self, frame: &AudioFrame) -> Result<()>;

    /// Abort in-flight synthesis after barge-in
    async fn cancel_playback(&mut self) -> Result<()>;

    async fn close(&mut self);
}

/// Live pipeline connection for one call
pub struct PipelineConnection {
    pub sink: Box<dyn PipelineSink>,
    pub events: mpsc::Receiver<PipelineEvent>,
}

/// Speech pipeline factory
#[async_trait]
pub trait SpeechPipeline: Send + Sync {
    async fn connect(&self, seed: &PipelineSeed) -> Result<PipelineConnection>;
}
