//! Websocket speech pipeline client
//!
//! JSON text frames in both directions. The read half runs on its own
//! task and turns server messages into [`PipelineEvent`]s; the write half
//! is the connection's sink.

use crate::domain::audio::AudioFrame;
use crate::domain::call::{Speaker, TranscriptFragment};
use crate::domain::pipeline::{
    PipelineConnection, PipelineEvent, PipelineSeed, PipelineSink, SpeechPipeline,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Messages sent to the pipeline
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    Start {
        call_control_id: &'a str,
        business_id: &'a str,
        store_id: &'a str,
        caller: &'a str,
        system_prompt: &'a str,
        business_category: &'a str,
        wording: &'a BTreeMap<String, String>,
    },
    Audio {
        seq: u64,
        payload: String,
    },
    Cancel,
    Stop,
}

/// Messages received from the pipeline
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    SpeechStarted,
    SpeechEnded,
    Transcript { speaker: Speaker, text: String },
    Audio { turn: u64, payload: String },
    PlaybackFinished,
    Activity { activity_type: String, activity_id: String },
    Error { message: String },
}

impl ServerMessage {
    fn into_event(self) -> Option<PipelineEvent> {
        let event = match self {
            ServerMessage::SpeechStarted => PipelineEvent::SpeechStarted,
            ServerMessage::SpeechEnded => PipelineEvent::SpeechEnded,
            ServerMessage::Transcript { speaker, text } => {
                PipelineEvent::Transcript(TranscriptFragment::new(speaker, text))
            }
            ServerMessage::Audio { turn, payload } => match STANDARD.decode(payload) {
                Ok(audio) => PipelineEvent::Audio {
                    turn,
                    payload: Bytes::from(audio),
                },
                Err(e) => {
                    warn!("Dropping undecodable synthesized audio: {}", e);
                    return None;
                }
            },
            ServerMessage::PlaybackFinished => PipelineEvent::PlaybackFinished,
            ServerMessage::Activity {
                activity_type,
                activity_id,
            } => PipelineEvent::Activity {
                activity_type,
                activity_id,
            },
            ServerMessage::Error { message } => PipelineEvent::Error(message),
        };
        Some(event)
    }
}

/// Speech pipeline reached over a websocket
pub struct WsSpeechPipeline {
    url: String,
    event_buffer: usize,
}

impl WsSpeechPipeline {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            event_buffer: 256,
        }
    }
}

#[async_trait]
impl SpeechPipeline for WsSpeechPipeline {
    async fn connect(&self, seed: &PipelineSeed) -> Result<PipelineConnection> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| CallError::PipelineError(format!("connect {}: {}", self.url, e)))?;
        let (write, mut read) = ws.split();

        let mut sink = WsPipelineSink { write };
        sink.send(&ClientMessage::Start {
            call_control_id: seed.call_control_id.as_str(),
            business_id: seed.business_id.as_str(),
            store_id: seed.store_id.as_str(),
            caller: &seed.caller,
            system_prompt: &seed.prompts.system_prompt,
            business_category: &seed.prompts.business_category,
            wording: &seed.prompts.wording,
        })
        .await?;

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let call_control_id = seed.call_control_id.clone();
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(frame)) => {
                        debug!("Pipeline closed for call {}: {:?}", call_control_id, frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = tx.send(PipelineEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                let event = match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => message.into_event(),
                    Err(e) => {
                        warn!("Unrecognized pipeline message for call {}: {}", call_control_id, e);
                        None
                    }
                };
                if let Some(event) = event {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        });

        info!("Pipeline connected for call {}", seed.call_control_id);
        Ok(PipelineConnection {
            sink: Box::new(sink),
            events: rx,
        })
    }
}

struct WsPipelineSink {
    write: SplitSink<WsStream, Message>,
}

impl WsPipelineSink {
    async fn send(&mut self, message: &ClientMessage<'_>) -> Result<()> {
        let text = serde_json::to_string(message)
            .map_err(|e| CallError::Internal(format!("pipeline message: {}", e)))?;
        self.write
            .send(Message::Text(text))
            .await
            .map_err(|e| CallError::PipelineError(e.to_string()))
    }
}

#[async_trait]
impl PipelineSink for WsPipelineSink {
    async fn send_audio(&mut self, frame: &AudioFrame) -> Result<()> {
        self.send(&ClientMessage::Audio {
            seq: frame.seq,
            payload: STANDARD.encode(&frame.payload),
        })
        .await
    }

    async fn cancel_playback(&mut self) -> Result<()> {
        self.send(&ClientMessage::Cancel).await
    }

    async fn close(&mut self) {
        let _ = self.send(&ClientMessage::Stop).await;
        let _ = self.write.close().await;
    }
}
