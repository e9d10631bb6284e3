//! Carrier media stream websocket
//!
//! Inbound frames feed the call's conversation bridge; synthesized audio and
//! playback control flow back on the same socket.

use super::state::AppState;
use crate::application::bridge::ForwardResult;
use crate::application::OutboundMedia;
use crate::domain::audio::AudioFrame;
use crate::domain::shared::value_objects::CallControlId;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

/// Messages sent by the carrier
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundMediaMessage {
    Connected,
    Start,
    Media {
        sequence_number: u64,
        media: MediaPayload,
    },
    Stop,
}

#[derive(Debug, Serialize)]
pub struct OutboundPayload {
    pub payload: String,
}

/// Messages sent to the carrier
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMediaMessage {
    Media { media: OutboundPayload },
    Clear,
    Speak { text: String },
    Hangup,
}

impl From<OutboundMedia> for OutboundMediaMessage {
    fn from(media: OutboundMedia) -> Self {
        match media {
            OutboundMedia::Audio(audio) => OutboundMediaMessage::Media {
                media: OutboundPayload {
                    payload: STANDARD.encode(&audio),
                },
            },
            OutboundMedia::ClearPlayback => OutboundMediaMessage::Clear,
            OutboundMedia::Speak(text) => OutboundMediaMessage::Speak { text },
            OutboundMedia::Hangup => OutboundMediaMessage::Hangup,
        }
    }
}

/// Media stream websocket handler
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    Path(call_control_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let id = CallControlId::new(call_control_id);
    ws.on_upgrade(move |socket| handle_media_socket(socket, id, state))
}

async fn handle_media_socket(socket: WebSocket, id: CallControlId, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let Some(mut outbound) = state.bridge.registry().take_outbound(&id).await else {
        warn!("Media stream for call {} has no bridge to attach to", id);
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    info!("Media stream connected for call {}", id);

    let send_id = id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(media) = outbound.recv().await {
            let hangup = matches!(media, OutboundMedia::Hangup);
            let message = OutboundMediaMessage::from(media);
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        debug!("Media stream for call {} went away", send_id);
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize media message: {}", e),
            }
            if hangup {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let recv_id = id.clone();
    let bridge = state.bridge.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            match serde_json::from_str::<InboundMediaMessage>(&text) {
                Ok(InboundMediaMessage::Media {
                    sequence_number,
                    media,
                }) => {
                    let payload = match STANDARD.decode(media.payload) {
                        Ok(payload) => Bytes::from(payload),
                        Err(e) => {
                            warn!("Dropping undecodable frame {} for call {}: {}", sequence_number, recv_id, e);
                            continue;
                        }
                    };
                    let frame = AudioFrame::new(sequence_number, payload);
                    if let ForwardResult::NoBridge = bridge.forward_audio(&recv_id, frame).await {
                        debug!("Bridge for call {} is gone, closing media stream", recv_id);
                        break;
                    }
                }
                Ok(InboundMediaMessage::Stop) => {
                    debug!("Carrier stopped the media stream for call {}", recv_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!("Ignoring media message for call {}: {}", recv_id, e),
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    info!("Media stream disconnected for call {}", id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inbound_media() {
        let msg: InboundMediaMessage = serde_json::from_str(
            r#"{"event":"media","sequence_number":4,"media":{"payload":"AAEC"}}"#,
        )
        .unwrap();
        match msg {
            InboundMediaMessage::Media {
                sequence_number,
                media,
            } => {
                assert_eq!(sequence_number, 4);
                assert_eq!(media.payload, "AAEC");
            }
            other => panic!("unexpected {:?}", other),
        }

        let stop: InboundMediaMessage = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert!(matches!(stop, InboundMediaMessage::Stop));
    }

    #[test]
    fn test_outbound_messages() {
        let audio = OutboundMediaMessage::from(OutboundMedia::Audio(Bytes::from_static(&[0, 1, 2])));
        assert_eq!(
            serde_json::to_value(&audio).unwrap(),
            serde_json::json!({"event": "media", "media": {"payload": "AAEC"}})
        );

        let speak = OutboundMediaMessage::from(OutboundMedia::Speak("One moment".to_string()));
        assert_eq!(
            serde_json::to_value(&speak).unwrap(),
            serde_json::json!({"event": "speak", "text": "One moment"})
        );

        let clear = serde_json::to_value(OutboundMediaMessage::from(OutboundMedia::ClearPlayback)).unwrap();
        assert_eq!(clear["event"], "clear");
    }
}
