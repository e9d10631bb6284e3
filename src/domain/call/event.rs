//! Carrier webhook events

use crate::domain::audio::AudioFrame;
use crate::domain::call::value_object::{CallDirection, CallState};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BusinessId, CallControlId, PhoneNumberId, StoreId};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types this core routes to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CarrierEventKind {
    Initiated,
    Ringing,
    Answered,
    Audio,
    Hold,
    Unhold,
    StreamingFailed,
    Hangup,
}

impl CarrierEventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "call.initiated" => Some(CarrierEventKind::Initiated),
            "call.ringing" => Some(CarrierEventKind::Ringing),
            "call.answered" => Some(CarrierEventKind::Answered),
            "call.audio" => Some(CarrierEventKind::Audio),
            "call.hold" => Some(CarrierEventKind::Hold),
            "call.unhold" => Some(CarrierEventKind::Unhold),
            "streaming.failed" => Some(CarrierEventKind::StreamingFailed),
            "call.hangup" => Some(CarrierEventKind::Hangup),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CarrierEventKind::Initiated => "call.initiated",
            CarrierEventKind::Ringing => "call.ringing",
            CarrierEventKind::Answered => "call.answered",
            CarrierEventKind::Audio => "call.audio",
            CarrierEventKind::Hold => "call.hold",
            CarrierEventKind::Unhold => "call.unhold",
            CarrierEventKind::StreamingFailed => "streaming.failed",
            CarrierEventKind::Hangup => "call.hangup",
        }
    }

    /// State the event moves the session into, if any
    pub fn target_state(&self) -> Option<CallState> {
        match self {
            CarrierEventKind::Initiated => None,
            CarrierEventKind::Ringing => Some(CallState::Ringing),
            CarrierEventKind::Answered => Some(CallState::Answered),
            CarrierEventKind::Audio => None,
            CarrierEventKind::Hold => Some(CallState::OnHold),
            CarrierEventKind::Unhold => Some(CallState::Streaming),
            CarrierEventKind::StreamingFailed => Some(CallState::Failed),
            CarrierEventKind::Hangup => Some(CallState::Completed),
        }
    }

    /// Event carries enough context to create the session and decide admission
    pub fn carries_admission_context(&self) -> bool {
        matches!(
            self,
            CarrierEventKind::Initiated | CarrierEventKind::Ringing | CarrierEventKind::Answered
        )
    }
}

/// Raw webhook body: `{"data": {...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub event_type: String,
    pub call_control_id: String,
    /// Carrier event sequence feeding the session's monotonic guard
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: EventPayload,
}

/// Event payload fields this core reads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub business_id: Option<String>,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
    /// Audio frame sequence number (call.audio)
    #[serde(default)]
    pub seq: Option<u64>,
    /// Base64 audio payload (call.audio)
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub hangup_cause: Option<String>,
}

/// Explicit routing ids carried by the webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitRoute {
    pub business_id: BusinessId,
    pub store_id: StoreId,
    pub phone_number_id: PhoneNumberId,
}

/// A verified, parsed carrier event
#[derive(Debug, Clone)]
pub struct CarrierEvent {
    pub event_type: String,
    pub kind: Option<CarrierEventKind>,
    pub call_control_id: CallControlId,
    pub sequence: Option<u64>,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl CarrierEvent {
    /// Parse a raw webhook body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| CallError::MalformedPayload(e.to_string()))?;
        let data = envelope.data;

        let call_control_id = CallControlId::new(data.call_control_id);
        if call_control_id.is_empty() {
            return Err(CallError::MalformedPayload(
                "call_control_id is empty".to_string(),
            ));
        }

        Ok(Self {
            kind: CarrierEventKind::parse(&data.event_type),
            event_type: data.event_type,
            call_control_id,
            sequence: data.sequence,
            occurred_at: data.occurred_at.unwrap_or_else(Utc::now),
            payload: data.payload,
        })
    }

    pub fn direction(&self) -> CallDirection {
        self.payload
            .direction
            .as_deref()
            .and_then(CallDirection::from_str)
            .unwrap_or_default()
    }

    /// Routing ids, when the carrier forwarded all three
    pub fn explicit_route(&self) -> Option<ExplicitRoute> {
        let p = &self.payload;
        match (&p.business_id, &p.store_id, &p.phone_number_id) {
            (Some(b), Some(s), Some(n)) if !b.is_empty() && !s.is_empty() => Some(ExplicitRoute {
                business_id: BusinessId::new(b.clone()),
                store_id: StoreId::new(s.clone()),
                phone_number_id: PhoneNumberId::new(n.clone()),
            }),
            _ => None,
        }
    }

    /// Audio frame carried by a call.audio event
    pub fn audio_frame(&self) -> Result<AudioFrame> {
        let seq = self
            .payload
            .seq
            .ok_or_else(|| CallError::MalformedPayload("call.audio without seq".to_string()))?;
        let payload = match self.payload.audio.as_deref() {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| CallError::MalformedPayload(format!("audio payload: {}", e)))?,
            None => Vec::new(),
        };
        Ok(AudioFrame::new(seq, Bytes::from(payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_event() {
        let body = br#"{"data":{"event_type":"call.initiated","call_control_id":"v3:1","sequence":4,
            "payload":{"from":"+15550001111","to":"+15550002222","direction":"incoming"}}}"#;
        let event = CarrierEvent::parse(body).unwrap();
        assert_eq!(event.kind, Some(CarrierEventKind::Initiated));
        assert_eq!(event.call_control_id.as_str(), "v3:1");
        assert_eq!(event.sequence, Some(4));
        assert_eq!(event.direction(), CallDirection::Inbound);
        assert!(event.explicit_route().is_none());
    }

    #[test]
    fn test_parse_unknown_event_type() {
        let body = br#"{"data":{"event_type":"call.dtmf.received","call_control_id":"v3:1","payload":{}}}"#;
        let event = CarrierEvent::parse(body).unwrap();
        assert!(event.kind.is_none());
        assert_eq!(event.event_type, "call.dtmf.received");
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            CarrierEvent::parse(b"not json"),
            Err(CallError::MalformedPayload(_))
        ));
        let empty_id = br#"{"data":{"event_type":"call.hangup","call_control_id":""}}"#;
        assert!(matches!(
            CarrierEvent::parse(empty_id),
            Err(CallError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_audio_frame_extraction() {
        let body = br#"{"data":{"event_type":"call.audio","call_control_id":"v3:1",
            "payload":{"seq":7,"audio":"AAEC"}}}"#;
        let event = CarrierEvent::parse(body).unwrap();
        let frame = event.audio_frame().unwrap();
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.payload.as_ref(), &[0u8, 1, 2]);
    }

    #[test]
    fn test_target_states() {
        assert_eq!(CarrierEventKind::Hangup.target_state(), Some(CallState::Completed));
        assert_eq!(CarrierEventKind::Unhold.target_state(), Some(CallState::Streaming));
        assert!(CarrierEventKind::Audio.target_state().is_none());
        assert!(!CarrierEventKind::Hangup.carries_admission_context());
    }
}
