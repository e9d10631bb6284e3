//! API data transfer objects

use crate::domain::admission::AdmissionDecision;
use crate::domain::call::{CallDirection, CallSession, CallState, TranscriptFragment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Generic API response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Session snapshot exposed over the API
#[derive(Debug, Serialize, Deserialize)]
pub struct CallSessionResponse {
    pub call_control_id: String,
    pub business_id: String,
    pub store_id: String,
    pub state: CallState,
    pub direction: CallDirection,
    pub from_number: String,
    pub to_number: String,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_event_seq: u64,
    pub admission: Option<AdmissionDecision>,
    pub transcript: Vec<TranscriptFragment>,
    pub metadata: BTreeMap<String, String>,
    /// A conversation bridge is currently running for the call
    pub bridge_active: bool,
}

impl CallSessionResponse {
    pub fn from_session(session: CallSession, bridge_active: bool) -> Self {
        Self {
            call_control_id: session.call_control_id.to_string(),
            business_id: session.business_id.to_string(),
            store_id: session.store_id.to_string(),
            state: session.state,
            direction: session.direction,
            from_number: session.from_number,
            to_number: session.to_number,
            started_at: session.started_at,
            answered_at: session.answered_at,
            ended_at: session.ended_at,
            last_event_seq: session.last_event_seq,
            admission: session.admission,
            transcript: session.transcript,
            metadata: session.metadata,
            bridge_active,
        }
    }
}
