//! Call summary - the persisted close-out record of one call
//!
//! Captures duration, usage and the final transcript for billing and
//! follow-up. Written once per completed call.

use crate::domain::admission::AdmissionReason;
use crate::domain::call::{metadata_keys, CallDirection, CallSession, CallState, TranscriptFragment};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BusinessId, CallControlId, PhoneNumberId, StoreId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a completed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    /// Served by the agent
    Served,
    /// Admission denied
    Declined,
    /// Carrier or pipeline failure
    Failed,
    /// Caller hung up before answer
    Abandoned,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Served => "served",
            CallOutcome::Declined => "declined",
            CallOutcome::Failed => "failed",
            CallOutcome::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "served" => Some(CallOutcome::Served),
            "declined" => Some(CallOutcome::Declined),
            "failed" => Some(CallOutcome::Failed),
            "abandoned" => Some(CallOutcome::Abandoned),
            _ => None,
        }
    }
}

/// Final summary of one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    pub id: Uuid,
    pub call_control_id: CallControlId,
    pub business_id: BusinessId,
    pub store_id: StoreId,
    pub phone_number_id: PhoneNumberId,
    pub direction: CallDirection,
    pub from_number: String,
    pub to_number: String,
    pub outcome: CallOutcome,
    pub admission_reason: Option<AdmissionReason>,

    /// Time information
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,

    /// Usage
    pub billable_minutes: i64,
    pub cost_cents: i64,
    pub frames_forwarded: i64,
    pub frames_played: i64,
    pub frames_dropped: i64,

    pub transcript: Vec<TranscriptFragment>,
    pub created_at: DateTime<Utc>,
}

impl CallSummary {
    /// Build the summary from a finalized session snapshot
    ///
    /// `pre_completion` is the state the call was in before COMPLETED.
    pub fn from_session(session: &CallSession, pre_completion: CallState, cents_per_minute: i64) -> Self {
        let now = Utc::now();
        let outcome = match pre_completion {
            CallState::Blocked => CallOutcome::Declined,
            CallState::Failed => CallOutcome::Failed,
            CallState::Initiated | CallState::Ringing => CallOutcome::Abandoned,
            _ => CallOutcome::Served,
        };
        let duration_secs = session.duration_secs();
        let billable_minutes = if outcome == CallOutcome::Served || duration_secs > 0 {
            billable_minutes(duration_secs)
        } else {
            0
        };

        Self {
            id: Uuid::new_v4(),
            call_control_id: session.call_control_id.clone(),
            business_id: session.business_id.clone(),
            store_id: session.store_id.clone(),
            phone_number_id: session.phone_number_id.clone(),
            direction: session.direction,
            from_number: session.from_number.clone(),
            to_number: session.to_number.clone(),
            outcome,
            admission_reason: session.admission.as_ref().map(|d| d.reason),
            started_at: session.started_at,
            answered_at: session.answered_at,
            ended_at: session.ended_at.unwrap_or(now),
            duration_secs,
            billable_minutes,
            cost_cents: billable_minutes * cents_per_minute,
            frames_forwarded: session.counter(metadata_keys::FRAMES_FORWARDED),
            frames_played: session.counter(metadata_keys::FRAMES_PLAYED),
            frames_dropped: session.counter(metadata_keys::FRAMES_DROPPED),
            transcript: session.transcript.clone(),
            created_at: now,
        }
    }
}

/// Round a duration up to whole minutes; any served call bills at least one
pub fn billable_minutes(duration_secs: i64) -> i64 {
    ((duration_secs.max(0) + 59) / 60).max(1)
}

/// Call summary repository interface
#[async_trait]
pub trait CallSummaryRepository: Send + Sync {
    /// Insert a summary; a second summary for the same call is ignored
    async fn save(&self, summary: &CallSummary) -> Result<()>;

    async fn get_by_call_control_id(&self, id: &CallControlId) -> Result<Option<CallSummary>>;

    /// Served calls of a business since `since` (quota usage)
    async fn count_served_since(&self, business_id: &BusinessId, since: DateTime<Utc>) -> Result<u64>;
}
