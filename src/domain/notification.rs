//! Post-call notification envelope and the trigger port

use crate::domain::call::{metadata_keys, CallSession, Speaker, TranscriptFragment};
use crate::domain::call_summary::{CallOutcome, CallSummary};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BusinessId, StoreId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Business activity a conversation produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Order,
    Booking,
    Consultation,
    Complaint,
    Inquiry,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Order => "order",
            ActivityType::Booking => "booking",
            ActivityType::Consultation => "consultation",
            ActivityType::Complaint => "complaint",
            ActivityType::Inquiry => "inquiry",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "order" => Some(ActivityType::Order),
            "booking" | "reservation" | "appointment" => Some(ActivityType::Booking),
            "consultation" => Some(ActivityType::Consultation),
            "complaint" => Some(ActivityType::Complaint),
            "inquiry" => Some(ActivityType::Inquiry),
            _ => None,
        }
    }

    /// Keyword inference over what the caller said; complaints win
    ///
    /// Keywords match whole words, so "border" is not an order.
    pub fn infer_from_transcript(transcript: &[TranscriptFragment]) -> Option<Self> {
        const RULES: [(ActivityType, &[&str]); 4] = [
            (
                ActivityType::Complaint,
                &[
                    "complaint", "complain", "complaining", "refund", "unacceptable",
                    "speak to a manager",
                ],
            ),
            (
                ActivityType::Order,
                &["order", "orders", "ordered", "ordering", "pickup", "pick up", "delivery", "takeout"],
            ),
            (
                ActivityType::Booking,
                &[
                    "book", "booking", "booked", "reservation", "reserve", "appointment",
                    "table for",
                ],
            ),
            (
                ActivityType::Consultation,
                &["consultation", "consult", "estimate", "quote"],
            ),
        ];

        let words: Vec<String> = transcript
            .iter()
            .filter(|f| f.speaker == Speaker::Caller)
            .flat_map(|f| words_of(&f.text))
            .collect();

        RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| contains_phrase(&words, k)))
            .map(|(activity, _)| *activity)
    }

    pub fn priority(&self) -> NotificationPriority {
        match self {
            ActivityType::Complaint => NotificationPriority::High,
            ActivityType::Order | ActivityType::Booking => NotificationPriority::Normal,
            ActivityType::Consultation | ActivityType::Inquiry => NotificationPriority::Low,
        }
    }
}

/// Notification priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
}

/// Envelope handed to the notification trigger engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub activity_type: ActivityType,
    pub activity_id: String,
    pub payload: serde_json::Value,
    pub priority: NotificationPriority,
}

impl NotificationEnvelope {
    /// Build the envelope for a finalized call, if it yielded an activity
    ///
    /// Pipeline-reported activity wins over transcript inference; served
    /// calls with a transcript fall back to an inquiry.
    pub fn for_call(session: &CallSession, summary: &CallSummary) -> Option<Self> {
        let reported = session
            .metadata
            .get(metadata_keys::ACTIVITY_TYPE)
            .and_then(|s| ActivityType::from_str(s));

        let activity_type = reported
            .or_else(|| ActivityType::infer_from_transcript(&session.transcript))
            .or_else(|| {
                (summary.outcome == CallOutcome::Served && !session.transcript.is_empty())
                    .then_some(ActivityType::Inquiry)
            })?;

        let activity_id = session
            .metadata
            .get(metadata_keys::ACTIVITY_ID)
            .cloned()
            .unwrap_or_else(|| session.call_control_id.to_string());

        let payload = json!({
            "call_control_id": session.call_control_id,
            "from_number": session.from_number,
            "to_number": session.to_number,
            "duration_secs": summary.duration_secs,
            "billable_minutes": summary.billable_minutes,
            "outcome": summary.outcome.as_str(),
            "transcript": session.transcript,
        });

        Some(Self {
            activity_type,
            activity_id,
            payload,
            priority: activity_type.priority(),
        })
    }
}

/// Input of `triggerNotifications`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub store_id: StoreId,
    pub business_id: BusinessId,
    pub activity_type: ActivityType,
    pub activity_id: String,
    pub data: serde_json::Value,
    pub priority: NotificationPriority,
}

impl NotificationRequest {
    pub fn new(store_id: StoreId, business_id: BusinessId, envelope: NotificationEnvelope) -> Self {
        Self {
            store_id,
            business_id,
            activity_type: envelope.activity_type,
            activity_id: envelope.activity_id,
            data: envelope.payload,
            priority: envelope.priority,
        }
    }
}

/// Notification trigger engine
#[async_trait]
pub trait NotificationTrigger: Send + Sync {
    async fn trigger(&self, request: &NotificationRequest) -> Result<()>;
}

/// Lowercased words, split on anything that is not alphanumeric
fn words_of(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle = words_of(phrase);
    !needle.is_empty() && words.windows(needle.len()).any(|window| window == needle.as_slice())
}
