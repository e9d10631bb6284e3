//! Call session record

use crate::domain::admission::{AdmissionDecision, NumberRoute};
use crate::domain::call::value_object::{CallDirection, CallState};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BusinessId, CallControlId, PhoneNumberId, StoreId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata keys written by the call-handling core
pub mod metadata_keys {
    pub const ACTIVITY_TYPE: &str = "activity_type";
    pub const ACTIVITY_ID: &str = "activity_id";
    pub const LOCALE: &str = "locale";
    pub const FRAMES_FORWARDED: &str = "frames_forwarded";
    pub const FRAMES_PLAYED: &str = "frames_played";
    pub const FRAMES_DROPPED: &str = "frames_dropped";
}

/// Who produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
}

/// One utterance fragment in the transcript buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl TranscriptFragment {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Initial values for a session created by its first webhook event
#[derive(Debug, Clone, Default)]
pub struct NewCallSession {
    pub direction: CallDirection,
    pub from_number: String,
    pub to_number: String,
    pub route: Option<NumberRoute>,
    pub sequence: Option<u64>,
}

/// Authoritative state of one in-progress call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub call_control_id: CallControlId,
    pub business_id: BusinessId,
    pub store_id: StoreId,
    pub phone_number_id: PhoneNumberId,
    pub state: CallState,
    pub direction: CallDirection,
    pub from_number: String,
    pub to_number: String,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Highest carrier event sequence applied; never decreases
    pub last_event_seq: u64,
    pub transcript: Vec<TranscriptFragment>,
    pub admission: Option<AdmissionDecision>,
    pub metadata: BTreeMap<String, String>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl CallSession {
    /// Create a session in the INITIATED state
    pub fn new(id: CallControlId, init: NewCallSession, ttl: Duration) -> Self {
        let now = Utc::now();
        let route = init.route.unwrap_or_default();
        Self {
            call_control_id: id,
            business_id: route.business_id,
            store_id: route.store_id,
            phone_number_id: route.phone_number_id,
            state: CallState::Initiated,
            direction: init.direction,
            from_number: init.from_number,
            to_number: init.to_number,
            started_at: now,
            answered_at: None,
            ended_at: None,
            last_event_seq: init.sequence.unwrap_or(0),
            transcript: Vec::new(),
            admission: None,
            metadata: BTreeMap::new(),
            finalized_at: None,
            expires_at: now + ttl,
        }
    }

    /// Compare-and-swap transition gated on the state graph and the event sequence
    ///
    /// On conflict the record is left untouched.
    pub fn apply_transition(
        &mut self,
        target: CallState,
        seq: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<CallState> {
        let stale = seq.map_or(false, |s| s <= self.last_event_seq);
        if stale || !self.state.can_transition_to(&target) {
            return Err(CallError::TransitionConflict {
                call_control_id: self.call_control_id.to_string(),
                from: self.state,
                to: target,
            });
        }

        self.state = target;
        if let Some(seq) = seq {
            self.last_event_seq = seq;
        }
        match target {
            CallState::Answered if self.answered_at.is_none() => self.answered_at = Some(now),
            CallState::Completed => self.ended_at = Some(now),
            _ => {}
        }
        Ok(target)
    }

    /// Cache the admission decision unless one is already cached
    pub fn record_admission(&mut self, decision: AdmissionDecision) -> AdmissionDecision {
        match &self.admission {
            Some(existing) => existing.clone(),
            None => {
                self.admission = Some(decision.clone());
                decision
            }
        }
    }

    /// Mark finalized and shorten the lifetime to the eviction grace
    ///
    /// Returns the snapshot only the first time.
    pub fn finalize(&mut self, now: DateTime<Utc>, grace: Duration) -> Option<CallSession> {
        if self.finalized_at.is_some() {
            return None;
        }
        self.finalized_at = Some(now);
        self.expires_at = now + grace;
        Some(self.clone())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_allowed(&self) -> bool {
        self.admission.as_ref().map_or(false, |d| d.allowed)
    }

    /// Routing ids are known
    pub fn has_route(&self) -> bool {
        !self.business_id.is_empty() && !self.store_id.is_empty()
    }

    pub fn route(&self) -> NumberRoute {
        NumberRoute {
            business_id: self.business_id.clone(),
            store_id: self.store_id.clone(),
            phone_number_id: self.phone_number_id.clone(),
        }
    }

    pub fn locale(&self) -> Option<&str> {
        self.metadata.get(metadata_keys::LOCALE).map(String::as_str)
    }

    /// Numeric metadata counter, zero when absent
    pub fn counter(&self, key: &str) -> i64 {
        self.metadata
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Seconds between answer and hangup
    pub fn duration_secs(&self) -> i64 {
        match (self.answered_at, self.ended_at) {
            (Some(answered), Some(ended)) => (ended - answered).num_seconds().max(0),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::admission::AdmissionReason;

    fn create_test_session() -> CallSession {
        CallSession::new(
            CallControlId::new("v3:test"),
            NewCallSession {
                from_number: "+15550001111".to_string(),
                to_number: "+15550002222".to_string(),
                sequence: Some(1),
                ..Default::default()
            },
            Duration::hours(1),
        )
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = create_test_session();
        let now = Utc::now();
        assert_eq!(session.state, CallState::Initiated);
        assert_eq!(session.last_event_seq, 1);

        session.apply_transition(CallState::Answered, Some(2), now).unwrap();
        assert!(session.answered_at.is_some());
        session.apply_transition(CallState::Streaming, None, now).unwrap();
        assert_eq!(session.last_event_seq, 2);
        session.apply_transition(CallState::Completed, Some(9), now).unwrap();
        assert_eq!(session.state, CallState::Completed);
        assert_eq!(session.last_event_seq, 9);
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_illegal_transition_leaves_state_unchanged() {
        let mut session = create_test_session();
        let now = Utc::now();
        session.apply_transition(CallState::Completed, Some(2), now).unwrap();
        let before = session.clone();

        let err = session
            .apply_transition(CallState::Streaming, Some(3), now)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(session, before);
    }

    #[test]
    fn test_stale_sequence_rejected() {
        let mut session = create_test_session();
        let now = Utc::now();
        session.apply_transition(CallState::Ringing, Some(5), now).unwrap();

        // Legal edge but stale sequence
        let err = session
            .apply_transition(CallState::Answered, Some(4), now)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(session.state, CallState::Ringing);
        assert_eq!(session.last_event_seq, 5);
    }

    #[test]
    fn test_admission_cached_once() {
        let mut session = create_test_session();
        let first = AdmissionDecision::new(
            session.business_id.clone(),
            session.call_control_id.clone(),
            AdmissionReason::CallLimitReached,
        );
        let second = AdmissionDecision::new(
            session.business_id.clone(),
            session.call_control_id.clone(),
            AdmissionReason::Ok,
        );

        assert_eq!(session.record_admission(first.clone()), first);
        assert_eq!(session.record_admission(second), first);
        assert!(!session.is_allowed());
    }

    #[test]
    fn test_finalize_once() {
        let mut session = create_test_session();
        let now = Utc::now();
        assert!(session.finalize(now, Duration::seconds(30)).is_some());
        assert!(session.finalize(now, Duration::seconds(30)).is_none());
        assert_eq!(session.expires_at, now + Duration::seconds(30));
        assert!(session.is_expired(now + Duration::seconds(31)));
    }
}
