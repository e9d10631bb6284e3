//! Post-call finalizer
//!
//! Runs once per call on hangup: the COMPLETED compare-and-swap picks a
//! single winner, which stops the bridge, snapshots the session, persists
//! the call summary and hands one notification envelope to the trigger
//! engine. Persistence and notification failures are logged and dropped.

use crate::application::bridge::ConversationBridge;
use crate::application::retry::{with_retry, RetryPolicy};
use crate::domain::call::{CallSessionStore, CallState};
use crate::domain::call_summary::{CallSummary, CallSummaryRepository};
use crate::domain::notification::{NotificationEnvelope, NotificationRequest, NotificationTrigger};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CallControlId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// What a hangup did
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// This hangup closed the call out
    Finalized {
        summary: CallSummary,
        envelope: Option<NotificationEnvelope>,
    },
    /// Duplicate hangup; the call was already completed
    AlreadyCompleted,
    /// No session for the call id
    UnknownCall,
}

pub struct PostCallFinalizer {
    store: Arc<dyn CallSessionStore>,
    bridge: Arc<ConversationBridge>,
    summaries: Arc<dyn CallSummaryRepository>,
    notifier: Arc<dyn NotificationTrigger>,
    eviction_grace: Duration,
    cents_per_minute: i64,
    retry: RetryPolicy,
}

impl PostCallFinalizer {
    pub fn new(
        store: Arc<dyn CallSessionStore>,
        bridge: Arc<ConversationBridge>,
        summaries: Arc<dyn CallSummaryRepository>,
        notifier: Arc<dyn NotificationTrigger>,
        eviction_grace: Duration,
        cents_per_minute: i64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            bridge,
            summaries,
            notifier,
            eviction_grace,
            cents_per_minute,
            retry,
        }
    }

    /// Close out a call on `call.hangup`
    pub async fn on_hangup(&self, id: &CallControlId, seq: Option<u64>) -> Result<FinalizeOutcome> {
        let Some(before) = self.store.get(id).await? else {
            debug!("Hangup for unknown call {}", id);
            return Ok(FinalizeOutcome::UnknownCall);
        };
        if before.state == CallState::Completed {
            debug!("Duplicate hangup for call {}", id);
            return Ok(FinalizeOutcome::AlreadyCompleted);
        }

        if !self.complete(id, seq).await? {
            return Ok(FinalizeOutcome::AlreadyCompleted);
        }

        // Drain the bridge so trailing transcript lands before the snapshot
        self.bridge.stop(id).await;

        let Some(snapshot) = self.store.finalize(id, self.eviction_grace).await? else {
            return Ok(FinalizeOutcome::AlreadyCompleted);
        };

        let summary = CallSummary::from_session(&snapshot, before.state, self.cents_per_minute);
        let saved = with_retry(self.retry, "call summary save", || self.summaries.save(&summary)).await;
        if let Err(e) = saved {
            error!("Dropping call summary for {}: {}", id, e);
        }

        let envelope = NotificationEnvelope::for_call(&snapshot, &summary);
        if let Some(envelope) = &envelope {
            let request = NotificationRequest::new(
                snapshot.store_id.clone(),
                snapshot.business_id.clone(),
                envelope.clone(),
            );
            let sent = with_retry(self.retry, "notification trigger", || self.notifier.trigger(&request)).await;
            if let Err(e) = sent {
                error!("Dropping notification for call {}: {}", id, e);
            }
        }

        metrics::counter!("calls_finalized_total", "outcome" => summary.outcome.as_str()).increment(1);
        info!(
            "Call {} finalized: outcome={} duration={}s transcript={} activity={:?}",
            id,
            summary.outcome.as_str(),
            summary.duration_secs,
            summary.transcript.len(),
            envelope.as_ref().map(|e| e.activity_type.as_str())
        );

        Ok(FinalizeOutcome::Finalized { summary, envelope })
    }

    /// CAS to COMPLETED; false when another hangup won
    ///
    /// A hangup is terminal even when its sequence is stale, so a sequence
    /// conflict on a still-live call is retried without the guard.
    async fn complete(&self, id: &CallControlId, seq: Option<u64>) -> Result<bool> {
        match self.store.transition(id, CallState::Completed, seq).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() && seq.is_some() => {
                match self.store.transition(id, CallState::Completed, None).await {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_conflict() => {
                        debug!("Hangup lost completion race for call {}: {}", id, e);
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) if e.is_conflict() => {
                debug!("Hangup lost completion race for call {}: {}", id, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
