//! In-memory backends
//!
//! `dashmap` gives per-key locking: every mutation runs inside one entry
//! guard, so the compare-and-swap and set-if-absent semantics of the store
//! hold without a global lock.

use crate::domain::admission::{
    billing_period_start, AdmissionDirectory, NumberRoute, Subscription, SubscriptionStatus,
};
use crate::domain::call::{
    CallSession, CallSessionStore, CallState, NewCallSession, TranscriptFragment,
};
use crate::domain::call_summary::{CallOutcome, CallSummary, CallSummaryRepository};
use crate::domain::admission::AdmissionDecision;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{
    normalize_e164, BusinessId, CallControlId, PhoneNumberId, StoreId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn not_found(id: &CallControlId) -> CallError {
    CallError::NotFound(id.to_string())
}

fn grace_of(grace: Duration) -> chrono::Duration {
    chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::seconds(30))
}

/// In-memory call session store
pub struct InMemoryCallSessionStore {
    sessions: DashMap<CallControlId, CallSession>,
    ttl: chrono::Duration,
}

impl InMemoryCallSessionStore {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl CallSessionStore for InMemoryCallSessionStore {
    async fn create(&self, id: &CallControlId, init: NewCallSession) -> Result<CallSession> {
        let now = Utc::now();
        let mut entry = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| CallSession::new(id.clone(), init.clone(), self.ttl));
        // An expired record is not swept yet but no longer counts
        if entry.is_expired(now) {
            *entry = CallSession::new(id.clone(), init, self.ttl);
        }
        Ok(entry.value().clone())
    }

    async fn get(&self, id: &CallControlId) -> Result<Option<CallSession>> {
        let now = Utc::now();
        Ok(self
            .sessions
            .get(id)
            .filter(|s| !s.is_expired(now))
            .map(|s| s.value().clone()))
    }

    async fn transition(
        &self,
        id: &CallControlId,
        target: CallState,
        seq: Option<u64>,
    ) -> Result<CallState> {
        let mut session = self.sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        session.apply_transition(target, seq, Utc::now())
    }

    async fn record_admission(
        &self,
        id: &CallControlId,
        decision: AdmissionDecision,
    ) -> Result<AdmissionDecision> {
        let mut session = self.sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(session.record_admission(decision))
    }

    async fn append_transcript(&self, id: &CallControlId, fragment: TranscriptFragment) -> Result<()> {
        let mut session = self.sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        session.transcript.push(fragment);
        Ok(())
    }

    async fn set_metadata(&self, id: &CallControlId, key: &str, value: &str) -> Result<()> {
        let mut session = self.sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        session.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn touch(&self, id: &CallControlId) -> Result<()> {
        let mut session = self.sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        if session.finalized_at.is_none() {
            session.expires_at = Utc::now() + self.ttl;
        }
        Ok(())
    }

    async fn finalize(&self, id: &CallControlId, grace: Duration) -> Result<Option<CallSession>> {
        let mut session = self.sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(session.finalize(Utc::now(), grace_of(grace)))
    }

    async fn evict_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!("Evicted {} expired call sessions", evicted);
        }
        Ok(evicted)
    }
}

/// In-memory call summary repository
#[derive(Default)]
pub struct InMemoryCallSummaryRepository {
    summaries: DashMap<CallControlId, CallSummary>,
}

impl InMemoryCallSummaryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

#[async_trait]
impl CallSummaryRepository for InMemoryCallSummaryRepository {
    async fn save(&self, summary: &CallSummary) -> Result<()> {
        self.summaries
            .entry(summary.call_control_id.clone())
            .or_insert_with(|| summary.clone());
        Ok(())
    }

    async fn get_by_call_control_id(&self, id: &CallControlId) -> Result<Option<CallSummary>> {
        Ok(self.summaries.get(id).map(|s| s.value().clone()))
    }

    async fn count_served_since(&self, business_id: &BusinessId, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .summaries
            .iter()
            .filter(|s| {
                &s.business_id == business_id
                    && s.outcome == CallOutcome::Served
                    && s.ended_at >= since
            })
            .count() as u64)
    }
}

/// In-memory admission directory for development and tests
#[derive(Default)]
pub struct InMemoryAdmissionDirectory {
    numbers: DashMap<String, NumberRoute>,
    active_stores: DashSet<StoreId>,
    blocked_numbers: DashSet<PhoneNumberId>,
    blocked_callers: DashSet<(PhoneNumberId, String)>,
    subscriptions: DashMap<BusinessId, Subscription>,
    usage: DashMap<BusinessId, u64>,
    /// Completed calls counted toward the current period
    summaries: Option<Arc<dyn CallSummaryRepository>>,
}

impl InMemoryAdmissionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count served calls from a summary repository toward usage
    pub fn with_usage_source(mut self, summaries: Arc<dyn CallSummaryRepository>) -> Self {
        self.summaries = Some(summaries);
        self
    }

    /// Provision a number: route it and mark its store active
    pub fn add_number(&self, number: &str, route: NumberRoute) {
        self.active_stores.insert(route.store_id.clone());
        self.numbers.insert(normalize_e164(number), route);
    }

    pub fn set_store_active(&self, store_id: &StoreId, active: bool) {
        if active {
            self.active_stores.insert(store_id.clone());
        } else {
            self.active_stores.remove(store_id);
        }
    }

    pub fn block_number(&self, phone_number_id: &PhoneNumberId) {
        self.blocked_numbers.insert(phone_number_id.clone());
    }

    pub fn block_caller(&self, phone_number_id: &PhoneNumberId, caller: &str) {
        self.blocked_callers
            .insert((phone_number_id.clone(), normalize_e164(caller)));
    }

    pub fn set_subscription(&self, business_id: &BusinessId, subscription: Subscription) {
        self.subscriptions.insert(business_id.clone(), subscription);
    }

    /// Calls consumed this period outside the summary repository
    pub fn set_usage(&self, business_id: &BusinessId, calls: u64) {
        self.usage.insert(business_id.clone(), calls);
    }
}

#[async_trait]
impl AdmissionDirectory for InMemoryAdmissionDirectory {
    async fn resolve_number(&self, to_number: &str) -> Result<Option<NumberRoute>> {
        Ok(self
            .numbers
            .get(&normalize_e164(to_number))
            .map(|r| r.value().clone()))
    }

    async fn store_active(&self, store_id: &StoreId) -> Result<bool> {
        Ok(self.active_stores.contains(store_id))
    }

    async fn is_number_blocked(&self, phone_number_id: &PhoneNumberId, caller: &str) -> Result<bool> {
        Ok(self.blocked_numbers.contains(phone_number_id)
            || self
                .blocked_callers
                .contains(&(phone_number_id.clone(), normalize_e164(caller))))
    }

    async fn subscription(&self, business_id: &BusinessId) -> Result<Subscription> {
        Ok(self
            .subscriptions
            .get(business_id)
            .map(|s| s.value().clone())
            .unwrap_or(Subscription {
                status: SubscriptionStatus::None,
                trial_ends_at: None,
                call_limit: None,
            }))
    }

    async fn calls_this_period(&self, business_id: &BusinessId) -> Result<u64> {
        let manual = self.usage.get(business_id).map_or(0, |u| *u.value());
        let completed = match &self.summaries {
            Some(summaries) => {
                summaries
                    .count_served_since(business_id, billing_period_start(Utc::now()))
                    .await?
            }
            None => 0,
        };
        Ok(manual + completed)
    }
}
