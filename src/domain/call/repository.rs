//! Call session store interface

use crate::domain::admission::AdmissionDecision;
use crate::domain::call::session::{CallSession, NewCallSession, TranscriptFragment};
use crate::domain::call::value_object::CallState;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CallControlId;
use async_trait::async_trait;
use std::time::Duration;

/// Externalized, key-addressed, TTL-bound store of in-progress calls
///
/// Every mutation is a single targeted update or a compare-and-swap on
/// one record; implementations never read-modify-write a whole record
/// outside that atomic step.
#[async_trait]
pub trait CallSessionStore: Send + Sync {
    /// Idempotent upsert; returns the existing record when already present
    async fn create(&self, id: &CallControlId, init: NewCallSession) -> Result<CallSession>;

    async fn get(&self, id: &CallControlId) -> Result<Option<CallSession>>;

    /// CAS transition; `TransitionConflict` leaves the record unchanged
    async fn transition(
        &self,
        id: &CallControlId,
        target: CallState,
        seq: Option<u64>,
    ) -> Result<CallState>;

    /// Set-if-absent; returns the decision that is cached after the call
    async fn record_admission(
        &self,
        id: &CallControlId,
        decision: AdmissionDecision,
    ) -> Result<AdmissionDecision>;

    async fn append_transcript(&self, id: &CallControlId, fragment: TranscriptFragment)
        -> Result<()>;

    async fn set_metadata(&self, id: &CallControlId, key: &str, value: &str) -> Result<()>;

    /// Refresh the TTL of a live record
    async fn touch(&self, id: &CallControlId) -> Result<()>;

    /// Snapshot and schedule eviction after `grace`; `None` if already finalized
    async fn finalize(&self, id: &CallControlId, grace: Duration) -> Result<Option<CallSession>>;

    /// Remove records whose TTL or eviction grace has elapsed
    async fn evict_expired(&self) -> Result<usize>;
}
