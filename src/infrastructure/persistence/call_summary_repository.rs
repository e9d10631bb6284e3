//! PostgreSQL implementation of the call summary repository

use super::database::db_error;
use crate::domain::admission::AdmissionReason;
use crate::domain::call::{CallDirection, TranscriptFragment};
use crate::domain::call_summary::{CallOutcome, CallSummary, CallSummaryRepository};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BusinessId, CallControlId, PhoneNumberId, StoreId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(FromRow)]
struct SummaryRow {
    id: Uuid,
    call_control_id: String,
    business_id: String,
    store_id: String,
    phone_number_id: String,
    direction: String,
    from_number: String,
    to_number: String,
    outcome: String,
    admission_reason: Option<String>,
    started_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: DateTime<Utc>,
    duration_secs: i64,
    billable_minutes: i64,
    cost_cents: i64,
    frames_forwarded: i64,
    frames_played: i64,
    frames_dropped: i64,
    transcript: Json<Vec<TranscriptFragment>>,
    created_at: DateTime<Utc>,
}

impl From<SummaryRow> for CallSummary {
    fn from(r: SummaryRow) -> Self {
        CallSummary {
            id: r.id,
            call_control_id: CallControlId::new(r.call_control_id),
            business_id: BusinessId::new(r.business_id),
            store_id: StoreId::new(r.store_id),
            phone_number_id: PhoneNumberId::new(r.phone_number_id),
            direction: CallDirection::from_str(&r.direction).unwrap_or_default(),
            from_number: r.from_number,
            to_number: r.to_number,
            outcome: CallOutcome::from_str(&r.outcome).unwrap_or(CallOutcome::Failed),
            admission_reason: r.admission_reason.as_deref().and_then(AdmissionReason::from_str),
            started_at: r.started_at,
            answered_at: r.answered_at,
            ended_at: r.ended_at,
            duration_secs: r.duration_secs,
            billable_minutes: r.billable_minutes,
            cost_cents: r.cost_cents,
            frames_forwarded: r.frames_forwarded,
            frames_played: r.frames_played,
            frames_dropped: r.frames_dropped,
            transcript: r.transcript.0,
            created_at: r.created_at,
        }
    }
}

pub struct PgCallSummaryRepository {
    pool: PgPool,
}

impl PgCallSummaryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallSummaryRepository for PgCallSummaryRepository {
    async fn save(&self, summary: &CallSummary) -> Result<()> {
        debug!("Saving call summary for {}", summary.call_control_id);

        sqlx::query(
            r#"
            INSERT INTO call_summaries (
                id, call_control_id, business_id, store_id, phone_number_id,
                direction, from_number, to_number, outcome, admission_reason,
                started_at, answered_at, ended_at,
                duration_secs, billable_minutes, cost_cents,
                frames_forwarded, frames_played, frames_dropped,
                transcript, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (call_control_id) DO NOTHING
            "#,
        )
        .bind(summary.id)
        .bind(summary.call_control_id.as_str())
        .bind(summary.business_id.as_str())
        .bind(summary.store_id.as_str())
        .bind(summary.phone_number_id.as_str())
        .bind(summary.direction.as_str())
        .bind(&summary.from_number)
        .bind(&summary.to_number)
        .bind(summary.outcome.as_str())
        .bind(summary.admission_reason.map(|r| r.as_str()))
        .bind(summary.started_at)
        .bind(summary.answered_at)
        .bind(summary.ended_at)
        .bind(summary.duration_secs)
        .bind(summary.billable_minutes)
        .bind(summary.cost_cents)
        .bind(summary.frames_forwarded)
        .bind(summary.frames_played)
        .bind(summary.frames_dropped)
        .bind(Json(&summary.transcript))
        .bind(summary.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("call summary save"))?;

        Ok(())
    }

    async fn get_by_call_control_id(&self, id: &CallControlId) -> Result<Option<CallSummary>> {
        let row = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT
                id, call_control_id, business_id, store_id, phone_number_id,
                direction, from_number, to_number, outcome, admission_reason,
                started_at, answered_at, ended_at,
                duration_secs, billable_minutes, cost_cents,
                frames_forwarded, frames_played, frames_dropped,
                transcript, created_at
            FROM call_summaries
            WHERE call_control_id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("call summary get"))?;

        Ok(row.map(CallSummary::from))
    }

    async fn count_served_since(&self, business_id: &BusinessId, since: DateTime<Utc>) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM call_summaries
            WHERE business_id = $1 AND outcome = 'served' AND ended_at >= $2
            "#,
        )
        .bind(business_id.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("call usage count"))?;

        Ok(count.max(0) as u64)
    }
}
