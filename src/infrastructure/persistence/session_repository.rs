//! PostgreSQL call session store
//!
//! Each operation is one statement: conditional `UPDATE ... WHERE` for the
//! compare-and-swap paths, JSONB concatenation for transcript and metadata.

use super::database::db_error;
use crate::domain::admission::AdmissionDecision;
use crate::domain::call::{
    CallDirection, CallSession, CallSessionStore, CallState, NewCallSession, TranscriptFragment,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BusinessId, CallControlId, PhoneNumberId, StoreId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const SESSION_COLUMNS: &str = r#"
    call_control_id, business_id, store_id, phone_number_id,
    state, direction, from_number, to_number,
    started_at, answered_at, ended_at, last_event_seq,
    transcript, admission, metadata, finalized_at, expires_at
"#;

#[derive(FromRow)]
struct SessionRow {
    call_control_id: String,
    business_id: String,
    store_id: String,
    phone_number_id: String,
    state: String,
    direction: String,
    from_number: String,
    to_number: String,
    started_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    last_event_seq: i64,
    transcript: Json<Vec<TranscriptFragment>>,
    admission: Option<Json<AdmissionDecision>>,
    metadata: Json<BTreeMap<String, String>>,
    finalized_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for CallSession {
    type Error = CallError;

    fn try_from(r: SessionRow) -> Result<Self> {
        let state = CallState::from_str(&r.state).ok_or_else(|| {
            CallError::PersistenceFailure(format!("unknown state {} for {}", r.state, r.call_control_id))
        })?;
        Ok(CallSession {
            call_control_id: CallControlId::new(r.call_control_id),
            business_id: BusinessId::new(r.business_id),
            store_id: StoreId::new(r.store_id),
            phone_number_id: PhoneNumberId::new(r.phone_number_id),
            state,
            direction: CallDirection::from_str(&r.direction).unwrap_or_default(),
            from_number: r.from_number,
            to_number: r.to_number,
            started_at: r.started_at,
            answered_at: r.answered_at,
            ended_at: r.ended_at,
            last_event_seq: r.last_event_seq.max(0) as u64,
            transcript: r.transcript.0,
            admission: r.admission.map(|a| a.0),
            metadata: r.metadata.0,
            finalized_at: r.finalized_at,
            expires_at: r.expires_at,
        })
    }
}

pub struct PgCallSessionStore {
    pool: PgPool,
    ttl: chrono::Duration,
}

impl PgCallSessionStore {
    pub fn new(pool: PgPool, ttl: chrono::Duration) -> Self {
        Self { pool, ttl }
    }

    fn ttl_secs(&self) -> f64 {
        self.ttl.num_milliseconds() as f64 / 1000.0
    }

    /// Fetch a row regardless of expiry (conflict reporting)
    async fn fetch(&self, id: &CallControlId) -> Result<Option<CallSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM call_sessions WHERE call_control_id = $1",
            SESSION_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("session fetch"))?;
        row.map(CallSession::try_from).transpose()
    }

    async fn require_row(&self, id: &CallControlId, rows_affected: u64) -> Result<()> {
        if rows_affected == 0 && self.fetch(id).await?.is_none() {
            return Err(CallError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CallSessionStore for PgCallSessionStore {
    async fn create(&self, id: &CallControlId, init: NewCallSession) -> Result<CallSession> {
        let session = CallSession::new(id.clone(), init, self.ttl);

        sqlx::query(
            r#"
            INSERT INTO call_sessions (
                call_control_id, business_id, store_id, phone_number_id,
                state, direction, from_number, to_number,
                started_at, last_event_seq, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (call_control_id) DO UPDATE SET
                business_id = EXCLUDED.business_id,
                store_id = EXCLUDED.store_id,
                phone_number_id = EXCLUDED.phone_number_id,
                state = EXCLUDED.state,
                direction = EXCLUDED.direction,
                from_number = EXCLUDED.from_number,
                to_number = EXCLUDED.to_number,
                started_at = EXCLUDED.started_at,
                answered_at = NULL,
                ended_at = NULL,
                last_event_seq = EXCLUDED.last_event_seq,
                transcript = '[]'::jsonb,
                admission = NULL,
                metadata = '{}'::jsonb,
                finalized_at = NULL,
                expires_at = EXCLUDED.expires_at
            WHERE call_sessions.expires_at <= now()
            "#,
        )
        .bind(session.call_control_id.as_str())
        .bind(session.business_id.as_str())
        .bind(session.store_id.as_str())
        .bind(session.phone_number_id.as_str())
        .bind(session.state.as_str())
        .bind(session.direction.as_str())
        .bind(&session.from_number)
        .bind(&session.to_number)
        .bind(session.started_at)
        .bind(session.last_event_seq as i64)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("session create"))?;

        self.fetch(id)
            .await?
            .ok_or_else(|| CallError::PersistenceFailure(format!("session {} vanished after insert", id)))
    }

    async fn get(&self, id: &CallControlId) -> Result<Option<CallSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM call_sessions WHERE call_control_id = $1 AND expires_at > now()",
            SESSION_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("session get"))?;
        row.map(CallSession::try_from).transpose()
    }

    async fn transition(
        &self,
        id: &CallControlId,
        target: CallState,
        seq: Option<u64>,
    ) -> Result<CallState> {
        let sources: Vec<String> = CallState::sources_of(target)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let updated: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE call_sessions
            SET state = $2,
                last_event_seq = COALESCE($3, last_event_seq),
                answered_at = CASE WHEN $2 = 'ANSWERED' THEN COALESCE(answered_at, now()) ELSE answered_at END,
                ended_at = CASE WHEN $2 = 'COMPLETED' THEN now() ELSE ended_at END
            WHERE call_control_id = $1
              AND state = ANY($4)
              AND ($3::BIGINT IS NULL OR last_event_seq < $3)
            RETURNING state
            "#,
        )
        .bind(id.as_str())
        .bind(target.as_str())
        .bind(seq.map(|s| s as i64))
        .bind(&sources)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("session transition"))?;

        if updated.is_some() {
            return Ok(target);
        }

        match self.fetch(id).await? {
            Some(current) => {
                debug!("Transition {} -> {} rejected for {}", current.state, target, id);
                Err(CallError::TransitionConflict {
                    call_control_id: id.to_string(),
                    from: current.state,
                    to: target,
                })
            }
            None => Err(CallError::NotFound(id.to_string())),
        }
    }

    async fn record_admission(
        &self,
        id: &CallControlId,
        decision: AdmissionDecision,
    ) -> Result<AdmissionDecision> {
        sqlx::query(
            "UPDATE call_sessions SET admission = $2 WHERE call_control_id = $1 AND admission IS NULL",
        )
        .bind(id.as_str())
        .bind(Json(&decision))
        .execute(&self.pool)
        .await
        .map_err(db_error("admission record"))?;

        let cached: Option<(Option<Json<AdmissionDecision>>,)> =
            sqlx::query_as("SELECT admission FROM call_sessions WHERE call_control_id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("admission read"))?;

        match cached {
            Some((Some(Json(decision)),)) => Ok(decision),
            Some((None,)) => Err(CallError::PersistenceFailure(format!("admission for {} not stored", id))),
            None => Err(CallError::NotFound(id.to_string())),
        }
    }

    async fn append_transcript(&self, id: &CallControlId, fragment: TranscriptFragment) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE call_sessions
            SET transcript = transcript || jsonb_build_array($2::jsonb)
            WHERE call_control_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(Json(&fragment))
        .execute(&self.pool)
        .await
        .map_err(db_error("transcript append"))?;
        self.require_row(id, result.rows_affected()).await
    }

    async fn set_metadata(&self, id: &CallControlId, key: &str, value: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE call_sessions
            SET metadata = metadata || jsonb_build_object($2::text, $3::text)
            WHERE call_control_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_error("metadata write"))?;
        self.require_row(id, result.rows_affected()).await
    }

    async fn touch(&self, id: &CallControlId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE call_sessions
            SET expires_at = now() + make_interval(secs => $2)
            WHERE call_control_id = $1 AND finalized_at IS NULL
            "#,
        )
        .bind(id.as_str())
        .bind(self.ttl_secs())
        .execute(&self.pool)
        .await
        .map_err(db_error("session touch"))?;
        Ok(())
    }

    async fn finalize(&self, id: &CallControlId, grace: Duration) -> Result<Option<CallSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE call_sessions
            SET finalized_at = now(),
                expires_at = now() + make_interval(secs => $2)
            WHERE call_control_id = $1 AND finalized_at IS NULL
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(id.as_str())
        .bind(grace.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("session finalize"))?;

        match row {
            Some(row) => Ok(Some(CallSession::try_from(row)?)),
            None => {
                self.require_row(id, 0).await?;
                Ok(None)
            }
        }
    }

    async fn evict_expired(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM call_sessions WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(db_error("session eviction"))?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::{create_pool, run_migrations};

    async fn test_store() -> PgCallSessionStore {
        let config = crate::config::DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://postgres@localhost/ringdesk_test".to_string()),
            ..Default::default()
        };
        let pool = create_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        PgCallSessionStore::new(pool, chrono::Duration::hours(1))
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_pg_transition_cas() {
        let store = test_store().await;
        let id = CallControlId::new(format!("v3:pg-{}", uuid::Uuid::new_v4()));
        store.create(&id, NewCallSession::default()).await.unwrap();

        assert_eq!(
            store.transition(&id, CallState::Answered, Some(3)).await.unwrap(),
            CallState::Answered
        );
        let stale = store.transition(&id, CallState::Streaming, Some(2)).await;
        assert!(stale.unwrap_err().is_conflict());

        store.transition(&id, CallState::Completed, Some(4)).await.unwrap();
        let session = store.get(&id).await.unwrap().unwrap();
        assert_eq!(session.last_event_seq, 4);
        assert!(session.answered_at.is_some());
        assert!(session.ended_at.is_some());
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_pg_create_replaces_expired_record() {
        let pool = test_store().await.pool;
        let expired = PgCallSessionStore::new(pool.clone(), chrono::Duration::seconds(-1));
        let store = PgCallSessionStore::new(pool, chrono::Duration::hours(1));
        let id = CallControlId::new(format!("v3:pg-{}", uuid::Uuid::new_v4()));

        expired
            .create(&id, NewCallSession { from_number: "+1555".into(), ..Default::default() })
            .await
            .unwrap();
        expired.transition(&id, CallState::Failed, None).await.unwrap();

        let fresh = store
            .create(&id, NewCallSession { from_number: "+1999".into(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(fresh.from_number, "+1999");
        assert_eq!(fresh.state, CallState::Initiated);
        assert!(fresh.admission.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_pg_transcript_and_finalize() {
        let store = test_store().await;
        let id = CallControlId::new(format!("v3:pg-{}", uuid::Uuid::new_v4()));
        store.create(&id, NewCallSession::default()).await.unwrap();
        for text in ["one", "two"] {
            store
                .append_transcript(&id, TranscriptFragment::new(crate::domain::call::Speaker::Caller, text))
                .await
                .unwrap();
        }
        store.set_metadata(&id, "locale", "es-ES").await.unwrap();

        let snapshot = store.finalize(&id, Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(snapshot.transcript.len(), 2);
        assert_eq!(snapshot.locale(), Some("es-ES"));
        assert!(store.finalize(&id, Duration::from_secs(30)).await.unwrap().is_none());
    }
}
