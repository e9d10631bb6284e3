//! PostgreSQL admission directory
//!
//! Reads provisioning (numbers, stores, block lists), billing status and
//! period usage. Usage is counted from served call summaries.

use super::database::db_error;
use crate::domain::admission::{
    billing_period_start, AdmissionDirectory, NumberRoute, Subscription, SubscriptionStatus,
};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{
    normalize_e164, BusinessId, PhoneNumberId, StoreId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

#[derive(FromRow)]
struct RouteRow {
    id: String,
    business_id: String,
    store_id: String,
}

#[derive(FromRow)]
struct SubscriptionRow {
    status: String,
    trial_ends_at: Option<DateTime<Utc>>,
    call_limit: Option<i64>,
}

pub struct PgAdmissionDirectory {
    pool: PgPool,
}

impl PgAdmissionDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdmissionDirectory for PgAdmissionDirectory {
    async fn resolve_number(&self, to_number: &str) -> Result<Option<NumberRoute>> {
        let row = sqlx::query_as::<_, RouteRow>(
            "SELECT id, business_id, store_id FROM phone_numbers WHERE e164 = $1",
        )
        .bind(normalize_e164(to_number))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("number lookup"))?;

        Ok(row.map(|r| NumberRoute {
            business_id: BusinessId::new(r.business_id),
            store_id: StoreId::new(r.store_id),
            phone_number_id: PhoneNumberId::new(r.id),
        }))
    }

    async fn store_active(&self, store_id: &StoreId) -> Result<bool> {
        let active: Option<(bool,)> = sqlx::query_as("SELECT active FROM stores WHERE id = $1")
            .bind(store_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("store lookup"))?;
        Ok(active.map_or(false, |(a,)| a))
    }

    async fn is_number_blocked(&self, phone_number_id: &PhoneNumberId, caller: &str) -> Result<bool> {
        let (blocked,): (bool,) = sqlx::query_as(
            r#"
            SELECT
                COALESCE((SELECT blocked FROM phone_numbers WHERE id = $1), FALSE)
                OR EXISTS (
                    SELECT 1 FROM blocked_callers
                    WHERE phone_number_id = $1 AND caller = $2
                )
            "#,
        )
        .bind(phone_number_id.as_str())
        .bind(normalize_e164(caller))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("block list lookup"))?;
        Ok(blocked)
    }

    async fn subscription(&self, business_id: &BusinessId) -> Result<Subscription> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT status, trial_ends_at, call_limit FROM subscriptions WHERE business_id = $1",
        )
        .bind(business_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("subscription lookup"))?;

        Ok(match row {
            Some(r) => Subscription {
                status: SubscriptionStatus::from_str(&r.status),
                trial_ends_at: r.trial_ends_at,
                call_limit: r.call_limit.map(|l| l.max(0) as u64),
            },
            None => Subscription {
                status: SubscriptionStatus::None,
                trial_ends_at: None,
                call_limit: None,
            },
        })
    }

    async fn calls_this_period(&self, business_id: &BusinessId) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM call_summaries
            WHERE business_id = $1 AND outcome = 'served' AND ended_at >= $2
            "#,
        )
        .bind(business_id.as_str())
        .bind(billing_period_start(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("usage lookup"))?;
        Ok(count.max(0) as u64)
    }
}
