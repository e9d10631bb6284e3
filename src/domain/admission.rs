//! Call admission - one-shot eligibility decision per call
//!
//! Checks run in a fixed priority order and short-circuit on the first
//! failure: store active, number not blocked, subscription active or in
//! trial, per-period call quota.

use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BusinessId, CallControlId, PhoneNumberId, StoreId};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Why a call was (not) admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionReason {
    Ok,
    TrialExpired,
    CallLimitReached,
    NumberBlocked,
    StoreInactive,
}

impl AdmissionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionReason::Ok => "OK",
            AdmissionReason::TrialExpired => "TRIAL_EXPIRED",
            AdmissionReason::CallLimitReached => "CALL_LIMIT_REACHED",
            AdmissionReason::NumberBlocked => "NUMBER_BLOCKED",
            AdmissionReason::StoreInactive => "STORE_INACTIVE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(AdmissionReason::Ok),
            "TRIAL_EXPIRED" => Some(AdmissionReason::TrialExpired),
            "CALL_LIMIT_REACHED" => Some(AdmissionReason::CallLimitReached),
            "NUMBER_BLOCKED" => Some(AdmissionReason::NumberBlocked),
            "STORE_INACTIVE" => Some(AdmissionReason::StoreInactive),
            _ => None,
        }
    }
}

/// Cached, immutable admission outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub business_id: BusinessId,
    pub call_control_id: CallControlId,
    pub allowed: bool,
    pub reason: AdmissionReason,
    pub decided_at: DateTime<Utc>,
}

impl AdmissionDecision {
    pub fn new(business_id: BusinessId, call_control_id: CallControlId, reason: AdmissionReason) -> Self {
        Self {
            business_id,
            call_control_id,
            allowed: reason == AdmissionReason::Ok,
            reason,
            decided_at: Utc::now(),
        }
    }
}

/// Business, store and number a dialed number belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRoute {
    pub business_id: BusinessId,
    pub store_id: StoreId,
    pub phone_number_id: PhoneNumberId,
}

/// Subscription status as reported by billing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    None,
}

impl SubscriptionStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" | "cancelled" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::None,
        }
    }
}

/// Subscription snapshot for one business
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub status: SubscriptionStatus,
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Calls allowed per billing period; `None` is unlimited
    pub call_limit: Option<u64>,
}

impl Subscription {
    pub fn active(call_limit: Option<u64>) -> Self {
        Self {
            status: SubscriptionStatus::Active,
            trial_ends_at: None,
            call_limit,
        }
    }

    pub fn trial(trial_ends_at: DateTime<Utc>, call_limit: u64) -> Self {
        Self {
            status: SubscriptionStatus::Trialing,
            trial_ends_at: Some(trial_ends_at),
            call_limit: Some(call_limit),
        }
    }

    /// Active, or trialing inside the trial window
    pub fn is_entitled(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Active => true,
            SubscriptionStatus::Trialing => self.trial_ends_at.map_or(true, |end| now < end),
            _ => false,
        }
    }
}

/// Start of the calendar-month billing period containing `now`
pub fn billing_period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Admission data sources (store status, blocked numbers, billing, usage)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdmissionDirectory: Send + Sync {
    /// Resolve the dialed number to its business/store
    async fn resolve_number(&self, to_number: &str) -> Result<Option<NumberRoute>>;

    async fn store_active(&self, store_id: &StoreId) -> Result<bool>;

    /// Number administratively blocked, or caller on the number's block list
    async fn is_number_blocked(&self, phone_number_id: &PhoneNumberId, caller: &str) -> Result<bool>;

    async fn subscription(&self, business_id: &BusinessId) -> Result<Subscription>;

    /// Calls already consumed in the current billing period
    async fn calls_this_period(&self, business_id: &BusinessId) -> Result<u64>;
}

/// Input of one admission evaluation
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub call_control_id: CallControlId,
    /// `None` when the dialed number could not be resolved
    pub route: Option<NumberRoute>,
    pub caller: String,
}

/// Evaluates admission checks in priority order
pub struct AdmissionController {
    directory: Arc<dyn AdmissionDirectory>,
}

impl AdmissionController {
    pub fn new(directory: Arc<dyn AdmissionDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve routing ids for a dialed number
    pub async fn resolve_route(&self, to_number: &str) -> Result<Option<NumberRoute>> {
        if to_number.is_empty() {
            return Ok(None);
        }
        self.directory.resolve_number(to_number).await
    }

    /// Compute a fresh decision; callers cache it on the session
    pub async fn decide(&self, request: &AdmissionRequest) -> Result<AdmissionDecision> {
        let reason = self.evaluate(request).await?;
        let business_id = request
            .route
            .as_ref()
            .map(|r| r.business_id.clone())
            .unwrap_or_default();

        info!(
            "Admission for call {}: business={} reason={}",
            request.call_control_id,
            business_id,
            reason.as_str()
        );

        Ok(AdmissionDecision::new(
            business_id,
            request.call_control_id.clone(),
            reason,
        ))
    }

    async fn evaluate(&self, request: &AdmissionRequest) -> Result<AdmissionReason> {
        let route = match &request.route {
            Some(route) => route,
            None => {
                debug!("No route for call {}", request.call_control_id);
                return Ok(AdmissionReason::StoreInactive);
            }
        };

        if !self.directory.store_active(&route.store_id).await? {
            return Ok(AdmissionReason::StoreInactive);
        }

        if self
            .directory
            .is_number_blocked(&route.phone_number_id, &request.caller)
            .await?
        {
            return Ok(AdmissionReason::NumberBlocked);
        }

        let subscription = self.directory.subscription(&route.business_id).await?;
        if !subscription.is_entitled(Utc::now()) {
            return Ok(AdmissionReason::TrialExpired);
        }

        if let Some(limit) = subscription.call_limit {
            let used = self.directory.calls_this_period(&route.business_id).await?;
            if used >= limit {
                return Ok(AdmissionReason::CallLimitReached);
            }
        }

        Ok(AdmissionReason::Ok)
    }
}
