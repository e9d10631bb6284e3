//! Notification trigger clients

use crate::domain::notification::{NotificationRequest, NotificationTrigger};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info};

/// Posts notification requests to the notification engine as JSON
pub struct HttpNotificationTrigger {
    client: Client,
    endpoint: String,
}

impl HttpNotificationTrigger {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CallError::Internal(format!("notification client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl NotificationTrigger for HttpNotificationTrigger {
    async fn trigger(&self, request: &NotificationRequest) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "notification request failed");
                CallError::Internal(format!("notification request: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(CallError::Internal(format!(
                "notification endpoint returned {}",
                response.status()
            )));
        }

        info!(
            "Notification sent for store {}: {} {}",
            request.store_id,
            request.activity_type.as_str(),
            request.activity_id
        );
        Ok(())
    }
}

/// Logs notification requests instead of delivering them
#[derive(Debug, Default)]
pub struct LoggingNotificationTrigger;

#[async_trait]
impl NotificationTrigger for LoggingNotificationTrigger {
    async fn trigger(&self, request: &NotificationRequest) -> Result<()> {
        info!(
            store_id = %request.store_id,
            business_id = %request.business_id,
            activity_type = request.activity_type.as_str(),
            activity_id = %request.activity_id,
            priority = ?request.priority,
            "Notification triggered"
        );
        Ok(())
    }
}
