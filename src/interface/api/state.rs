//! Shared API state

use super::dto::ApiResponse;
use crate::application::{ConversationBridge, WebhookDispatcher};
use crate::domain::call::CallSessionStore;
use axum::Json;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: WebhookDispatcher,
    pub store: Arc<dyn CallSessionStore>,
    pub bridge: Arc<ConversationBridge>,
}

/// Health check endpoint
pub async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("OK"))
}
