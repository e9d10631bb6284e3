//! Call session API handlers

use super::dto::{ApiResponse, CallSessionResponse};
use super::state::AppState;
use crate::domain::call::CallSessionStore;
use crate::domain::shared::value_objects::CallControlId;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

/// Get the live session for a call
pub async fn get_call_session(
    State(state): State<AppState>,
    Path(call_control_id): Path<String>,
) -> Result<Json<ApiResponse<CallSessionResponse>>, StatusCode> {
    info!("API: Getting call session {}", call_control_id);

    let id = CallControlId::new(call_control_id);
    let session = state.store.get(&id).await.map_err(|e| {
        error!("Failed to load call session {}: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match session {
        Some(session) => {
            let bridge_active = state.bridge.registry().contains(&id).await;
            Ok(Json(ApiResponse::success(CallSessionResponse::from_session(
                session,
                bridge_active,
            ))))
        }
        None => Ok(Json(ApiResponse::error(format!("Call {} not found", id)))),
    }
}
