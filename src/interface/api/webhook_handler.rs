//! Carrier webhook endpoint

use super::state::AppState;
use crate::application::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::application::{DispatchResult, WebhookRequest};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Receive one carrier event and answer with call-control actions
pub async fn carrier_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = WebhookRequest {
        body,
        signature: header(&headers, SIGNATURE_HEADER),
        timestamp: header(&headers, TIMESTAMP_HEADER),
    };

    match state.dispatcher.dispatch(request).await {
        DispatchResult::Unauthorized(message) => {
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
        }
        DispatchResult::Malformed(message) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
        DispatchResult::Actions { actions, .. } => (StatusCode::OK, Json(actions)).into_response(),
    }
}
