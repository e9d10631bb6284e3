//! API Router configuration

use super::calls_handler::get_call_session;
use super::media_stream::media_stream_handler;
use super::metrics_handler::metrics_handler;
use super::state::{health_check, AppState};
use super::webhook_handler::carrier_webhook;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    // Carrier-facing routes
    let carrier_routes = Router::new()
        .route("/webhooks/carrier", post(carrier_webhook))
        .route("/media/:call_control_id", get(media_stream_handler));

    let call_routes = Router::new().route("/calls/:call_control_id", get(get_call_session));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    Router::new()
        .merge(health_routes)
        .merge(carrier_routes)
        .merge(call_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}
