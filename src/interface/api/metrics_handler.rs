//! Prometheus metrics handler

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and describe the service metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!("webhook_requests_total", "Carrier webhooks received");
    describe_counter!(
        "webhook_failover_total",
        "Webhooks answered with the fallback action list, by cause"
    );
    describe_counter!(
        "admission_decisions_total",
        "Admission decisions computed, by reason"
    );
    describe_counter!(
        "audio_frames_dropped_total",
        "Inbound audio frames dropped (late, duplicate or backpressure)"
    );
    describe_counter!("bridge_failures_total", "Conversation bridge stage failures");
    describe_gauge!("bridges_active", "Conversation bridges currently running");
    describe_counter!("calls_finalized_total", "Calls closed out, by outcome");
    describe_counter!(
        "session_writes_dropped_total",
        "Transcript and metadata writes dropped under backpressure"
    );
    describe_counter!("call_sessions_evicted_total", "Expired call sessions evicted");

    Ok(handle)
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    (StatusCode::OK, prometheus_handle.render()).into_response()
}
