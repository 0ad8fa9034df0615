use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — Prometheus scrape endpoint.
///
/// Renders the enhancement counters (jobs submitted/completed/failed,
/// per-stage degraded fallbacks, client track events) and the pipeline
/// duration histogram in text exposition format.
pub async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    handle.render()
}
