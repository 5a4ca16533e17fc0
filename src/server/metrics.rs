use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all relay metrics
const PREFIX: &str = "amrelay";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 180.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    pub static ref CONVERSIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_conversions_total"), "Conversion jobs by source and outcome"),
        &["source", "status"]
    ).expect("Failed to create conversions_total metric");

    pub static ref ARTIFACTS_SWEPT_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_artifacts_swept_total"),
        "Stale artifacts deleted by the retention sweeper"
    ).expect("Failed to create artifacts_swept_total metric");
}

/// Register all metrics with the Prometheus registry. Idempotent; repeat
/// registrations are ignored.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CONVERSIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ARTIFACTS_SWEPT_TOTAL.clone()));
}

/// Collapse request paths into a bounded label set; download names would
/// otherwise blow up metric cardinality.
pub fn categorize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/upload" => "/upload",
        "/convert-url" => "/convert-url",
        p if p.starts_with("/download/") => "/download/{name}",
        _ => "other",
    }
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_conversion(source: &str, status: &str) {
    CONVERSIONS_TOTAL.with_label_values(&[source, status]).inc();
}

pub fn record_artifacts_swept(count: usize) {
    ARTIFACTS_SWEPT_TOTAL.inc_by(count as u64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let body = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, body)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Serve `/metrics` on a dedicated port, away from the public surface.
pub async fn run_metrics_server(port: u16) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
