//! Prometheus metrics for the artifactci server.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Labels never carry repository names, paths or tokens, but the endpoint
//! still exposes aggregate usage and should be reachable only from the
//! scraper's network.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Bulk upload protocol
pub static BULK_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "artifactci_bulk_requests_total",
            "Bulk upload requests by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static BULK_REQUEST_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "artifactci_bulk_request_duration_seconds",
            "Time taken to answer a bulk upload request",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

pub static DUPLICATE_UPLOAD_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "artifactci_duplicate_upload_requests_total",
        "Bulk requests rejected because the job already has a ledger row",
    )
    .expect("metric creation failed")
});

pub static CLIENT_TOKENS_ISSUED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "artifactci_client_tokens_issued_total",
        "Per-file client tokens minted",
    )
    .expect("metric creation failed")
});

pub static JOB_STATUS_CHECK_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "artifactci_job_status_check_duration_seconds",
            "Time taken to load job statuses, by provider",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["mode"],
    )
    .expect("metric creation failed")
});

// Completed uploads
pub static UPLOADS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "artifactci_uploads_completed_total",
        "Upload completion events recorded",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ROWS_INSERTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "artifactci_upload_rows_inserted_total",
        "Upload alias rows inserted",
    )
    .expect("metric creation failed")
});

pub static EXPIRED_UPLOADS_SWEPT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "artifactci_expired_uploads_swept_total",
        "Expired upload rows deleted by the retention sweeper",
    )
    .expect("metric creation failed")
});

// Resolution and ingestion
pub static RESOLUTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "artifactci_resolutions_total",
            "Artifact and upload resolutions by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static WEBHOOK_EVENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "artifactci_webhook_events_total",
            "GitHub webhook deliveries by event and outcome",
        ),
        &["event", "outcome"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(BULK_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BULK_REQUEST_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DUPLICATE_UPLOAD_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CLIENT_TOKENS_ISSUED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOB_STATUS_CHECK_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ROWS_INSERTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EXPIRED_UPLOADS_SWEPT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RESOLUTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(WEBHOOK_EVENTS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record the outcome of a bulk request.
pub fn record_bulk_outcome(outcome: &str) {
    BULK_REQUESTS.with_label_values(&[outcome]).inc();
}

/// Record the outcome of a resolution.
pub fn record_resolution(outcome: &str) {
    RESOLUTIONS.with_label_values(&[outcome]).inc();
}
