//! Feed Assembly Metrics
//!
//! Prometheus metrics for the feed pipeline, exposed at `GET /metrics`

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::time::Duration;

static FEED_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_requests_total",
        "Total feed requests by feed kind",
        &["kind"]
    )
    .expect("Failed to register feed requests metric")
});

static FEED_FALLBACK_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_fallback_total",
        "Candidate fetches served by the content store fallback",
        &["reason", "stage"]
    )
    .expect("Failed to register feed fallback metric")
});

static FEED_CACHE_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_cache_events_total",
        "Response cache events (hit/miss/write/skip/error)",
        &["event"]
    )
    .expect("Failed to register feed cache events metric")
});

static FEED_BREAKER_REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_breaker_rejections_total",
        "Calls rejected by an open circuit breaker",
        &["dependency"]
    )
    .expect("Failed to register feed breaker rejections metric")
});

static FEED_ASSEMBLY_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "feed_assembly_duration_seconds",
        "End-to-end feed assembly latency",
        &["kind"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register feed assembly duration metric")
});

pub fn record_request(kind: &str) {
    FEED_REQUESTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a fallback by reason (breaker_open/index_error/index_empty) and stage reached
pub fn record_fallback(reason: &str, stage: &str) {
    FEED_FALLBACK_TOTAL
        .with_label_values(&[reason, stage])
        .inc();
}

pub fn record_cache_event(event: &str) {
    FEED_CACHE_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

pub fn record_breaker_rejection(dependency: &str) {
    FEED_BREAKER_REJECTIONS_TOTAL
        .with_label_values(&[dependency])
        .inc();
}

pub fn record_assembly_duration(kind: &str, duration: Duration) {
    FEED_ASSEMBLY_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

/// Render the default registry in the text exposition format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
