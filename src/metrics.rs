//! Prometheus metrics: in-process registry plus best-effort Pushgateway push.
//!
//! The server exposes the default registry on `/metrics`. Batch surfaces (CLI,
//! watcher) push small one-shot marker registries to a Pushgateway when
//! `PUSHGATEWAY_URL` is set; pushes are best-effort and never fail the caller.

use std::sync::LazyLock;
use std::time::Duration;

use prometheus::{
    Gauge, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

fn register_counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).unwrap();
    let _ = prometheus::default_registry().register(Box::new(counter.clone()));
    counter
}

fn register_histogram(name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let histogram = HistogramVec::new(
        HistogramOpts::new(name, help)
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
        labels,
    )
    .unwrap();
    let _ = prometheus::default_registry().register(Box::new(histogram.clone()));
    histogram
}

/// HTTP requests by method/route/status.
pub static HTTP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_counter(
        "http_requests_total",
        "Count of HTTP requests",
        &["method", "route", "status"],
    )
});

/// HTTP latency by method/route/status.
pub static HTTP_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram(
        "http_request_duration_seconds",
        "HTTP request latency (seconds)",
        &["method", "route", "status"],
    )
});

/// Ingests by outcome (ok|fail).
pub static INGEST_TOTAL: LazyLock<IntCounterVec> =
    LazyLock::new(|| register_counter("ingest_total", "Total ingests by outcome", &["outcome"]));

/// Ingest duration by outcome.
pub static INGEST_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram(
        "ingest_duration_seconds",
        "Ingest duration (seconds)",
        &["outcome"],
    )
});

/// Resegment operations by outcome.
pub static RESEGMENT_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_counter(
        "resegment_total",
        "Total resegment operations by outcome",
        &["outcome"],
    )
});

/// Resegment duration by outcome.
pub static RESEGMENT_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram(
        "resegment_duration_seconds",
        "Resegment duration (seconds)",
        &["outcome"],
    )
});

/// FTS searches by outcome.
pub static SEARCH_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_counter(
        "fts_search_total",
        "Total FTS searches by outcome",
        &["outcome"],
    )
});

/// FTS search latency by outcome.
pub static SEARCH_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram(
        "fts_search_duration_seconds",
        "FTS search latency (seconds)",
        &["outcome"],
    )
});

/// Text exposition of the default registry (the `/metrics` body).
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::default_registry().gather())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Pushgateway
// ---------------------------------------------------------------------------

struct PushConfig {
    url: String,
    job: String,
    instance: Option<String>,
    timeout: Duration,
}

fn push_config() -> Option<PushConfig> {
    let url = std::env::var("PUSHGATEWAY_URL").ok()?;
    let url = url.trim().trim_end_matches('/').to_string();
    if url.is_empty() {
        return None;
    }
    Some(PushConfig {
        url,
        job: std::env::var("PUSHGATEWAY_JOB").unwrap_or_else(|_| "scriptorium".to_string()),
        instance: std::env::var("PUSHGATEWAY_INSTANCE")
            .ok()
            .filter(|v| !v.trim().is_empty()),
        timeout: Duration::from_secs(2),
    })
}

/// Push a one-shot event marker (counter + optional last-duration gauge) to
/// the Pushgateway. All errors are swallowed.
fn push_event_marker(event: &str, outcome: &str, duration_s: Option<f64>, source: &str) {
    let Some(config) = push_config() else {
        return;
    };

    let registry = Registry::new();
    let counter = IntCounterVec::new(
        Opts::new(
            "scriptorium_events_total",
            "Total ingest/resegment events",
        ),
        &["event", "outcome"],
    )
    .unwrap();
    let _ = registry.register(Box::new(counter.clone()));
    counter.with_label_values(&[event, outcome]).inc();

    if let Some(duration) = duration_s {
        let gauge = Gauge::new(
            format!("scriptorium_{event}_last_duration_seconds"),
            "Last event duration (seconds)",
        )
        .unwrap();
        let _ = registry.register(Box::new(gauge.clone()));
        gauge.set(duration);
    }

    let encoder = TextEncoder::new();
    let Ok(body) = encoder.encode_to_string(&registry.gather()) else {
        return;
    };

    let mut path = format!("{}/metrics/job/{}", config.url, config.job);
    if let Some(instance) = &config.instance {
        path.push_str(&format!("/instance/{instance}"));
    }
    path.push_str(&format!("/source/{source}"));

    // POST appends to the group (pushadd semantics).
    if let Err(e) = ureq::post(&path)
        .timeout(config.timeout)
        .set("Content-Type", "text/plain; version=0.0.4")
        .send_string(&body)
    {
        tracing::debug!(error = %e, "pushgateway push failed");
    }
}

/// Record an ingest outcome marker.
pub fn push_ingest(outcome: &str, duration_s: Option<f64>, source: &str) {
    push_event_marker("ingest", outcome, duration_s, source);
}

/// Record a resegment outcome marker.
pub fn push_resegment(outcome: &str, duration_s: Option<f64>, source: &str) {
    push_event_marker("resegment", outcome, duration_s, source);
}
