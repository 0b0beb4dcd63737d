//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `secret_sync_events_total{kind}` - Events dispatched to the reconciler
//! - `secret_sync_mirror_operations_total{operation,outcome}` - Per-target mirror results
//! - `secret_sync_mirror_errors_total{operation,reason}` - Per-target mirror failures
//! - `secret_sync_fanout_duration_seconds{operation}` - Duration of one fan-out
//! - `secret_sync_sources_tracked` - Source secrets currently replicated
//! - `secret_sync_watch_errors_total{resource}` - Watch stream errors

use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_sync_events_total",
            "Total number of events dispatched to the reconciler by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create EVENTS_TOTAL metric - this should never happen")
});

static MIRROR_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_sync_mirror_operations_total",
            "Total number of successful mirror operations by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("Failed to create MIRROR_OPERATIONS_TOTAL metric - this should never happen")
});

static MIRROR_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_sync_mirror_errors_total",
            "Total number of failed mirror operations by operation and reason",
        ),
        &["operation", "reason"],
    )
    .expect("Failed to create MIRROR_ERRORS_TOTAL metric - this should never happen")
});

static FANOUT_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "secret_sync_fanout_duration_seconds",
            "Duration of a fan-out across all target namespaces in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["operation"],
    )
    .expect("Failed to create FANOUT_DURATION metric - this should never happen")
});

static SOURCES_TRACKED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "secret_sync_sources_tracked",
        "Current number of source secrets being replicated",
    )
    .expect("Failed to create SOURCES_TRACKED metric - this should never happen")
});

static WATCH_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_sync_watch_errors_total",
            "Total number of watch stream errors by resource",
        ),
        &["resource"],
    )
    .expect("Failed to create WATCH_ERRORS_TOTAL metric - this should never happen")
});

/// Register all metrics with the controller registry
///
/// Registering twice is not an error.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    register(Box::new(EVENTS_TOTAL.clone()))?;
    register(Box::new(MIRROR_OPERATIONS_TOTAL.clone()))?;
    register(Box::new(MIRROR_ERRORS_TOTAL.clone()))?;
    register(Box::new(FANOUT_DURATION.clone()))?;
    register(Box::new(SOURCES_TRACKED.clone()))?;
    register(Box::new(WATCH_ERRORS_TOTAL.clone()))?;

    Ok(())
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn increment_events(kind: &str) {
    EVENTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_mirror_operations(operation: &str, outcome: &str) {
    MIRROR_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn increment_mirror_errors(operation: &str, reason: &str) {
    MIRROR_ERRORS_TOTAL
        .with_label_values(&[operation, reason])
        .inc();
}

pub fn observe_fanout_duration(operation: &str, duration: f64) {
    FANOUT_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn set_sources_tracked(count: usize) {
    SOURCES_TRACKED.set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn increment_watch_errors(resource: &str) {
    WATCH_ERRORS_TOTAL.with_label_values(&[resource]).inc();
}
