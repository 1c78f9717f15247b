//! # Metrics
//!
//! Prometheus metrics for reconciliation, ConfigMap writes, pod notification,
//! and admission, plus the registry they are gathered from.

use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::LazyLock;

/// Global Prometheus metrics registry
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "decofile_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "decofile_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static CONFIGMAP_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "decofile_configmap_writes_total",
            "Total number of ConfigMap writes by change kind",
        ),
        &["change"],
    )
    .expect("Failed to create CONFIGMAP_WRITES_TOTAL metric - this should never happen")
});

static PODS_NOTIFIED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "decofile_pods_notified_total",
        "Total number of pods successfully notified",
    )
    .expect("Failed to create PODS_NOTIFIED_TOTAL metric - this should never happen")
});

static POD_NOTIFY_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "decofile_pod_notify_failures_total",
        "Total number of pods whose notification exhausted all attempts",
    )
    .expect("Failed to create POD_NOTIFY_FAILURES_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "decofile_requeues_total",
            "Total number of reconciliation requeues",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static ADMISSIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "decofile_admissions_total",
            "Total number of admission reviews by endpoint and outcome",
        ),
        &["endpoint", "outcome"],
    )
    .expect("Failed to create ADMISSIONS_TOTAL metric - this should never happen")
});

/// Register all metrics with the Prometheus registry
///
/// Prometheus Registry::register() takes ownership (Box<dyn Collector>),
/// so we clone the metrics. Since Prometheus metrics internally use Arc,
/// cloning is cheap (just increments a reference count).
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONFIGMAP_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PODS_NOTIFIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(POD_NOTIFY_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSIONS_TOTAL.clone()))?;
    Ok(())
}

/// Render the registry in the Prometheus text exposition format
pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&REGISTRY.gather())?)
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn increment_configmap_writes(change: &str) {
    CONFIGMAP_WRITES_TOTAL.with_label_values(&[change]).inc();
}

pub fn increment_pods_notified(count: u64) {
    PODS_NOTIFIED_TOTAL.inc_by(count);
}

pub fn increment_pod_notify_failures(count: u64) {
    POD_NOTIFY_FAILURES_TOTAL.inc_by(count);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_admissions(endpoint: &str, outcome: &str) {
    ADMISSIONS_TOTAL.with_label_values(&[endpoint, outcome]).inc();
}
