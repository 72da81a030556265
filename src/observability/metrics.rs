//! # Metrics
//!
//! Components record through the `metrics` facade macros. The binary installs a
//! Prometheus recorder once at startup; the resulting handle renders the scrape text
//! served at `/admin/metrics`.
//!
//! Without an installed recorder every macro call is a no-op, which is what unit
//! tests rely on.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::config::MetricsConfig;

/// Build a recorder without installing it globally
pub fn build_prometheus_recorder(config: &MetricsConfig) -> GatewayResult<PrometheusRecorder> {
    let mut builder = PrometheusBuilder::new();

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    if !config.latency_buckets.is_empty() {
        builder = builder
            .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), &config.latency_buckets)
            .map_err(|e| GatewayError::config(format!("Invalid histogram buckets: {}", e)))?;
    }

    Ok(builder.build_recorder())
}

/// Install the Prometheus recorder as the global recorder
///
/// Fails when a recorder is already installed.
pub fn install_prometheus_recorder(config: &MetricsConfig) -> GatewayResult<PrometheusHandle> {
    let recorder = build_prometheus_recorder(config)?;
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder)
        .map_err(|_| GatewayError::internal("A metrics recorder is already installed"))?;

    describe_metrics();
    Ok(handle)
}

/// Register descriptions for every metric the gateway emits
pub fn describe_metrics() {
    describe_counter!("load_balancer_selections_total", "Workers selected, by service type");
    describe_counter!(
        "load_balancer_failed_selections_total",
        "Selections that found no eligible worker, by service type and reason"
    );
    describe_counter!("load_balancer_strategy_switches_total", "Runtime balancing strategy changes");
    describe_histogram!(
        "load_balancer_selection_duration_seconds",
        Unit::Seconds,
        "Time spent choosing a worker"
    );

    describe_counter!("circuit_breaker_opened_total", "Breakers that reached the failure threshold");
    describe_counter!("circuit_breaker_expired_total", "Open breakers closed by timeout");
    describe_counter!("circuit_breaker_probe_resets_total", "Oldest open breakers reset to admit a probe");

    describe_counter!("dispatch_requests_total", "Dispatches by service type and outcome");
    describe_histogram!(
        "dispatch_duration_seconds",
        Unit::Seconds,
        "Forward duration measured by the dispatcher"
    );
    describe_gauge!("dispatch_in_flight", "Dispatches currently forwarding");

    describe_counter!("registry_bookkeeping_errors_total", "Registry updates that failed during dispatch");
    describe_counter!("liveness_workers_marked_offline_total", "Workers marked offline by the liveness sweep");
    describe_counter!("workers_registered_total", "Worker registrations by service type");
}
