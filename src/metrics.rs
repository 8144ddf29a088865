//! Injected metrics capability.
//!
//! Components take a [`MetricsSink`] as a constructor dependency instead of
//! calling a process-wide recorder directly, so tests can swap in
//! [`NoopMetrics`]. The production [`Telemetry`] impl forwards to the
//! `metrics` facade.

use std::time::Duration;

use crate::models::RunStatus;

/// Metrics capability consumed by the pollers and the completion handler.
pub trait MetricsSink: Send + Sync {
    /// Bump a named event counter by `value`.
    fn count_event(&self, event: &'static str, value: u64);

    /// Record that a run transitioned into `status`.
    fn record_status_update(&self, status: RunStatus);

    /// Record completion of an outbound engine/store request.
    fn record_outbound_request(&self, target: &'static str, success: bool);

    /// Record completion of a top-level orchestrator method.
    fn record_method_completion(&self, method: &'static str, success: bool, elapsed: Duration);
}

/// Forwards to the `metrics` crate's global recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Telemetry;

impl MetricsSink for Telemetry {
    fn count_event(&self, event: &'static str, value: u64) {
        metrics::counter!("runtrack_events_total", "event" => event).increment(value);
    }

    fn record_status_update(&self, status: RunStatus) {
        metrics::counter!("runtrack_run_status_updates_total", "status" => status.as_str())
            .increment(1);
    }

    fn record_outbound_request(&self, target: &'static str, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        metrics::counter!(
            "runtrack_outbound_requests_total",
            "target" => target,
            "outcome" => outcome,
        )
        .increment(1);
    }

    fn record_method_completion(&self, method: &'static str, success: bool, elapsed: Duration) {
        let outcome = if success { "ok" } else { "error" };
        metrics::histogram!(
            "runtrack_method_duration_seconds",
            "method" => method,
            "outcome" => outcome,
        )
        .record(elapsed.as_secs_f64());
    }
}

/// Discards every observation; the default in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn count_event(&self, _event: &'static str, _value: u64) {}
    fn record_status_update(&self, _status: RunStatus) {}
    fn record_outbound_request(&self, _target: &'static str, _success: bool) {}
    fn record_method_completion(&self, _method: &'static str, _success: bool, _elapsed: Duration) {}
}
