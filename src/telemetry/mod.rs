//! Telemetry for the harness: structured logging and metrics.
//!
//! Metric names are stable; the `metrics` facade leaves the actual
//! exporter to whoever embeds the harness.

mod logging;

use std::time::Duration;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};

/// Soft threshold past which a metadata PATCH is flagged as slow.
/// Observability only; a slow patch is never a failure.
pub const SLOW_PATCH_THRESHOLD: Duration = Duration::from_secs(2);

pub fn record_round_pass() {
    metrics::counter!("fleetcheck_rounds_passed_total").increment(1);
}

pub fn record_round_failure(kind: &'static str) {
    metrics::counter!("fleetcheck_rounds_failed_total", "kind" => kind).increment(1);
}

pub fn record_echo_bytes(bytes: u64) {
    metrics::counter!("fleetcheck_echo_bytes_verified_total").increment(bytes);
}

/// Record patch latency and warn past the soft threshold.
pub fn record_patch_latency(instance: usize, round: usize, elapsed: Duration) {
    metrics::histogram!("fleetcheck_patch_latency_seconds").record(elapsed.as_secs_f64());
    if elapsed > SLOW_PATCH_THRESHOLD {
        tracing::warn!(
            instance,
            round,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow metadata patch"
        );
    }
}

pub fn record_teardown_failure() {
    metrics::counter!("fleetcheck_teardown_failures_total").increment(1);
}
