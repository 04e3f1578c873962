use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::SchedulingError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: scheduler mutations. Labels: op, outcome.
pub const MUTATIONS_TOTAL: &str = "timetable_mutations_total";

/// Histogram: mutation latency in seconds, lock wait included. Labels: op.
pub const MUTATION_DURATION_SECONDS: &str = "timetable_mutation_duration_seconds";

/// Counter: (session, axis) conflicts reported to callers. Labels: reason.
pub const CONFLICTS_TOTAL: &str = "timetable_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: lock acquisitions that hit the timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "timetable_lock_timeouts_total";

/// Counter: change notifications the notifier failed to deliver.
pub const NOTIFY_FAILURES_TOTAL: &str = "timetable_notify_failures_total";

/// Histogram: WAL append + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "timetable_wal_flush_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a mutation result.
pub fn outcome_label<T>(result: &Result<T, SchedulingError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(SchedulingError::Validation { .. }) => "invalid",
        Err(SchedulingError::PermissionDenied { .. }) => "denied",
        Err(SchedulingError::NotFound(_)) => "not_found",
        Err(SchedulingError::Conflict(_)) => "conflict",
        Err(SchedulingError::Busy) => "busy",
        Err(SchedulingError::Restricted { .. }) => "restricted",
        Err(SchedulingError::Storage(_)) => "storage",
    }
}

pub fn record_mutation<T>(op: &'static str, result: &Result<T, SchedulingError>, started: Instant) {
    metrics::counter!(MUTATIONS_TOTAL, "op" => op, "outcome" => outcome_label(result)).increment(1);
    metrics::histogram!(MUTATION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
}
