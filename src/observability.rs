use std::net::SocketAddr;

// ── Allocation cycle ─────────────────────────────────────────────

/// Counter: allocation cycles run. Labels: outcome (settled, capped, failed).
pub const CYCLES_TOTAL: &str = "seatflow_cycles_total";

/// Histogram: passes executed per cycle.
pub const CYCLE_PASSES: &str = "seatflow_cycle_passes";

/// Histogram: cycle wall time in seconds, including time waiting for the cycle lock.
pub const CYCLE_DURATION_SECONDS: &str = "seatflow_cycle_duration_seconds";

/// Counter: waitlisted → active transitions. Labels: path.
pub const ACTIVATIONS_TOTAL: &str = "seatflow_activations_total";

/// Counter: togetherness requests waived by aging.
pub const AGED_TOTAL: &str = "seatflow_aged_total";

/// Counter: activations or waivers skipped because the reservation moved on.
pub const STALE_SKIPS_TOTAL: &str = "seatflow_stale_skips_total";

// ── Lifecycle ────────────────────────────────────────────────────

/// Counter: reservations accepted at intake. Labels: kind.
pub const REQUESTS_TOTAL: &str = "seatflow_requests_total";

/// Counter: expired active reservations removed by the sweep.
pub const RECLAIMED_TOTAL: &str = "seatflow_reclaimed_total";

/// Gauge: waitlisted reservations after the last cycle.
pub const WAITLIST_DEPTH: &str = "seatflow_waitlist_depth";

/// Counter: notifier calls that failed or notices dropped by a lagging dispatcher.
pub const NOTIFY_FAILURES_TOTAL: &str = "seatflow_notify_failures_total";

// ── Ledger ───────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatflow_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatflow_wal_flush_batch_size";

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
