use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking flow ────────────────────────────────────────────────

/// Counter: confirmed bookings created directly.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotkeeper_bookings_created_total";

/// Counter: confirmed bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "slotkeeper_bookings_cancelled_total";

/// Counter: clients added to a waitlist.
pub const WAITLIST_JOINS_TOTAL: &str = "slotkeeper_waitlist_joins_total";

// ── Offer lifecycle ─────────────────────────────────────────────

/// Counter: offers issued (hold placed, token sent).
pub const OFFERS_ISSUED_TOTAL: &str = "slotkeeper_offers_issued_total";

/// Counter: offers resolved. Labels: outcome = booked | refused | expired.
pub const OFFERS_RESOLVED_TOTAL: &str = "slotkeeper_offers_resolved_total";

/// Counter: hold inserts that lost an overlap check and forced a gap recompute.
pub const MATCH_RETRIES_TOTAL: &str = "slotkeeper_match_retries_total";

/// Counter: client notifications dropped after all retries.
pub const NOTIFY_FAILURES_TOTAL: &str = "slotkeeper_notify_failures_total";

/// Histogram: expiry sweep / waitlist scan duration in seconds. Labels: task.
pub const SWEEP_DURATION_SECONDS: &str = "slotkeeper_sweep_duration_seconds";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeeper_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeeper_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
