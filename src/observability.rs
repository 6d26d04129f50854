use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotkeeper_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotkeeper_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "slotkeeper_reservations_created_total";

/// Counter: booking attempts rejected. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "slotkeeper_bookings_rejected_total";

/// Counter: facility lock acquisitions that timed out.
pub const LOCK_TIMEOUTS_TOTAL: &str = "slotkeeper_lock_timeouts_total";

/// Counter: pending reservations expired by the sweep.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "slotkeeper_reservations_expired_total";

/// Counter: clock-driven status changes applied by the sweep. Labels: to.
pub const LIFECYCLE_TRANSITIONS_TOTAL: &str = "slotkeeper_lifecycle_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "slotkeeper_connections_active";
pub const CONNECTIONS_TOTAL: &str = "slotkeeper_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotkeeper_connections_rejected_total";

/// Gauge: loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "slotkeeper_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeeper_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeeper_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a command, used as a metrics dimension.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertFacility { .. } => "insert_facility",
        Command::DeactivateFacility { .. } => "deactivate_facility",
        Command::CloseFacility { .. } => "close_facility",
        Command::ReopenFacility { .. } => "reopen_facility",
        Command::InsertPricingOption { .. } => "insert_pricing_option",
        Command::RetirePricingOption { .. } => "retire_pricing_option",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::RecordPayment { .. } => "record_payment",
        Command::RejectPaymentProof { .. } => "reject_payment_proof",
        Command::JoinWaitlist { .. } => "join_waitlist",
        Command::LeaveWaitlist { .. } => "leave_waitlist",
        Command::SelectFacilities => "select_facilities",
        Command::SelectPricingOptions { .. } => "select_pricing_options",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectWaitlist { .. } => "select_waitlist",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectOccupancy { .. } => "select_occupancy",
        Command::SelectValidation { .. } => "select_validation",
        Command::SelectQuote { .. } => "select_quote",
    }
}

/// Label for a rejection reason, matching `Rejection::kind`.
pub fn rejection_label(err: &crate::engine::EngineError) -> &'static str {
    use crate::engine::EngineError;
    match err {
        EngineError::Rejected(_) if err.is_conflict() => "conflict",
        EngineError::Rejected(reasons) => reasons.first().map_or("rejected", |r| r.kind()),
        EngineError::Configuration(_) => "configuration",
        EngineError::Concurrency(_) => "concurrency",
        EngineError::LimitExceeded(_) => "limit",
        EngineError::NotFound(_) => "not_found",
        _ => "other",
    }
}
