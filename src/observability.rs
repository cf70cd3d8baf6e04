use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "chairtime_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "chairtime_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (booked, on_leave, slot_taken).
pub const BOOKINGS_TOTAL: &str = "chairtime_bookings_total";

/// Counter: accept/reject/cancel transitions applied. Labels: status.
pub const TRANSITIONS_TOTAL: &str = "chairtime_transitions_total";

/// Counter: past-dated appointments settled. Labels: status (expired, completed).
pub const SETTLEMENTS_TOTAL: &str = "chairtime_settlements_total";

// ── Resource utilization ────────────────────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "chairtime_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "chairtime_connections_total";

/// Counter: connections turned away at the limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "chairtime_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairtime_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairtime_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op when the port is unset.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::InsertLeave { .. } => "insert_leave",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::UpdateAppointmentStatus { .. } => "update_appointment_status",
        Command::SelectAppointment { .. } => "select_appointment",
        Command::SelectAllAppointments => "select_all_appointments",
        Command::SelectPendingForClient { .. } => "select_pending_appointments",
        Command::SelectApprovedForClient { .. } => "select_approved_appointments",
        Command::SelectRequestedForStylist { .. } => "select_requested_appointments",
        Command::SelectUpcomingForStylist { .. } => "select_upcoming_appointments",
        Command::SelectAvailableSlots { .. } => "select_available_slots",
        Command::SelectAvailableStylists { .. } => "select_available_stylists",
        Command::SelectStylists => "select_stylists",
        Command::InsertService { .. } => "insert_service",
        Command::UpdateService { .. } => "update_service",
        Command::DeleteService { .. } => "delete_service",
        Command::SelectService { .. } => "select_service",
        Command::SelectServices => "select_services",
    }
}
