use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "gymslot_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "gymslot_query_duration_seconds";

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (`booked` or a rejection reason).
pub const BOOKINGS_TOTAL: &str = "gymslot_bookings_total";

/// Counter: successful status transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "gymslot_transitions_total";

/// Histogram: trainers returned per candidate query.
pub const CANDIDATES_RETURNED: &str = "gymslot_candidates_returned";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "gymslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "gymslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "gymslot_connections_rejected_total";

/// Counter: logins refused because the user name is not a known role.
pub const AUTH_FAILURES_TOTAL: &str = "gymslot_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "gymslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "gymslot_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertGym { .. } => "insert_gym",
        Command::InsertService { .. } => "insert_service",
        Command::InsertGymService { .. } => "insert_gym_service",
        Command::UpdateGymService { .. } => "update_gym_service",
        Command::InsertTrainer { .. } => "insert_trainer",
        Command::UpdateTrainer { .. } => "update_trainer",
        Command::DeleteTrainer { .. } => "delete_trainer",
        Command::InsertTrainerService { .. } => "insert_trainer_service",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::DeleteAvailability { .. } => "delete_availability",
        Command::InsertMember { .. } => "insert_member",
        Command::DeleteMember { .. } => "delete_member",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::UpdateAppointmentStatus { .. } => "update_appointment_status",
        Command::SelectCandidates { .. } => "select_candidates",
        Command::SelectAppointments { .. } => "select_appointments",
    }
}
