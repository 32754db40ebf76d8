use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "gearloan_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "gearloan_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "gearloan_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "gearloan_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "gearloan_connections_rejected_total";

/// Gauge: number of open pools (loaded trackers).
pub const POOLS_ACTIVE: &str = "gearloan_pools_active";

/// Counter: logins refused before the password exchange.
pub const AUTH_FAILURES_TOTAL: &str = "gearloan_auth_failures_total";

/// Histogram: kv log group-commit flush duration in seconds.
pub const KVLOG_FLUSH_DURATION_SECONDS: &str = "gearloan_kvlog_flush_duration_seconds";

/// Histogram: kv log group-commit batch size (records per flush).
pub const KVLOG_FLUSH_BATCH_SIZE: &str = "gearloan_kvlog_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: booking saves rejected for overlapping an existing booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "gearloan_booking_conflicts_total";

/// Gauge: unreturned bookings past their end date. Labels: pool.
pub const OVERDUE_LOANS: &str = "gearloan_overdue_loans";

/// Counter: reminder generations. Labels: status.
pub const REMINDERS_TOTAL: &str = "gearloan_reminders_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertEquipment { .. } => "insert_equipment",
        Command::RenameEquipment { .. } => "rename_equipment",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::ApproveReturn { .. } => "approve_return",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::ReportDamage { .. } => "report_damage",
        Command::SelectEquipment => "select_equipment",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectDamageReports { .. } => "select_damage_reports",
        Command::SelectOverdue => "select_overdue",
        Command::SelectPendingInspection => "select_pending_inspection",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectReminder { .. } => "select_reminder",
    }
}
