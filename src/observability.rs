use std::net::SocketAddr;

use crate::sql::{Command, ReservationQuery};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const STATEMENTS_TOTAL: &str = "roomkeep_statements_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const STATEMENT_DURATION_SECONDS: &str = "roomkeep_statement_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservation requests committed as pending.
pub const RESERVATIONS_REQUESTED_TOTAL: &str = "roomkeep_reservations_requested_total";

/// Counter: reservations accepted by a host.
pub const RESERVATIONS_ACCEPTED_TOTAL: &str = "roomkeep_reservations_accepted_total";

/// Counter: pending reservations declined because an overlapping one was accepted.
pub const RESERVATIONS_CASCADE_DECLINED_TOTAL: &str = "roomkeep_reservations_cascade_declined_total";

/// Counter: reservations declined directly by a host.
pub const RESERVATIONS_DECLINED_TOTAL: &str = "roomkeep_reservations_declined_total";

/// Counter: reservations cancelled by their guest.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "roomkeep_reservations_cancelled_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomkeep_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomkeep_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomkeep_wal_compactions_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertWindow { .. } => "insert_window",
        Command::UpdateWindow { .. } => "update_window",
        Command::SelectWindows { .. } => "select_windows",
        Command::InsertReservation(_) => "insert_reservation",
        Command::AcceptReservation { .. } => "accept_reservation",
        Command::DeclineReservation { .. } => "decline_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::SelectReservations(q) => match q {
            ReservationQuery::ById(_) => "select_reservation",
            ReservationQuery::PendingForHost(_) => "select_pending_for_host",
            ReservationQuery::PendingForGuest(_) => "select_pending_for_guest",
            ReservationQuery::ActiveForHost(_) => "select_active_for_host",
            ReservationQuery::ActiveForGuest(_) => "select_active_for_guest",
            ReservationQuery::PendingForAccommodation(_) => "select_pending_for_accommodation",
        },
        Command::SelectQuotes { .. } => "select_quotes",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn labels_distinguish_reservation_queries() {
        let id = Ulid::new();
        let pending = Command::SelectReservations(ReservationQuery::PendingForHost(id));
        let active = Command::SelectReservations(ReservationQuery::ActiveForHost(id));
        assert_ne!(command_label(&pending), command_label(&active));
        assert_eq!(command_label(&Command::CancelReservation { id }), "cancel_reservation");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
