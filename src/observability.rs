use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "reactorbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "reactorbook_query_duration_seconds";

/// Counter: writes refused by a scheduling rule. Labels: op, kind.
pub const REJECTIONS_TOTAL: &str = "reactorbook_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "reactorbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "reactorbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "reactorbook_connections_rejected_total";

/// Gauge: reactors in the store.
pub const REACTORS_ACTIVE: &str = "reactorbook_reactors_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reactorbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reactorbook_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "reactorbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReactor { .. } => "insert_reactor",
        Command::UpdateReactor { .. } => "update_reactor",
        Command::DeleteReactor { .. } => "delete_reactor",
        Command::SelectReactors { .. } => "select_reactors",
        Command::InsertCommitment {
            status: crate::model::CommitmentStatus::Confirmed,
            ..
        } => "confirm_commitment",
        Command::InsertCommitment { .. } => "propose_commitment",
        Command::DeleteCommitment { .. } => "delete_commitment",
        Command::SelectCommitments { .. } => "select_commitments",
        Command::InsertMaintenance { .. } => "schedule_maintenance",
        Command::RescheduleMaintenance { .. } => "reschedule_maintenance",
        Command::CancelMaintenance { .. } => "cancel_maintenance",
        Command::SelectMaintenance { .. } => "select_maintenance",
        Command::SelectOccupancy { .. } => "select_occupancy",
        Command::SelectConflicts { .. } => "select_conflicts",
    }
}
