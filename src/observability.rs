use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: table, status.
pub const QUERIES_TOTAL: &str = "slotgrid_queries_total";

/// Histogram: query latency in seconds. Labels: table.
pub const QUERY_DURATION_SECONDS: &str = "slotgrid_query_duration_seconds";

/// Histogram: grid build latency in seconds, fetch and classification included.
pub const GRID_BUILD_DURATION_SECONDS: &str = "slotgrid_grid_build_duration_seconds";

/// Counter: grid builds that failed. Labels: error.
pub const GRID_BUILD_FAILURES_TOTAL: &str = "slotgrid_grid_build_failures_total";

/// Counter: slots classified. Labels: status.
pub const SLOTS_CLASSIFIED_TOTAL: &str = "slotgrid_slots_classified_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotgrid_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotgrid_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotgrid_connections_rejected_total";

/// Gauge: number of training centers with a loaded engine.
pub const TENANTS_ACTIVE: &str = "slotgrid_tenants_active";

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
        Command::SelectGrid { .. } => "grid",
        Command::SelectCalendarWindow { .. } => "calendar_window",
        Command::SelectAvailability { .. } => "availability",
        Command::SelectConflicts { .. } => "conflicts",
        Command::SelectResources { .. } => "resources",
        Command::SelectBookings { .. } => "bookings",
    }
}

/// Short label for an engine error, for failure counters.
pub fn error_label(err: &crate::engine::EngineError) -> &'static str {
    use crate::engine::EngineError;
    match err {
        EngineError::InvalidRange(_) => "invalid_range",
        EngineError::InvalidDuration(_) => "invalid_duration",
        EngineError::NotFound(_) => "not_found",
        EngineError::ResourceMismatch { .. } => "resource_mismatch",
        EngineError::Cancelled => "cancelled",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::Source(_) => "source",
        EngineError::Internal(_) => "internal",
    }
}
