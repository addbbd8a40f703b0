use std::net::SocketAddr;

use crate::engine::{BookingError, EngineError};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking transitions attempted. Labels: event, outcome.
pub const TRANSITIONS_TOTAL: &str = "fleetbook_transitions_total";

/// Histogram: time to decide and commit one transition, in seconds. Labels: event.
pub const TRANSITION_DURATION_SECONDS: &str = "fleetbook_transition_duration_seconds";

/// Counter: transitions rejected with a scheduling conflict.
pub const CONFLICTS_TOTAL: &str = "fleetbook_conflicts_total";

/// Counter: requests refused because the bookings module is inactive.
pub const MODULE_DENIALS_TOTAL: &str = "fleetbook_module_denials_total";

// ── Lifecycle sweep ─────────────────────────────────────────────

/// Histogram: duration of one engine sweep, in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "fleetbook_sweep_duration_seconds";

/// Counter: bookings moved by the sweep. Labels: event.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "fleetbook_sweep_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: journal append latency in seconds.
pub const JOURNAL_APPEND_DURATION_SECONDS: &str = "fleetbook_journal_append_duration_seconds";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "fleetbook_tenants_active";

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

/// Map an engine error to a short label for the `outcome` metric label.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::NotFound(_) => "not_found",
        EngineError::AlreadyExists(_) => "already_exists",
        EngineError::Booking(e) => match e {
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::SchedulingConflict(_) => "conflict",
            BookingError::DepositInvariantViolation { .. } => "deposit",
            BookingError::TimingGuardViolation(_) => "timing",
            BookingError::MalformedInterval(_) => "malformed_interval",
        },
        EngineError::ModuleInactive { .. } => "module_inactive",
        EngineError::AgencyMismatch { .. } => "agency_mismatch",
        EngineError::VehicleStatusLocked(_) => "vehicle_locked",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::InvalidInput(_) => "invalid_input",
        EngineError::JournalError(_) => "journal",
    }
}
