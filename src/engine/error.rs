use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{BookingStatus, Ms, Span};

use super::transition::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Booking,
    Maintenance,
}

/// The booking or maintenance block that blocks a candidate interval.
/// `span` is the entity's raw interval, without the preparation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingEntity {
    pub kind: EntityKind,
    pub id: Ulid,
    pub span: Span,
}

/// Why a time-dependent guard refused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingGuard {
    CheckInTooEarly { earliest: Ms },
    NotYetOverdue { due: Ms },
    NoShowGraceNotElapsed { deadline: Ms },
    AlreadyCheckedIn { at: Ms },
}

impl fmt::Display for TimingGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingGuard::CheckInTooEarly { earliest } => {
                write!(f, "check-in not accepted before {earliest}")
            }
            TimingGuard::NotYetOverdue { due } => write!(f, "rental not overdue until after {due}"),
            TimingGuard::NoShowGraceNotElapsed { deadline } => {
                write!(f, "no-show grace window runs until {deadline}")
            }
            TimingGuard::AlreadyCheckedIn { at } => write!(f, "vehicle was checked in at {at}"),
        }
    }
}

/// Rejections produced by the pure scheduling core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    InvalidTransition {
        from: BookingStatus,
        event: EventKind,
    },
    SchedulingConflict(ConflictingEntity),
    DepositInvariantViolation {
        missing_field: &'static str,
    },
    TimingGuardViolation(TimingGuard),
    MalformedInterval(&'static str),
}

impl fmt::Display for BookingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingError::InvalidTransition { from, event } => {
                write!(f, "invalid transition: {event} not allowed from {from}")
            }
            BookingError::SchedulingConflict(entity) => {
                let what = match entity.kind {
                    EntityKind::Booking => "booking",
                    EntityKind::Maintenance => "maintenance",
                };
                write!(f, "scheduling conflict with {what} {} {}", entity.id, entity.span)
            }
            BookingError::DepositInvariantViolation { missing_field } => {
                write!(f, "deposit required but {missing_field} is missing")
            }
            BookingError::TimingGuardViolation(reason) => write!(f, "timing guard: {reason}"),
            BookingError::MalformedInterval(reason) => write!(f, "malformed interval: {reason}"),
        }
    }
}

impl std::error::Error for BookingError {}

/// Errors surfaced by the host engine.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Booking(BookingError),
    ModuleInactive {
        agency_id: Ulid,
        module: &'static str,
    },
    AgencyMismatch {
        expected: Ulid,
        actual: Ulid,
    },
    VehicleStatusLocked(Ulid),
    LimitExceeded(&'static str),
    InvalidInput(&'static str),
    JournalError(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Booking(e) => write!(f, "{e}"),
            EngineError::ModuleInactive { agency_id, module } => {
                write!(f, "module {module} is not active for agency {agency_id}")
            }
            EngineError::AgencyMismatch { expected, actual } => {
                write!(f, "belongs to agency {actual}, request scoped to {expected}")
            }
            EngineError::VehicleStatusLocked(id) => {
                write!(f, "vehicle {id} status is derived from an active booking or maintenance")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Booking(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BookingError> for EngineError {
    fn from(e: BookingError) -> Self {
        EngineError::Booking(e)
    }
}
