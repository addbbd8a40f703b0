use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Policy;
use crate::model::*;

use super::availability::{Availability, Schedule, check_availability};
use super::conflict::validate_span;
use super::error::{BookingError, ConflictingEntity, EntityKind, TimingGuard};

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    Submit,
    Confirm,
    CheckIn,
    CheckOut,
    Cancel,
    MarkLate,
    MarkNoShow,
    Reschedule { span: Span },
    AmendTerms(BookingTerms),
}

impl BookingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BookingEvent::Submit => EventKind::Submit,
            BookingEvent::Confirm => EventKind::Confirm,
            BookingEvent::CheckIn => EventKind::CheckIn,
            BookingEvent::CheckOut => EventKind::CheckOut,
            BookingEvent::Cancel => EventKind::Cancel,
            BookingEvent::MarkLate => EventKind::MarkLate,
            BookingEvent::MarkNoShow => EventKind::MarkNoShow,
            BookingEvent::Reschedule { .. } => EventKind::Reschedule,
            BookingEvent::AmendTerms(_) => EventKind::AmendTerms,
        }
    }
}

/// Payload-free event discriminant, used in errors, journal records and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Submit,
    Confirm,
    CheckIn,
    CheckOut,
    Cancel,
    MarkLate,
    MarkNoShow,
    Reschedule,
    AmendTerms,
}

pub const ALL_EVENT_KINDS: [EventKind; 9] = [
    EventKind::Submit,
    EventKind::Confirm,
    EventKind::CheckIn,
    EventKind::CheckOut,
    EventKind::Cancel,
    EventKind::MarkLate,
    EventKind::MarkNoShow,
    EventKind::Reschedule,
    EventKind::AmendTerms,
];

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Submit => "submit",
            EventKind::Confirm => "confirm",
            EventKind::CheckIn => "check_in",
            EventKind::CheckOut => "check_out",
            EventKind::Cancel => "cancel",
            EventKind::MarkLate => "mark_late",
            EventKind::MarkNoShow => "mark_no_show",
            EventKind::Reschedule => "reschedule",
            EventKind::AmendTerms => "amend_terms",
        }
    }

    /// Statuses from which the event is accepted.
    pub fn sources(&self) -> &'static [BookingStatus] {
        use BookingStatus::*;
        match self {
            EventKind::Submit => &[Draft],
            EventKind::Confirm => &[Pending],
            EventKind::CheckIn => &[Confirmed],
            EventKind::CheckOut => &[InProgress, Late],
            EventKind::Cancel => &[Draft, Pending, Confirmed],
            EventKind::MarkLate => &[InProgress],
            EventKind::MarkNoShow => &[Pending, Confirmed],
            EventKind::Reschedule => &[Draft, Pending, Confirmed],
            EventKind::AmendTerms => &[Draft, Pending],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Side effects ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpsPhase {
    CheckIn,
    CheckOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Submitted,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
    MarkedLate,
    MarkedNoShow,
    Rescheduled,
    TermsAmended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub booking_id: BookingId,
    pub action: AuditAction,
    pub from: Option<BookingStatus>,
    pub to: BookingStatus,
    pub actor: String,
    pub at: Ms,
}

/// A command the caller applies together with the state change, in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    UpdateVehicleStatus {
        vehicle_id: VehicleId,
        status: VehicleStatus,
    },
    IssueInvoice {
        booking_id: BookingId,
        client_id: ClientId,
        total_amount: i64,
        deposit_amount: Option<i64>,
    },
    Notify {
        booking_id: BookingId,
        client_id: ClientId,
        kind: NotificationKind,
    },
    CaptureGps {
        booking_id: BookingId,
        vehicle_id: VehicleId,
        phase: GpsPhase,
    },
    Audit(AuditEntry),
}

pub(crate) fn audit(
    booking_id: BookingId,
    action: AuditAction,
    from: Option<BookingStatus>,
    to: BookingStatus,
    actor: &str,
    at: Ms,
) -> SideEffect {
    SideEffect::Audit(AuditEntry {
        booking_id,
        action,
        from,
        to,
        actor: actor.to_string(),
        at,
    })
}

// ── Transition function ──────────────────────────────────────────

/// Everything a transition may consult besides the booking itself.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub now: Ms,
    pub policy: &'a Policy,
    pub schedule: Schedule<'a>,
    /// Recorded on the audit entry.
    pub actor: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub booking: Booking,
    pub from: BookingStatus,
    pub event: EventKind,
    pub effects: Vec<SideEffect>,
}

/// Apply `event` to `booking`. Pure: nothing is mutated, effects are only described.
///
/// Guards run in a fixed order: terminal status, then source status, then the
/// event's own guard (availability, deposit or timing).
pub fn transition(
    booking: &Booking,
    event: &BookingEvent,
    ctx: &TransitionContext<'_>,
) -> Result<Transition, BookingError> {
    let kind = event.kind();
    let from = booking.status;
    if from.is_terminal() || !kind.sources().contains(&from) {
        return Err(BookingError::InvalidTransition { from, event: kind });
    }

    let mut next = booking.clone();
    let mut effects = Vec::new();

    let action = match event {
        BookingEvent::Submit => {
            validate_span(&booking.span)?;
            ensure_available(booking, &booking.span, ctx)?;
            next.status = BookingStatus::Pending;
            AuditAction::Submitted
        }
        BookingEvent::Confirm => {
            deposit_guard(booking)?;
            next.status = BookingStatus::Confirmed;
            AuditAction::Confirmed
        }
        BookingEvent::CheckIn => {
            let earliest = booking.span.start.saturating_sub(ctx.policy.check_in_grace_ms);
            if ctx.now < earliest {
                return Err(BookingError::TimingGuardViolation(TimingGuard::CheckInTooEarly {
                    earliest,
                }));
            }
            // Re-checked: the schedule may have moved since the booking was submitted.
            ensure_available(booking, &booking.span, ctx)?;
            ensure_not_rented(booking, ctx)?;
            next.status = BookingStatus::InProgress;
            next.checked_in_at = Some(ctx.now);
            effects.push(SideEffect::UpdateVehicleStatus {
                vehicle_id: booking.vehicle_id,
                status: VehicleStatus::Rented,
            });
            effects.push(SideEffect::CaptureGps {
                booking_id: booking.id,
                vehicle_id: booking.vehicle_id,
                phase: GpsPhase::CheckIn,
            });
            AuditAction::CheckedIn
        }
        BookingEvent::CheckOut => {
            next.status = BookingStatus::Returned;
            next.checked_out_at = Some(ctx.now);
            effects.push(SideEffect::UpdateVehicleStatus {
                vehicle_id: booking.vehicle_id,
                status: VehicleStatus::Available,
            });
            effects.push(SideEffect::IssueInvoice {
                booking_id: booking.id,
                client_id: booking.client_id,
                total_amount: booking.total_amount,
                deposit_amount: booking.deposit_amount.filter(|_| booking.deposit_required),
            });
            effects.push(SideEffect::CaptureGps {
                booking_id: booking.id,
                vehicle_id: booking.vehicle_id,
                phase: GpsPhase::CheckOut,
            });
            AuditAction::CheckedOut
        }
        BookingEvent::Cancel => {
            // Only reachable before check-in, so the vehicle was never rented by this booking.
            next.status = BookingStatus::Cancelled;
            AuditAction::Cancelled
        }
        BookingEvent::MarkLate => {
            if ctx.now <= booking.span.end {
                return Err(BookingError::TimingGuardViolation(TimingGuard::NotYetOverdue {
                    due: booking.span.end,
                }));
            }
            next.status = BookingStatus::Late;
            effects.push(SideEffect::Notify {
                booking_id: booking.id,
                client_id: booking.client_id,
                kind: NotificationKind::Overdue,
            });
            AuditAction::MarkedLate
        }
        BookingEvent::MarkNoShow => {
            let deadline = booking.span.start.saturating_add(ctx.policy.no_show_grace_ms);
            if ctx.now <= deadline {
                return Err(BookingError::TimingGuardViolation(
                    TimingGuard::NoShowGraceNotElapsed { deadline },
                ));
            }
            if let Some(at) = booking.checked_in_at {
                return Err(BookingError::TimingGuardViolation(TimingGuard::AlreadyCheckedIn { at }));
            }
            next.status = BookingStatus::NoShow;
            AuditAction::MarkedNoShow
        }
        BookingEvent::Reschedule { span } => {
            validate_span(span)?;
            ensure_available(booking, span, ctx)?;
            next.span = *span;
            AuditAction::Rescheduled
        }
        BookingEvent::AmendTerms(terms) => {
            next.total_amount = terms.total_amount;
            next.deposit_required = terms.deposit_required;
            next.deposit_amount = terms.deposit_amount;
            next.deposit_source = terms.deposit_source;
            AuditAction::TermsAmended
        }
    };

    effects.push(audit(
        booking.id,
        action,
        Some(from),
        next.status,
        ctx.actor,
        ctx.now,
    ));

    Ok(Transition {
        booking: next,
        from,
        event: kind,
        effects,
    })
}

/// `deposit_required ⇒ deposit_amount > 0 ∧ deposit_source present`.
pub fn deposit_guard(booking: &Booking) -> Result<(), BookingError> {
    if !booking.deposit_required {
        return Ok(());
    }
    if !booking.deposit_amount.is_some_and(|amount| amount > 0) {
        return Err(BookingError::DepositInvariantViolation {
            missing_field: "deposit_amount",
        });
    }
    if booking.deposit_source.is_none() {
        return Err(BookingError::DepositInvariantViolation {
            missing_field: "deposit_source",
        });
    }
    Ok(())
}

fn ensure_available(booking: &Booking, span: &Span, ctx: &TransitionContext<'_>) -> Result<(), BookingError> {
    match check_availability(booking.vehicle_id, span, Some(booking.id), &ctx.schedule)? {
        Availability::Available => Ok(()),
        Availability::Conflict(entity) => Err(BookingError::SchedulingConflict(entity)),
    }
}

/// A LATE rental holds the vehicle past its planned end, so the next rental
/// cannot start until it is returned.
fn ensure_not_rented(booking: &Booking, ctx: &TransitionContext<'_>) -> Result<(), BookingError> {
    let holder = ctx.schedule.bookings.iter().find(|b| {
        b.id != booking.id
            && b.vehicle_id == booking.vehicle_id
            && matches!(b.status, BookingStatus::InProgress | BookingStatus::Late)
    });
    match holder {
        Some(b) => Err(BookingError::SchedulingConflict(ConflictingEntity {
            kind: EntityKind::Booking,
            id: b.id,
            span: b.span,
        })),
        None => Ok(()),
    }
}
