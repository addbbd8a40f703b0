use crate::config::Policy;
use crate::model::*;

use super::availability::Schedule;
use super::error::BookingError;
use super::transition::{BookingEvent, EventKind, Transition, TransitionContext, transition};

pub const SWEEP_ACTOR: &str = "system:sweep";

/// Result of one time-driven event fired by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub booking_id: BookingId,
    pub event: EventKind,
    pub result: Result<Transition, BookingError>,
}

/// The time-driven event `booking` is due for at `now`, if any.
///
/// Only IN_PROGRESS rentals can become late, and only bookings that never
/// reached check-in can become no-shows.
pub fn due_event(booking: &Booking, now: Ms, policy: &Policy) -> Option<BookingEvent> {
    match booking.status {
        BookingStatus::InProgress if now > booking.span.end => Some(BookingEvent::MarkLate),
        BookingStatus::Pending | BookingStatus::Confirmed
            if booking.checked_in_at.is_none()
                && now > booking.span.start.saturating_add(policy.no_show_grace_ms) =>
        {
            Some(BookingEvent::MarkNoShow)
        }
        _ => None,
    }
}

/// Fire every due MarkLate / MarkNoShow against a snapshot of bookings.
///
/// Each booking is considered at most once, in (start, id) order. A booking
/// that is not due produces no outcome, so running the sweep again on the
/// resulting states yields nothing.
pub fn sweep(now: Ms, bookings: &[Booking], policy: &Policy) -> Vec<SweepOutcome> {
    let mut ordered: Vec<&Booking> = bookings.iter().collect();
    ordered.sort_by_key(|b| (b.span.start, b.id));
    ordered.dedup_by_key(|b| b.id);

    let ctx = TransitionContext {
        now,
        policy,
        schedule: Schedule::empty(),
        actor: SWEEP_ACTOR,
    };

    ordered
        .into_iter()
        .filter_map(|booking| {
            let event = due_event(booking, now, policy)?;
            Some(SweepOutcome {
                booking_id: booking.id,
                event: event.kind(),
                result: transition(booking, &event, &ctx),
            })
        })
        .collect()
}
