use crate::model::*;

use super::conflict::{buffer_ms, clashes, validate_span};
use super::error::{BookingError, ConflictingEntity, EntityKind};

// ── Availability Resolver ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Conflict(ConflictingEntity),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Consistent snapshot of what occupies a vehicle, used for one decision.
#[derive(Debug, Clone, Copy)]
pub struct Schedule<'a> {
    pub bookings: &'a [Booking],
    pub maintenance: &'a [MaintenanceBlock],
    pub preparation_minutes: i64,
}

impl<'a> Schedule<'a> {
    pub fn new(
        bookings: &'a [Booking],
        maintenance: &'a [MaintenanceBlock],
        preparation_minutes: i64,
    ) -> Self {
        Self {
            bookings,
            maintenance,
            preparation_minutes,
        }
    }

    pub fn empty() -> Schedule<'static> {
        Schedule {
            bookings: &[],
            maintenance: &[],
            preparation_minutes: 0,
        }
    }
}

/// Decide whether `vehicle_id` can be booked for `candidate`.
///
/// Active bookings (minus `exclude`) are checked first in start order, then
/// blocking maintenance windows in start order; the first clash is returned.
pub fn check_availability(
    vehicle_id: VehicleId,
    candidate: &Span,
    exclude: Option<BookingId>,
    schedule: &Schedule<'_>,
) -> Result<Availability, BookingError> {
    validate_span(candidate)?;
    let buffer = buffer_ms(schedule.preparation_minutes)?;

    for entity in blocking_entities(vehicle_id, exclude, schedule)? {
        if clashes(candidate, &entity.span, buffer) {
            return Ok(Availability::Conflict(entity));
        }
    }
    Ok(Availability::Available)
}

/// Sub-intervals of `query` in which a rental could be placed without clashing.
pub fn free_windows(
    vehicle_id: VehicleId,
    query: &Span,
    schedule: &Schedule<'_>,
) -> Result<Vec<Span>, BookingError> {
    validate_span(query)?;
    let buffer = buffer_ms(schedule.preparation_minutes)?;

    // A rental must end `buffer` before an entity starts and begin `buffer` after it ends.
    let mut occupied: Vec<Span> = blocking_entities(vehicle_id, None, schedule)?
        .iter()
        .map(|e| Span::new(e.span.start.saturating_sub(buffer), e.span.end.saturating_add(buffer)))
        .filter(|s| s.overlaps(query))
        .collect();
    occupied.sort_by_key(|s| s.start);
    let occupied = merge_overlapping(&occupied);

    Ok(subtract_intervals(&[*query], &occupied))
}

fn blocking_entities(
    vehicle_id: VehicleId,
    exclude: Option<BookingId>,
    schedule: &Schedule<'_>,
) -> Result<Vec<ConflictingEntity>, BookingError> {
    let mut entities: Vec<ConflictingEntity> = schedule
        .bookings
        .iter()
        .filter(|b| b.vehicle_id == vehicle_id && b.status.is_active() && Some(b.id) != exclude)
        .map(|b| ConflictingEntity {
            kind: EntityKind::Booking,
            id: b.id,
            span: b.span,
        })
        .collect();
    entities.sort_by_key(|e| (e.span.start, e.id));

    let mut maintenance = Vec::new();
    for block in schedule.maintenance {
        if block.vehicle_id != vehicle_id || !block.status.is_blocking() {
            continue;
        }
        let span = block.span();
        if !span.is_well_formed() {
            return Err(BookingError::MalformedInterval("maintenance window ends before it starts"));
        }
        maintenance.push(ConflictingEntity {
            kind: EntityKind::Maintenance,
            id: block.id,
            span,
        });
    }
    maintenance.sort_by_key(|e| (e.span.start, e.id));

    entities.extend(maintenance);
    Ok(entities)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;
    const DAY1: Ms = 1_767_225_600_000; // 2026-01-01T00:00:00Z

    fn booking(vehicle_id: VehicleId, start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            agency_id: Ulid::nil(),
            vehicle_id,
            client_id: Ulid::new(),
            span: Span::new(start, end),
            total_amount: 0,
            status,
            deposit_required: false,
            deposit_amount: None,
            deposit_source: None,
            created_at: 0,
            checked_in_at: None,
            checked_out_at: None,
        }
    }

    fn maintenance(vehicle_id: VehicleId, start: Ms, duration: Ms, status: MaintenanceStatus) -> MaintenanceBlock {
        MaintenanceBlock {
            id: Ulid::new(),
            vehicle_id,
            planned_at: start,
            estimated_duration_ms: duration,
            completed_at: None,
            status,
        }
    }

    fn conflict_id(result: Result<Availability, BookingError>) -> Ulid {
        match result {
            Ok(Availability::Conflict(entity)) => entity.id,
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    // ── check_availability ───────────────────────────────

    #[test]
    fn buffer_boundary() {
        let v = Ulid::new();
        let existing = vec![booking(v, DAY1 + 9 * H, DAY1 + 17 * H, BookingStatus::Confirmed)];
        let schedule = Schedule::new(&existing, &[], 60);

        let at_18 = Span::new(DAY1 + 18 * H, DAY1 + 20 * H);
        assert_eq!(check_availability(v, &at_18, None, &schedule), Ok(Availability::Available));

        let at_1759 = Span::new(DAY1 + 17 * H + 59 * M, DAY1 + 20 * H);
        assert_eq!(conflict_id(check_availability(v, &at_1759, None, &schedule)), existing[0].id);
    }

    #[test]
    fn abutting_is_free_without_buffer() {
        let v = Ulid::new();
        let existing = vec![booking(v, 100, 200, BookingStatus::InProgress)];
        let schedule = Schedule::new(&existing, &[], 0);
        assert!(check_availability(v, &Span::new(200, 300), None, &schedule).unwrap().is_available());
        assert!(check_availability(v, &Span::new(50, 100), None, &schedule).unwrap().is_available());
        assert!(!check_availability(v, &Span::new(199, 300), None, &schedule).unwrap().is_available());
    }

    #[test]
    fn candidate_before_existing_needs_its_own_preparation() {
        let v = Ulid::new();
        let existing = vec![booking(v, 10 * H, 12 * H, BookingStatus::Pending)];
        let schedule = Schedule::new(&existing, &[], 60);
        // Ends exactly one buffer before the existing start.
        assert!(check_availability(v, &Span::new(7 * H, 9 * H), None, &schedule).unwrap().is_available());
        // Ends right at the existing start: no room to prepare the vehicle.
        assert!(!check_availability(v, &Span::new(8 * H, 10 * H), None, &schedule).unwrap().is_available());
    }

    #[test]
    fn inactive_and_foreign_bookings_ignored() {
        let v = Ulid::new();
        let existing = vec![
            booking(v, 100, 200, BookingStatus::Draft),
            booking(v, 100, 200, BookingStatus::Cancelled),
            booking(v, 100, 200, BookingStatus::Returned),
            booking(v, 100, 200, BookingStatus::NoShow),
            booking(Ulid::new(), 100, 200, BookingStatus::Confirmed),
        ];
        let schedule = Schedule::new(&existing, &[], 30);
        assert!(check_availability(v, &Span::new(100, 200), None, &schedule).unwrap().is_available());
    }

    #[test]
    fn every_active_state_blocks() {
        let v = Ulid::new();
        for status in ACTIVE_STATES {
            let existing = vec![booking(v, 100, 200, status)];
            let schedule = Schedule::new(&existing, &[], 0);
            assert!(
                !check_availability(v, &Span::new(150, 250), None, &schedule).unwrap().is_available(),
                "{status} should block"
            );
        }
    }

    #[test]
    fn exclude_self_when_rescheduling() {
        let v = Ulid::new();
        let existing = vec![booking(v, 100, 200, BookingStatus::Confirmed)];
        let schedule = Schedule::new(&existing, &[], 0);
        let moved = Span::new(150, 250);
        assert!(!check_availability(v, &moved, None, &schedule).unwrap().is_available());
        assert!(check_availability(v, &moved, Some(existing[0].id), &schedule).unwrap().is_available());
    }

    #[test]
    fn maintenance_blocks_like_a_booking() {
        let v = Ulid::new();
        let blocks = vec![
            maintenance(v, 10 * H, 2 * H, MaintenanceStatus::Planned),
            maintenance(v, 20 * H, 2 * H, MaintenanceStatus::Completed),
        ];
        let schedule = Schedule::new(&[], &blocks, 30);
        // Buffer after maintenance applies too.
        assert_eq!(
            conflict_id(check_availability(v, &Span::new(12 * H + 10 * M, 14 * H), None, &schedule)),
            blocks[0].id
        );
        assert!(check_availability(v, &Span::new(12 * H + 30 * M, 14 * H), None, &schedule).unwrap().is_available());
        // Completed maintenance is ignored.
        assert!(check_availability(v, &Span::new(20 * H, 21 * H), None, &schedule).unwrap().is_available());
    }

    #[test]
    fn first_conflict_is_earliest_booking_then_maintenance() {
        let v = Ulid::new();
        let later = booking(v, 300, 400, BookingStatus::Pending);
        let earlier = booking(v, 100, 200, BookingStatus::Confirmed);
        let existing = vec![later.clone(), earlier.clone()];
        let blocks = vec![maintenance(v, 0, 1_000, MaintenanceStatus::InProgress)];
        let schedule = Schedule::new(&existing, &blocks, 0);

        // Maintenance starts first but bookings are reported before maintenance.
        assert_eq!(conflict_id(check_availability(v, &Span::new(0, 1_000), None, &schedule)), earlier.id);

        let only_maintenance = Schedule::new(&[], &blocks, 0);
        let result = check_availability(v, &Span::new(0, 1_000), None, &only_maintenance).unwrap();
        match result {
            Availability::Conflict(entity) => assert_eq!(entity.kind, EntityKind::Maintenance),
            other => panic!("expected maintenance conflict, got {other:?}"),
        }
    }

    #[test]
    fn malformed_input_is_a_caller_error() {
        let v = Ulid::new();
        let schedule = Schedule::empty();
        assert!(matches!(
            check_availability(v, &Span { start: 100, end: 100 }, None, &schedule),
            Err(BookingError::MalformedInterval(_))
        ));
        assert!(matches!(
            check_availability(v, &Span { start: 200, end: 100 }, None, &schedule),
            Err(BookingError::MalformedInterval(_))
        ));
        let negative = Schedule::new(&[], &[], -5);
        assert!(matches!(
            check_availability(v, &Span::new(100, 200), None, &negative),
            Err(BookingError::MalformedInterval(_))
        ));
    }

    #[test]
    fn malformed_maintenance_reported() {
        let v = Ulid::new();
        let blocks = vec![maintenance(v, 10 * H, -H, MaintenanceStatus::Planned)];
        let schedule = Schedule::new(&[], &blocks, 0);
        assert!(matches!(
            check_availability(v, &Span::new(0, H), None, &schedule),
            Err(BookingError::MalformedInterval(_))
        ));
    }

    // ── free_windows ─────────────────────────────────────

    #[test]
    fn free_windows_around_buffered_bookings() {
        let v = Ulid::new();
        let existing = vec![booking(v, 10 * H, 12 * H, BookingStatus::Confirmed)];
        let schedule = Schedule::new(&existing, &[], 30);
        let free = free_windows(v, &Span::new(0, 24 * H), &schedule).unwrap();
        assert_eq!(
            free,
            vec![Span::new(0, 9 * H + 30 * M), Span::new(12 * H + 30 * M, 24 * H)]
        );
        // Every free window is itself bookable.
        for window in &free {
            assert!(check_availability(v, window, None, &schedule).unwrap().is_available());
        }
    }

    #[test]
    fn free_windows_merge_adjacent_blockers() {
        let v = Ulid::new();
        let existing = vec![
            booking(v, 10 * H, 12 * H, BookingStatus::Pending),
            booking(v, 13 * H, 14 * H, BookingStatus::Late),
        ];
        let blocks = vec![maintenance(v, 16 * H, H, MaintenanceStatus::Planned)];
        let schedule = Schedule::new(&existing, &blocks, 30);
        let free = free_windows(v, &Span::new(8 * H, 20 * H), &schedule).unwrap();
        assert_eq!(
            free,
            vec![
                Span::new(8 * H, 9 * H + 30 * M),
                Span::new(14 * H + 30 * M, 15 * H + 30 * M),
                Span::new(17 * H + 30 * M, 20 * H),
            ]
        );
    }

    #[test]
    fn free_windows_empty_schedule_is_whole_query() {
        let v = Ulid::new();
        let free = free_windows(v, &Span::new(0, 1_000), &Schedule::empty()).unwrap();
        assert_eq!(free, vec![Span::new(0, 1_000)]);
    }

    // ── subtract_intervals / merge_overlapping ───────────

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![
            Span::new(100, 200),
            Span::new(400, 500),
            Span::new(800, 900),
        ];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(
            result,
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300), Span::new(400, 500)];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 300), Span::new(400, 500)]);
    }
}
