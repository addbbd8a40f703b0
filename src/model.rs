use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

pub type AgencyId = Ulid;
pub type BookingId = Ulid;
pub type ClientId = Ulid;
pub type CompanyId = Ulid;
pub type MaintenanceId = Ulid;
pub type VehicleId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The span extended at the end by `buffer` (preparation time after a rental).
    pub fn buffered(&self, buffer: Ms) -> Span {
        Span {
            start: self.start,
            end: self.end.saturating_add(buffer),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ── Vehicle ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    Available,
    Rented,
    Maintenance,
    Unavailable,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Available => "AVAILABLE",
            VehicleStatus::Rented => "RENTED",
            VehicleStatus::Maintenance => "MAINTENANCE",
            VehicleStatus::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub agency_id: AgencyId,
    pub status: VehicleStatus,
}

// ── Booking ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Draft,
    Pending,
    Confirmed,
    InProgress,
    Late,
    Returned,
    Cancelled,
    NoShow,
}

/// Statuses that occupy the vehicle's schedule.
pub const ACTIVE_STATES: [BookingStatus; 4] = [
    BookingStatus::Pending,
    BookingStatus::Confirmed,
    BookingStatus::InProgress,
    BookingStatus::Late,
];

pub const ALL_BOOKING_STATUSES: [BookingStatus; 8] = [
    BookingStatus::Draft,
    BookingStatus::Pending,
    BookingStatus::Confirmed,
    BookingStatus::InProgress,
    BookingStatus::Late,
    BookingStatus::Returned,
    BookingStatus::Cancelled,
    BookingStatus::NoShow,
];

/// Visual tone a front end uses to render a status badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Neutral,
    Info,
    Primary,
    Success,
    Warning,
    Danger,
    Muted,
}

impl BookingStatus {
    pub fn is_active(&self) -> bool {
        ACTIVE_STATES.contains(self)
    }

    /// No event is accepted from these statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Returned | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Draft => "DRAFT",
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Late => "LATE",
            BookingStatus::Returned => "RETURNED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Draft => "Draft",
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::InProgress => "In progress",
            BookingStatus::Late => "Late",
            BookingStatus::Returned => "Returned",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::NoShow => "No-show",
        }
    }

    pub fn tone(&self) -> StatusTone {
        match self {
            BookingStatus::Draft => StatusTone::Neutral,
            BookingStatus::Pending => StatusTone::Info,
            BookingStatus::Confirmed => StatusTone::Primary,
            BookingStatus::InProgress => StatusTone::Success,
            BookingStatus::Late => StatusTone::Danger,
            BookingStatus::Returned => StatusTone::Muted,
            BookingStatus::Cancelled => StatusTone::Muted,
            BookingStatus::NoShow => StatusTone::Warning,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who decided that a deposit is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositDecisionSource {
    Company,
    Agency,
}

/// Amounts are integer minor units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub agency_id: AgencyId,
    pub vehicle_id: VehicleId,
    pub client_id: ClientId,
    pub span: Span,
    pub total_amount: i64,
    pub status: BookingStatus,
    #[serde(default)]
    pub deposit_required: bool,
    #[serde(default)]
    pub deposit_amount: Option<i64>,
    #[serde(default)]
    pub deposit_source: Option<DepositDecisionSource>,
    pub created_at: Ms,
    #[serde(default)]
    pub checked_in_at: Option<Ms>,
    #[serde(default)]
    pub checked_out_at: Option<Ms>,
}

/// Commercial terms of a booking; editable until it is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingTerms {
    pub total_amount: i64,
    #[serde(default)]
    pub deposit_required: bool,
    #[serde(default)]
    pub deposit_amount: Option<i64>,
    #[serde(default)]
    pub deposit_source: Option<DepositDecisionSource>,
}

/// Request to create a booking. Agency and creation time come from the request context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub id: BookingId,
    pub vehicle_id: VehicleId,
    pub client_id: ClientId,
    pub span: Span,
    pub terms: BookingTerms,
}

// ── Maintenance ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenanceStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl MaintenanceStatus {
    pub fn is_blocking(&self) -> bool {
        matches!(self, MaintenanceStatus::Planned | MaintenanceStatus::InProgress)
    }
}

/// Maintenance window owned by the maintenance module; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceBlock {
    pub id: MaintenanceId,
    pub vehicle_id: VehicleId,
    pub planned_at: Ms,
    pub estimated_duration_ms: Ms,
    #[serde(default)]
    pub completed_at: Option<Ms>,
    pub status: MaintenanceStatus,
}

impl MaintenanceBlock {
    /// `[planned_at, completed_at)` once completed, otherwise the planned duration.
    /// Not validated: a block with a non-positive duration yields a malformed span.
    pub fn span(&self) -> Span {
        let end = match self.completed_at {
            Some(done) => done,
            None => self.planned_at.saturating_add(self.estimated_duration_ms),
        };
        Span {
            start: self.planned_at,
            end,
        }
    }
}

// ── Agency ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyConfig {
    pub agency_id: AgencyId,
    #[serde(default)]
    pub preparation_minutes: Option<i64>,
    /// Max concurrent vehicles. Enforced by the agency module, stored only.
    #[serde(default)]
    pub capacity: Option<u32>,
}

// ── Per-vehicle schedule ─────────────────────────────────────────

/// Everything the scheduler knows about one vehicle. Guarded by a per-vehicle lock.
#[derive(Debug, Clone)]
pub struct VehicleSchedule {
    pub vehicle: Vehicle,
    /// Every booking ever made on the vehicle, sorted by `span.start`.
    pub bookings: Vec<Booking>,
    /// Sorted by `planned_at`.
    pub maintenance: Vec<MaintenanceBlock>,
}

impl VehicleSchedule {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            bookings: Vec::new(),
            maintenance: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    /// Replace a booking by id, re-sorting if its interval moved.
    pub fn replace_booking(&mut self, booking: Booking) -> Option<Booking> {
        let old = self.remove_booking(booking.id);
        self.insert_booking(booking);
        old
    }

    fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: &BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn upsert_maintenance(&mut self, block: MaintenanceBlock) {
        if let Some(pos) = self.maintenance.iter().position(|m| m.id == block.id) {
            self.maintenance.remove(pos);
        }
        let pos = self
            .maintenance
            .partition_point(|m| m.planned_at <= block.planned_at);
        self.maintenance.insert(pos, block);
    }

    pub fn active_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.status.is_active())
    }

    /// True while a booking or maintenance record pins the vehicle's status.
    pub fn status_is_derived(&self) -> bool {
        self.active_bookings().next().is_some()
            || self.maintenance.iter().any(|m| m.status.is_blocking())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle() -> Vehicle {
        Vehicle {
            id: Ulid::new(),
            agency_id: Ulid::new(),
            status: VehicleStatus::Available,
        }
    }

    fn booking(start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            agency_id: Ulid::new(),
            vehicle_id: Ulid::new(),
            client_id: Ulid::new(),
            span: Span::new(start, end),
            total_amount: 10_000,
            status,
            deposit_required: false,
            deposit_amount: None,
            deposit_source: None,
            created_at: 0,
            checked_in_at: None,
            checked_out_at: None,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.is_well_formed());
        assert!(!Span { start: 200, end: 200 }.is_well_formed());
        assert!(!Span { start: 300, end: 200 }.is_well_formed());
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn buffered_extends_end_only() {
        let s = Span::new(100, 200).buffered(50);
        assert_eq!(s, Span::new(100, 250));
        assert_eq!(Span::new(100, 200).buffered(0), Span::new(100, 200));
    }

    #[test]
    fn active_and_terminal_sets() {
        let active: Vec<_> = ALL_BOOKING_STATUSES.iter().filter(|s| s.is_active()).collect();
        assert_eq!(active.len(), 4);
        for s in ALL_BOOKING_STATUSES {
            // Never both.
            assert!(!(s.is_active() && s.is_terminal()), "{s}");
        }
        assert!(!BookingStatus::Draft.is_active());
        assert!(!BookingStatus::Draft.is_terminal());
        assert!(BookingStatus::NoShow.is_terminal());
    }

    #[test]
    fn every_status_has_a_badge() {
        for s in ALL_BOOKING_STATUSES {
            assert!(!s.label().is_empty());
            let _ = s.tone();
        }
        assert_eq!(BookingStatus::Late.tone(), StatusTone::Danger);
        assert_eq!(BookingStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&BookingStatus::NoShow).unwrap();
        assert_eq!(json, "\"NO_SHOW\"");
        let parsed: VehicleStatus = serde_json::from_str("\"MAINTENANCE\"").unwrap();
        assert_eq!(parsed, VehicleStatus::Maintenance);
    }

    #[test]
    fn booking_ordering() {
        let mut vs = VehicleSchedule::new(vehicle());
        vs.insert_booking(booking(300, 400, BookingStatus::Pending));
        vs.insert_booking(booking(100, 200, BookingStatus::Draft));
        vs.insert_booking(booking(200, 300, BookingStatus::Confirmed));
        let starts: Vec<Ms> = vs.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn replace_booking_resorts() {
        let mut vs = VehicleSchedule::new(vehicle());
        let first = booking(100, 200, BookingStatus::Pending);
        let second = booking(300, 400, BookingStatus::Pending);
        vs.insert_booking(first.clone());
        vs.insert_booking(second.clone());

        let mut moved = first.clone();
        moved.span = Span::new(500, 600);
        let old = vs.replace_booking(moved);
        assert_eq!(old.unwrap().span, Span::new(100, 200));
        assert_eq!(vs.bookings[0].id, second.id);
        assert_eq!(vs.bookings[1].id, first.id);
        assert_eq!(vs.bookings.len(), 2);
    }

    #[test]
    fn maintenance_span_prefers_completion() {
        let mut block = MaintenanceBlock {
            id: Ulid::new(),
            vehicle_id: Ulid::new(),
            planned_at: 1_000,
            estimated_duration_ms: 500,
            completed_at: None,
            status: MaintenanceStatus::InProgress,
        };
        assert_eq!(block.span(), Span::new(1_000, 1_500));
        block.completed_at = Some(1_200);
        block.status = MaintenanceStatus::Completed;
        assert_eq!(block.span(), Span::new(1_000, 1_200));
        assert!(!block.status.is_blocking());
    }

    #[test]
    fn upsert_maintenance_replaces_by_id() {
        let mut vs = VehicleSchedule::new(vehicle());
        let mut block = MaintenanceBlock {
            id: Ulid::new(),
            vehicle_id: vs.vehicle.id,
            planned_at: 1_000,
            estimated_duration_ms: 500,
            completed_at: None,
            status: MaintenanceStatus::Planned,
        };
        vs.upsert_maintenance(block.clone());
        assert!(vs.status_is_derived());

        block.status = MaintenanceStatus::Cancelled;
        vs.upsert_maintenance(block);
        assert_eq!(vs.maintenance.len(), 1);
        assert!(!vs.status_is_derived());
    }

    #[test]
    fn status_derived_only_by_active_bookings() {
        let mut vs = VehicleSchedule::new(vehicle());
        vs.insert_booking(booking(100, 200, BookingStatus::Draft));
        vs.insert_booking(booking(300, 400, BookingStatus::Returned));
        assert!(!vs.status_is_derived());
        vs.insert_booking(booking(500, 600, BookingStatus::Late));
        assert!(vs.status_is_derived());
    }
}
