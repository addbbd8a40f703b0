use crate::limits::*;
use crate::model::*;
use crate::snapshot::Snapshot;

use super::availability::{self, Availability, Schedule};
use super::conflict::validate_span_limits;
use super::{Engine, EngineError};

impl Engine {
    pub fn vehicle_count(&self) -> usize {
        self.store.vehicle_count()
    }

    pub fn agency(&self, id: &AgencyId) -> Option<AgencyConfig> {
        self.store.agency(id)
    }

    pub async fn vehicle(&self, id: &VehicleId) -> Option<Vehicle> {
        let vs = self.store.get_vehicle(id)?;
        let guard = vs.read().await;
        Some(guard.vehicle.clone())
    }

    pub async fn booking(&self, id: &BookingId) -> Option<Booking> {
        let vehicle_id = self.store.vehicle_for_booking(id)?;
        let vs = self.store.get_vehicle(&vehicle_id)?;
        let guard = vs.read().await;
        guard.booking(id).cloned()
    }

    /// Every booking on the vehicle, in start order.
    pub async fn bookings_for_vehicle(&self, vehicle_id: VehicleId) -> Result<Vec<Booking>, EngineError> {
        let vs = self
            .store
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(guard.bookings.clone())
    }

    pub async fn check_availability(
        &self,
        vehicle_id: VehicleId,
        span: Span,
        exclude: Option<BookingId>,
    ) -> Result<Availability, EngineError> {
        validate_span_limits(&span)?;
        let vs = self
            .store
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        let prep = self.preparation_minutes(&guard.vehicle.agency_id);
        let schedule = Schedule::new(&guard.bookings, &guard.maintenance, prep);
        Ok(availability::check_availability(vehicle_id, &span, exclude, &schedule)?)
    }

    /// Free sub-windows of `query`, optionally dropping those shorter than `min_duration_ms`.
    pub async fn free_windows(
        &self,
        vehicle_id: VehicleId,
        query: Span,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let vs = self
            .store
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        let prep = self.preparation_minutes(&guard.vehicle.agency_id);
        let schedule = Schedule::new(&guard.bookings, &guard.maintenance, prep);
        let mut free = availability::free_windows(vehicle_id, &query, &schedule)?;

        if let Some(min_dur) = min_duration_ms {
            free.retain(|span| span.duration_ms() >= min_dur);
        }
        Ok(free)
    }

    /// Consistent per-vehicle copy of the tenant's state.
    pub async fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            agencies: self.store.agencies(),
            ..Snapshot::default()
        };
        let mut entries = self.store.vehicle_entries();
        entries.sort_by_key(|(id, _)| *id);
        for (_, vs) in entries {
            let guard = vs.read().await;
            snapshot.vehicles.push(guard.vehicle.clone());
            snapshot.maintenance.extend(guard.maintenance.iter().cloned());
            snapshot.bookings.extend(guard.bookings.iter().cloned());
        }
        snapshot.agencies.sort_by_key(|a| a.agency_id);
        snapshot
    }
}
