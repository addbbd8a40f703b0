use dashmap::DashMap;

use crate::journal::Record;
use crate::model::*;

use super::SharedVehicleSchedule;
use super::transition::SideEffect;

pub struct InMemoryStore {
    vehicles: DashMap<VehicleId, SharedVehicleSchedule>,
    booking_to_vehicle: DashMap<BookingId, VehicleId>,
    agencies: DashMap<AgencyId, AgencyConfig>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            vehicles: DashMap::new(),
            booking_to_vehicle: DashMap::new(),
            agencies: DashMap::new(),
        }
    }

    // ── Vehicles ─────────────────────────────────────────────

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn contains_vehicle(&self, id: &VehicleId) -> bool {
        self.vehicles.contains_key(id)
    }

    pub fn get_vehicle(&self, id: &VehicleId) -> Option<SharedVehicleSchedule> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn insert_vehicle(&self, id: VehicleId, schedule: SharedVehicleSchedule) {
        self.vehicles.insert(id, schedule);
    }

    /// Snapshot of the vehicle map, safe to hold across awaits.
    pub fn vehicle_entries(&self) -> Vec<(VehicleId, SharedVehicleSchedule)> {
        self.vehicles
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    // ── Booking index ────────────────────────────────────────

    pub fn vehicle_for_booking(&self, booking_id: &BookingId) -> Option<VehicleId> {
        self.booking_to_vehicle.get(booking_id).map(|e| *e.value())
    }

    pub fn contains_booking(&self, booking_id: &BookingId) -> bool {
        self.booking_to_vehicle.contains_key(booking_id)
    }

    pub fn map_booking(&self, booking_id: BookingId, vehicle_id: VehicleId) {
        self.booking_to_vehicle.insert(booking_id, vehicle_id);
    }

    // ── Agencies ─────────────────────────────────────────────

    pub fn agency(&self, id: &AgencyId) -> Option<AgencyConfig> {
        self.agencies.get(id).map(|e| e.value().clone())
    }

    pub fn insert_agency(&self, config: AgencyConfig) {
        self.agencies.insert(config.agency_id, config);
    }

    pub fn agencies(&self) -> Vec<AgencyConfig> {
        self.agencies.iter().map(|e| e.value().clone()).collect()
    }

    // ── Record application ───────────────────────────────────

    /// Apply a vehicle-scoped record. Caller holds the vehicle's write lock.
    pub fn apply_record(&self, vs: &mut VehicleSchedule, record: &Record) {
        match record {
            Record::MaintenanceRecorded { block, .. } => vs.upsert_maintenance(block.clone()),
            Record::BookingCreated { booking, .. } => {
                // Replace rather than insert: replaying over a snapshot may see it twice.
                vs.replace_booking(booking.clone());
                self.map_booking(booking.id, booking.vehicle_id);
            }
            Record::BookingTransitioned { booking, .. } => {
                vs.replace_booking(booking.clone());
            }
            Record::VehicleStatusSet { .. } => {}
            // Handled at the map level, not here
            Record::AgencyConfigured(_) | Record::VehicleRegistered(_) => {}
        }
        for effect in record.effects() {
            if let SideEffect::UpdateVehicleStatus { vehicle_id, status } = effect
                && vehicle_id == vs.vehicle.id
            {
                vs.vehicle.status = status;
            }
        }
    }
}
