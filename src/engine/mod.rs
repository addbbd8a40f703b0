mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod sweep;
mod transition;

pub use availability::{Availability, Schedule, check_availability, free_windows, merge_overlapping, subtract_intervals};
pub use error::{BookingError, ConflictingEntity, EngineError, EntityKind, TimingGuard};
pub use store::InMemoryStore;
pub use sweep::{SWEEP_ACTOR, SweepOutcome, due_event, sweep};
pub use transition::{
    ALL_EVENT_KINDS, AuditAction, AuditEntry, BookingEvent, EventKind, GpsPhase, NotificationKind, SideEffect,
    Transition, TransitionContext, deposit_guard, transition,
};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::auth::{AllowAll, BOOKINGS_MODULE, ModuleGate, RequestContext};
use crate::clock::Clock;
use crate::config::Policy;
use crate::journal::{Journal, MemoryJournal, Record};
use crate::limits::MAX_ACTOR_LEN;
use crate::model::*;
use crate::notify::{Dispatch, NotifyHub};
use crate::observability;

pub type SharedVehicleSchedule = Arc<RwLock<VehicleSchedule>>;

/// A booking change that was journaled and applied, with the effects it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub booking: Booking,
    pub effects: Vec<SideEffect>,
}

/// What the engine sweep did to one due booking.
#[derive(Debug)]
pub struct SweepReport {
    pub booking_id: BookingId,
    pub vehicle_id: VehicleId,
    pub event: EventKind,
    pub result: Result<Committed, EngineError>,
}

/// Booking engine for one tenant.
///
/// Every booking-affecting operation takes the vehicle's write lock, decides
/// against the schedule it sees under that lock, and holds the lock through
/// journal append and in-memory apply.
pub struct Engine {
    pub(super) store: InMemoryStore,
    journal: Arc<dyn Journal>,
    /// Held shared by map-level writes (agencies, registrations) across
    /// append and insert; held exclusively to pin a checkpoint's journal position.
    pub(super) fleet_commit: RwLock<()>,
    pub notify: Arc<NotifyHub>,
    gate: Arc<dyn ModuleGate>,
    clock: Arc<dyn Clock>,
    policy: Policy,
}

impl Engine {
    pub fn new(
        journal: Arc<dyn Journal>,
        notify: Arc<NotifyHub>,
        gate: Arc<dyn ModuleGate>,
        clock: Arc<dyn Clock>,
        policy: Policy,
    ) -> Self {
        Self {
            store: InMemoryStore::new(),
            journal,
            fleet_commit: RwLock::new(()),
            notify,
            gate,
            clock,
            policy,
        }
    }

    /// Engine with an in-process journal and every module active.
    pub fn in_memory(policy: Policy, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(MemoryJournal::new()),
            Arc::new(NotifyHub::new()),
            Arc::new(AllowAll),
            clock,
            policy,
        )
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    async fn journal_append(&self, record: &Record) -> Result<(), EngineError> {
        let start = Instant::now();
        let result = self.journal.append(record).await;
        metrics::histogram!(observability::JOURNAL_APPEND_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        result.map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub async fn journal_appends(&self) -> u64 {
        self.journal.appends_since_compact().await
    }

    /// Save a snapshot to `path` and drop the journal records it covers.
    ///
    /// Every record counted before the snapshot is taken is already applied
    /// by the time its vehicle's lock is released, so the snapshot includes it.
    pub async fn checkpoint(&self, path: &Path) -> Result<(), EngineError> {
        let upto = {
            let _pin = self.fleet_commit.write().await;
            self.journal.appends_since_compact().await
        };
        self.snapshot()
            .await
            .save(path)
            .map_err(|e| EngineError::JournalError(format!("snapshot save: {e}")))?;
        self.journal
            .compact(upto)
            .await
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    /// Journal-append + apply + publish in one call. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VehicleSchedule,
        record: Record,
    ) -> Result<(), EngineError> {
        self.journal_append(&record).await?;
        self.store.apply_record(vs, &record);
        for effect in record.effects() {
            self.notify.send(Dispatch {
                agency_id: vs.vehicle.agency_id,
                vehicle_id: vs.vehicle.id,
                effect,
            });
        }
        Ok(())
    }

    /// Module gate and request sanity, checked before any booking operation.
    pub(super) async fn authorize(&self, ctx: &RequestContext) -> Result<(), EngineError> {
        if ctx.actor.is_empty() {
            return Err(EngineError::InvalidInput("actor must not be empty"));
        }
        if ctx.actor.len() > MAX_ACTOR_LEN {
            return Err(EngineError::LimitExceeded("actor too long"));
        }
        if !self
            .gate
            .is_module_active(ctx.company_id, ctx.agency_id, BOOKINGS_MODULE)
            .await
        {
            metrics::counter!(observability::MODULE_DENIALS_TOTAL).increment(1);
            return Err(EngineError::ModuleInactive {
                agency_id: ctx.agency_id,
                module: BOOKINGS_MODULE,
            });
        }
        Ok(())
    }

    /// Lookup booking → vehicle, acquire the vehicle's write lock, check agency scope.
    pub(super) async fn resolve_booking_write(
        &self,
        agency_id: AgencyId,
        booking_id: BookingId,
    ) -> Result<OwnedRwLockWriteGuard<VehicleSchedule>, EngineError> {
        let vehicle_id = self
            .store
            .vehicle_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let vs = self
            .store
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.write_owned().await;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.agency_id != agency_id {
            return Err(EngineError::AgencyMismatch {
                expected: agency_id,
                actual: booking.agency_id,
            });
        }
        Ok(guard)
    }

    pub(super) fn preparation_minutes(&self, agency_id: &AgencyId) -> i64 {
        self.policy
            .preparation_minutes(self.store.agency(agency_id).as_ref())
    }
}
