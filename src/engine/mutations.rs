use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::auth::RequestContext;
use crate::journal::Record;
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::snapshot::Snapshot;

use super::availability::{Availability, Schedule, check_availability};
use super::conflict::{validate_span, validate_span_limits};
use super::error::BookingError;
use super::sweep;
use super::transition::{AuditAction, BookingEvent, EventKind, Transition, TransitionContext, audit, transition};
use super::{Committed, Engine, EngineError, SweepReport};

impl Engine {
    // ── Fleet ────────────────────────────────────────────────

    pub async fn configure_agency(&self, config: AgencyConfig) -> Result<(), EngineError> {
        validate_preparation(config.preparation_minutes)?;
        let record = Record::AgencyConfigured(config.clone());
        let _commit = self.fleet_commit.read().await;
        self.journal_append(&record).await?;
        self.store.insert_agency(config);
        Ok(())
    }

    pub async fn register_vehicle(&self, vehicle: Vehicle) -> Result<(), EngineError> {
        if self.store.vehicle_count() >= MAX_VEHICLES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        if vehicle.status == VehicleStatus::Rented {
            return Err(EngineError::InvalidInput("RENTED is set by check-in only"));
        }
        if self.store.contains_vehicle(&vehicle.id) {
            return Err(EngineError::AlreadyExists(vehicle.id));
        }

        let record = Record::VehicleRegistered(vehicle.clone());
        let _commit = self.fleet_commit.read().await;
        self.journal_append(&record).await?;
        self.store
            .insert_vehicle(vehicle.id, Arc::new(RwLock::new(VehicleSchedule::new(vehicle))));
        Ok(())
    }

    /// Manual status change. Refused while a booking or maintenance record drives the status.
    pub async fn set_vehicle_status(
        &self,
        vehicle_id: VehicleId,
        status: VehicleStatus,
    ) -> Result<(), EngineError> {
        if status == VehicleStatus::Rented {
            return Err(EngineError::InvalidInput("RENTED is set by check-in only"));
        }
        let vs = self
            .store
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.status_is_derived() {
            return Err(EngineError::VehicleStatusLocked(vehicle_id));
        }
        let record = Record::VehicleStatusSet { vehicle_id, status };
        self.persist_and_apply(&mut guard, record).await
    }

    /// Insert or update a maintenance block pushed by the maintenance module.
    pub async fn record_maintenance(&self, block: MaintenanceBlock) -> Result<(), EngineError> {
        validate_span_limits(&block.span())?;
        let vs = self
            .store
            .get_vehicle(&block.vehicle_id)
            .ok_or(EngineError::NotFound(block.vehicle_id))?;
        let mut guard = vs.write().await;
        let is_new = !guard.maintenance.iter().any(|m| m.id == block.id);
        if is_new && guard.maintenance.len() >= MAX_MAINTENANCE_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many maintenance blocks on vehicle"));
        }

        let vehicle_status = maintenance_vehicle_status(&guard, &block);
        let record = Record::MaintenanceRecorded {
            block,
            vehicle_status,
        };
        self.persist_and_apply(&mut guard, record).await
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Create a DRAFT booking, optionally submitting it in the same step.
    ///
    /// With `submit`, the Submit transition is decided before anything is stored,
    /// so a conflicting request leaves no draft behind.
    pub async fn create_booking(
        &self,
        ctx: &RequestContext,
        new: NewBooking,
        submit: bool,
    ) -> Result<Committed, EngineError> {
        let started = Instant::now();
        let booking_id = new.id;
        let result = self.create_booking_inner(ctx, new, submit).await;
        if submit {
            record_transition(EventKind::Submit, started, &result);
        }
        if let Err(e) = &result {
            debug!("create booking {booking_id} rejected: {e}");
        }
        result
    }

    async fn create_booking_inner(
        &self,
        ctx: &RequestContext,
        new: NewBooking,
        submit: bool,
    ) -> Result<Committed, EngineError> {
        self.authorize(ctx).await?;
        validate_span_limits(&new.span)?;
        validate_terms(&new.terms)?;

        let vs = self
            .store
            .get_vehicle(&new.vehicle_id)
            .ok_or(EngineError::NotFound(new.vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.vehicle.agency_id != ctx.agency_id {
            return Err(EngineError::AgencyMismatch {
                expected: ctx.agency_id,
                actual: guard.vehicle.agency_id,
            });
        }
        if self.store.contains_booking(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
        }

        let now = self.clock.now_ms();
        let draft = Booking {
            id: new.id,
            agency_id: ctx.agency_id,
            vehicle_id: new.vehicle_id,
            client_id: new.client_id,
            span: new.span,
            total_amount: new.terms.total_amount,
            status: BookingStatus::Draft,
            deposit_required: new.terms.deposit_required,
            deposit_amount: new.terms.deposit_amount,
            deposit_source: new.terms.deposit_source,
            created_at: now,
            checked_in_at: None,
            checked_out_at: None,
        };
        let mut effects = vec![audit(
            draft.id,
            AuditAction::Created,
            None,
            BookingStatus::Draft,
            &ctx.actor,
            now,
        )];

        let booking = if submit {
            let prep = self.preparation_minutes(&guard.vehicle.agency_id);
            let tctx = TransitionContext {
                now,
                policy: &self.policy,
                schedule: Schedule::new(&guard.bookings, &guard.maintenance, prep),
                actor: &ctx.actor,
            };
            let t = transition(&draft, &BookingEvent::Submit, &tctx)?;
            effects.extend(t.effects);
            t.booking
        } else {
            draft
        };

        let record = Record::BookingCreated {
            booking: booking.clone(),
            effects: effects.clone(),
        };
        self.persist_and_apply(&mut guard, record).await?;
        Ok(Committed { booking, effects })
    }

    /// Run one event through the state machine against the vehicle's current schedule.
    pub async fn apply(
        &self,
        ctx: &RequestContext,
        booking_id: BookingId,
        event: BookingEvent,
    ) -> Result<Committed, EngineError> {
        let kind = event.kind();
        let started = Instant::now();
        let result = self.apply_inner(ctx, booking_id, &event).await;
        record_transition(kind, started, &result);
        if let Err(e) = &result {
            debug!("{kind} on booking {booking_id} rejected: {e}");
        }
        result
    }

    async fn apply_inner(
        &self,
        ctx: &RequestContext,
        booking_id: BookingId,
        event: &BookingEvent,
    ) -> Result<Committed, EngineError> {
        self.authorize(ctx).await?;
        match event {
            BookingEvent::Reschedule { span } => validate_span_limits(span)?,
            BookingEvent::AmendTerms(terms) => validate_terms(terms)?,
            _ => {}
        }

        let mut guard = self.resolve_booking_write(ctx.agency_id, booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        let prep = self.preparation_minutes(&guard.vehicle.agency_id);
        let t = {
            let tctx = TransitionContext {
                now: self.clock.now_ms(),
                policy: &self.policy,
                schedule: Schedule::new(&guard.bookings, &guard.maintenance, prep),
                actor: &ctx.actor,
            };
            transition(&booking, event, &tctx)?
        };
        self.commit(&mut guard, t).await
    }

    async fn commit(&self, vs: &mut VehicleSchedule, t: Transition) -> Result<Committed, EngineError> {
        let record = Record::BookingTransitioned {
            booking: t.booking.clone(),
            from: t.from,
            event: t.event,
            effects: t.effects.clone(),
        };
        self.persist_and_apply(vs, record).await?;
        Ok(Committed {
            booking: t.booking,
            effects: t.effects,
        })
    }

    pub async fn submit(&self, ctx: &RequestContext, id: BookingId) -> Result<Committed, EngineError> {
        self.apply(ctx, id, BookingEvent::Submit).await
    }

    pub async fn confirm(&self, ctx: &RequestContext, id: BookingId) -> Result<Committed, EngineError> {
        self.apply(ctx, id, BookingEvent::Confirm).await
    }

    pub async fn check_in(&self, ctx: &RequestContext, id: BookingId) -> Result<Committed, EngineError> {
        self.apply(ctx, id, BookingEvent::CheckIn).await
    }

    pub async fn check_out(&self, ctx: &RequestContext, id: BookingId) -> Result<Committed, EngineError> {
        self.apply(ctx, id, BookingEvent::CheckOut).await
    }

    pub async fn cancel(&self, ctx: &RequestContext, id: BookingId) -> Result<Committed, EngineError> {
        self.apply(ctx, id, BookingEvent::Cancel).await
    }

    pub async fn reschedule(
        &self,
        ctx: &RequestContext,
        id: BookingId,
        span: Span,
    ) -> Result<Committed, EngineError> {
        self.apply(ctx, id, BookingEvent::Reschedule { span }).await
    }

    pub async fn amend_terms(
        &self,
        ctx: &RequestContext,
        id: BookingId,
        terms: BookingTerms,
    ) -> Result<Committed, EngineError> {
        self.apply(ctx, id, BookingEvent::AmendTerms(terms)).await
    }

    // ── Lifecycle sweep ──────────────────────────────────────

    /// Fire every due MarkLate / MarkNoShow, one vehicle at a time under its write lock.
    pub async fn sweep(&self, now: Ms) -> Vec<SweepReport> {
        let started = Instant::now();
        let mut reports = Vec::new();
        for (vehicle_id, vs) in self.store.vehicle_entries() {
            let mut guard = vs.write().await;
            let outcomes = sweep::sweep(now, &guard.bookings, &self.policy);
            for outcome in outcomes {
                let result = match outcome.result {
                    Ok(t) => self.commit(&mut guard, t).await,
                    Err(e) => Err(e.into()),
                };
                if result.is_ok() {
                    metrics::counter!(
                        observability::SWEEP_TRANSITIONS_TOTAL,
                        "event" => outcome.event.as_str()
                    )
                    .increment(1);
                }
                reports.push(SweepReport {
                    booking_id: outcome.booking_id,
                    vehicle_id,
                    event: outcome.event,
                    result,
                });
            }
        }
        metrics::histogram!(observability::SWEEP_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        reports
    }

    // ── Bootstrap ────────────────────────────────────────────

    /// Bulk-load a snapshot into an engine. All-or-nothing: every entry is
    /// validated before any is stored. Not journaled, the snapshot already is
    /// the persisted state.
    ///
    /// Bookings and maintenance must reference vehicles from the same snapshot.
    pub async fn restore(&self, snapshot: Snapshot) -> Result<(), EngineError> {
        let Snapshot {
            agencies,
            vehicles,
            maintenance,
            bookings,
        } = snapshot;

        let mut agency_configs: HashMap<AgencyId, AgencyConfig> = self
            .store
            .agencies()
            .into_iter()
            .map(|a| (a.agency_id, a))
            .collect();
        for config in &agencies {
            validate_preparation(config.preparation_minutes)?;
            agency_configs.insert(config.agency_id, config.clone());
        }

        if self.store.vehicle_count() + vehicles.len() > MAX_VEHICLES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        let mut staged: HashMap<VehicleId, VehicleSchedule> = HashMap::new();
        for vehicle in vehicles {
            if self.store.contains_vehicle(&vehicle.id) || staged.contains_key(&vehicle.id) {
                return Err(EngineError::AlreadyExists(vehicle.id));
            }
            staged.insert(vehicle.id, VehicleSchedule::new(vehicle));
        }

        for block in maintenance {
            validate_span(&block.span())?;
            let vs = staged
                .get_mut(&block.vehicle_id)
                .ok_or(EngineError::NotFound(block.vehicle_id))?;
            if vs.maintenance.len() >= MAX_MAINTENANCE_PER_VEHICLE {
                return Err(EngineError::LimitExceeded("too many maintenance blocks on vehicle"));
            }
            vs.upsert_maintenance(block);
        }

        let mut ordered = bookings;
        ordered.sort_by_key(|b| (b.span.start, b.id));
        let mut seen = HashSet::new();
        for booking in ordered {
            validate_span(&booking.span)?;
            if self.store.contains_booking(&booking.id) || !seen.insert(booking.id) {
                return Err(EngineError::AlreadyExists(booking.id));
            }
            let vs = staged
                .get_mut(&booking.vehicle_id)
                .ok_or(EngineError::NotFound(booking.vehicle_id))?;
            if booking.agency_id != vs.vehicle.agency_id {
                return Err(EngineError::AgencyMismatch {
                    expected: vs.vehicle.agency_id,
                    actual: booking.agency_id,
                });
            }
            if vs.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
                return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
            }
            if booking.status.is_active() {
                // Maintenance may legitimately have been planned over an existing booking.
                let prep = self
                    .policy
                    .preparation_minutes(agency_configs.get(&vs.vehicle.agency_id));
                let schedule = Schedule::new(&vs.bookings, &[], prep);
                if let Availability::Conflict(entity) =
                    check_availability(booking.vehicle_id, &booking.span, Some(booking.id), &schedule)?
                {
                    return Err(BookingError::SchedulingConflict(entity).into());
                }
            }
            vs.insert_booking(booking);
        }

        for config in agencies {
            self.store.insert_agency(config);
        }
        for (vehicle_id, vs) in staged {
            for booking in &vs.bookings {
                self.store.map_booking(booking.id, vehicle_id);
            }
            self.store.insert_vehicle(vehicle_id, Arc::new(RwLock::new(vs)));
        }
        Ok(())
    }

    /// Re-apply journal records written after the last snapshot. Records carry
    /// full state, so applying one already reflected in the snapshot is a no-op
    /// and the last record for an entity wins. Nothing is journaled or published.
    ///
    /// Returns the number of records applied.
    pub async fn replay(&self, records: Vec<Record>) -> usize {
        let mut applied = 0;
        for record in records {
            match &record {
                Record::AgencyConfigured(config) => self.store.insert_agency(config.clone()),
                Record::VehicleRegistered(vehicle) => match self.store.get_vehicle(&vehicle.id) {
                    Some(vs) => vs.write().await.vehicle = vehicle.clone(),
                    None => self.store.insert_vehicle(
                        vehicle.id,
                        Arc::new(RwLock::new(VehicleSchedule::new(vehicle.clone()))),
                    ),
                },
                _ => {
                    let Some(vs) = record.vehicle_id().and_then(|id| self.store.get_vehicle(&id)) else {
                        warn!("journal record for unknown vehicle {:?}, skipped", record.vehicle_id());
                        continue;
                    };
                    let mut vs = vs.write().await;
                    self.store.apply_record(&mut vs, &record);
                }
            }
            applied += 1;
        }
        applied
    }
}

fn validate_preparation(minutes: Option<i64>) -> Result<(), EngineError> {
    match minutes {
        Some(m) if m < 0 => Err(EngineError::InvalidInput("negative preparation time")),
        Some(m) if m > MAX_PREPARATION_MINUTES => {
            Err(EngineError::LimitExceeded("preparation time too long"))
        }
        _ => Ok(()),
    }
}

fn validate_terms(terms: &BookingTerms) -> Result<(), EngineError> {
    if terms.total_amount < 0 {
        return Err(EngineError::InvalidInput("total_amount must not be negative"));
    }
    if terms.deposit_amount.is_some_and(|a| a < 0) {
        return Err(EngineError::InvalidInput("deposit_amount must not be negative"));
    }
    Ok(())
}

/// Vehicle status implied by recording `block`, if it changes. A rental in
/// progress always keeps the vehicle RENTED.
fn maintenance_vehicle_status(vs: &VehicleSchedule, block: &MaintenanceBlock) -> Option<VehicleStatus> {
    let rented = vs
        .bookings
        .iter()
        .any(|b| matches!(b.status, BookingStatus::InProgress | BookingStatus::Late));
    if rented {
        return None;
    }
    match block.status {
        MaintenanceStatus::InProgress => {
            (vs.vehicle.status != VehicleStatus::Maintenance).then_some(VehicleStatus::Maintenance)
        }
        MaintenanceStatus::Completed | MaintenanceStatus::Cancelled => {
            let other_in_progress = vs
                .maintenance
                .iter()
                .any(|m| m.id != block.id && m.status == MaintenanceStatus::InProgress);
            (!other_in_progress && vs.vehicle.status == VehicleStatus::Maintenance)
                .then_some(VehicleStatus::Available)
        }
        MaintenanceStatus::Planned => None,
    }
}

fn record_transition<T>(event: EventKind, started: Instant, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => observability::error_label(e),
    };
    if let Err(EngineError::Booking(BookingError::SchedulingConflict(_))) = result {
        metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
    }
    metrics::counter!(
        observability::TRANSITIONS_TOTAL,
        "event" => event.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(observability::TRANSITION_DURATION_SECONDS, "event" => event.as_str())
        .record(started.elapsed().as_secs_f64());
}
