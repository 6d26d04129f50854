mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod pricing;
mod queries;

pub use availability::{free_windows, merge_overlapping, slot_grid, subtract_intervals, DayAvailability, Slot, SlotState};
pub(crate) use conflict::now_ms;
pub use conflict::{validate_booking, Verdict};
pub use error::{EngineError, Rejection};
pub use lifecycle::{check_cancel, check_transition, due_transition, is_overdue, payment_deadline, Actor};
pub use mutations::ReservationRequest;
pub use pricing::{compose_price, duration_hours, resolve_addons, LineItem, LineKind, PriceQuote, PricingLimits};
pub use queries::DaySchedule;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::rules::BookingRules;
use crate::wal::Wal;

pub type SharedFacilityState = Arc<RwLock<FacilityState>>;

/// Policy the engine schedules against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub rules: BookingRules,
    pub pricing: PricingLimits,
    /// How long a booking waits for its facility's write lock.
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules: BookingRules::default(),
            pricing: PricingLimits::default(),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// committed together with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<PendingAppend> = Vec::new();
    while let Some(first) = rx.recv().await {
        let mut deferred = None;
        match first {
            WalCommand::Append { event, response } => batch.push((event, response)),
            other => deferred = Some(other),
        }
        while deferred.is_none() {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => deferred = Some(other),
                Err(_) => break,
            }
        }

        if !batch.is_empty() {
            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
            let started = std::time::Instant::now();
            let result = commit_batch(&mut wal, &batch);
            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            for (_, tx) in batch.drain(..) {
                let reply = match &result {
                    Ok(()) => Ok(()),
                    Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                };
                let _ = tx.send(reply);
            }
        }

        match deferred {
            Some(WalCommand::Compact { events, response }) => {
                let _ = response.send(wal.compact(&events));
            }
            Some(WalCommand::AppendsSinceCompact { response }) => {
                let _ = response.send(wal.appends_since_compact());
            }
            Some(WalCommand::Append { .. }) | None => {}
        }
    }
}

/// An entity id held in the reverse index while its creation is in flight.
/// Dropped without [`EntityClaim::commit`], the id is free again.
pub(super) struct EntityClaim<'a> {
    index: &'a DashMap<Ulid, Ulid>,
    id: Ulid,
    committed: bool,
}

impl EntityClaim<'_> {
    pub(super) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for EntityClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.index.remove(&self.id);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak
    // into the next batch; the callers of this batch are told it failed.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedFacilityState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub config: EngineConfig,
    /// Reverse lookup: entity (reservation, pricing option, waitlist entry) id → facility id
    pub(super) entity_to_facility: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a FacilityState. Caller holds the lock.
fn apply_to_facility(fs: &mut FacilityState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::FacilityDeactivated { .. } => fs.facility.active = false,
        Event::FacilityClosed { reason, until, .. } => {
            fs.facility.closure = Some(Closure {
                reason: reason.clone(),
                until: *until,
            });
        }
        Event::FacilityReopened { .. } => fs.facility.closure = None,
        Event::PricingOptionAdded {
            id,
            facility_id,
            name,
            price,
            sort_order,
        } => {
            fs.insert_pricing_option(PricingOption {
                id: *id,
                facility_id: *facility_id,
                name: name.clone(),
                price: *price,
                active: true,
                sort_order: *sort_order,
            });
            entity_map.insert(*id, *facility_id);
        }
        Event::PricingOptionRetired { id, .. } => {
            if let Some(o) = fs.pricing_options.iter_mut().find(|o| o.id == *id) {
                o.active = false;
            }
        }
        Event::ReservationCreated {
            id,
            facility_id,
            user_id,
            span,
            total_amount,
            payment_deadline,
            addon_ids,
            created_at,
        } => {
            fs.insert_reservation(Reservation {
                id: *id,
                facility_id: *facility_id,
                user_id: user_id.clone(),
                span: *span,
                status: ReservationStatus::Pending,
                total_amount: *total_amount,
                payment_status: PaymentStatus::Pending,
                payment_deadline: *payment_deadline,
                payment_proof: false,
                addon_ids: addon_ids.clone(),
                created_at: *created_at,
            });
            entity_map.insert(*id, *facility_id);
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = fs.reservation_mut(*id) {
                r.status = *status;
            }
        }
        Event::PaymentProofRecorded { id, .. } => {
            if let Some(r) = fs.reservation_mut(*id) {
                r.payment_proof = true;
            }
        }
        Event::PaymentProofRejected { id, .. } => {
            if let Some(r) = fs.reservation_mut(*id) {
                r.payment_proof = false;
            }
        }
        Event::PaymentVerified { id, .. } => {
            if let Some(r) = fs.reservation_mut(*id) {
                r.status = ReservationStatus::Confirmed;
                r.payment_status = PaymentStatus::Paid;
            }
        }
        Event::WaitlistJoined {
            id,
            facility_id,
            user_id,
            span,
            created_at,
        } => {
            fs.waitlist.push(WaitlistEntry {
                id: *id,
                facility_id: *facility_id,
                user_id: user_id.clone(),
                span: *span,
                created_at: *created_at,
            });
            entity_map.insert(*id, *facility_id);
        }
        Event::WaitlistLeft { id, .. } => {
            fs.waitlist.retain(|w| w.id != *id);
            entity_map.remove(id);
        }
        // FacilityCreated is handled at the DashMap level, not here
        Event::FacilityCreated { .. } => {}
    }
}

fn facility_from_event(event: &Event) -> Option<Facility> {
    match event {
        Event::FacilityCreated {
            id,
            name,
            hourly_rate,
            capacity,
            category,
        } => Some(Facility {
            id: *id,
            name: name.clone(),
            hourly_rate: *hourly_rate,
            capacity: *capacity,
            category: category.clone(),
            active: true,
            closure: None,
        }),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, config: EngineConfig) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            config,
            entity_to_facility: DashMap::new(),
        };

        // Sole owner of these Arcs during replay, so try_write never contends.
        // Never block here: this may run inside an async context (lazy tenant creation).
        for event in &events {
            if let Some(facility) = facility_from_event(event) {
                engine
                    .state
                    .insert(facility.id, Arc::new(RwLock::new(FacilityState::new(facility))));
                continue;
            }
            let Some(entry) = engine.state.get(&event.facility_id()) else {
                tracing::warn!("replay: event for unknown facility {}", event.facility_id());
                continue;
            };
            let fs = entry.clone();
            drop(entry);
            let Ok(mut guard) = fs.try_write() else {
                return Err(io::Error::other("replay: facility state contended"));
            };
            apply_to_facility(&mut guard, event, &engine.entity_to_facility);
        }

        Ok(engine)
    }

    pub fn rules(&self) -> &BookingRules {
        &self.config.rules
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_facility(&self, id: &Ulid) -> Option<SharedFacilityState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_facility_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_facility.get(entity_id).map(|e| *e.value())
    }

    /// Reserve `id` for a new entity of `facility_id`. Fails while any other
    /// entity (or an in-flight creation) holds the same id.
    pub(super) fn claim_entity(&self, id: Ulid, facility_id: Ulid) -> Result<EntityClaim<'_>, EngineError> {
        match self.entity_to_facility.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(facility_id);
                Ok(EntityClaim {
                    index: &self.entity_to_facility,
                    id,
                    committed: false,
                })
            }
        }
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        fs: &mut FacilityState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_facility(fs, event, &self.entity_to_facility);
        self.notify.send(event.facility_id(), event);
        Ok(())
    }

    /// Take a facility's write lock, the serialization point for every
    /// check-then-write sequence on that facility.
    pub(super) async fn lock_facility(
        &self,
        facility_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<FacilityState>, EngineError> {
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        tokio::time::timeout(self.config.lock_timeout, fs.write_owned())
            .await
            .map_err(|_| {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::Concurrency(facility_id)
            })
    }

    /// Lookup entity → facility, then acquire its write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<FacilityState>), EngineError> {
        let facility_id = self
            .get_facility_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let guard = self.lock_facility(facility_id).await?;
        Ok((facility_id, guard))
    }
}
