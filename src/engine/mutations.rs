use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{validate_booking, validate_span};
use super::error::Rejection;
use super::lifecycle::{check_cancel, check_transition, due_transition, is_overdue, payment_deadline, Actor};
use super::pricing::{compose_price, duration_hours, resolve_addons};
use super::{Engine, EngineError, WalCommand};

/// A user's request to book one facility window.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub user_id: String,
    pub span: Span,
    pub addon_ids: Vec<Ulid>,
    /// Where the confirmation goes; carried on the notice only.
    pub contact: Option<String>,
}

impl ReservationRequest {
    fn check_limits(&self) -> Result<(), EngineError> {
        if self.user_id.is_empty() || self.user_id.len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("user id length"));
        }
        if self.contact.as_ref().is_some_and(|c| c.len() > MAX_CONTACT_LEN) {
            return Err(EngineError::LimitExceeded("contact too long"));
        }
        if self.addon_ids.len() > MAX_ADDONS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many add-ons"));
        }
        validate_span(&self.span)
    }
}

fn check_price(what: &str, amount: Decimal, ceiling: Decimal) -> Result<(), EngineError> {
    if amount.is_sign_negative() {
        return Err(EngineError::Configuration(format!("{what} {amount} is negative")));
    }
    if amount > ceiling {
        return Err(EngineError::ceiling(what, amount, ceiling));
    }
    Ok(())
}

impl Engine {
    // ── Facilities ───────────────────────────────────────────

    pub async fn create_facility(
        &self,
        id: Ulid,
        name: String,
        hourly_rate: Decimal,
        capacity: u32,
        category: Option<String>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_FACILITIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many facilities"));
        }
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("facility name length"));
        }
        if category.as_ref().is_some_and(|c| c.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("category too long"));
        }
        check_price("hourly rate", hourly_rate, self.config.pricing.max_hourly_rate)?;

        let facility = Facility {
            id,
            name: name.clone(),
            hourly_rate,
            capacity,
            category: category.clone(),
            active: true,
            closure: None,
        };
        // Published write-locked: nothing books against it before the WAL has the record.
        let shared = Arc::new(RwLock::new(FacilityState::new(facility)));
        let Ok(guard) = shared.clone().try_write_owned() else {
            return Err(EngineError::Concurrency(id));
        };
        match self.state.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }

        let event = Event::FacilityCreated {
            id,
            name,
            hourly_rate,
            capacity,
            category,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.state.remove(&id);
            return Err(e);
        }
        drop(guard);
        self.notify.send(id, &event);
        info!(facility = %id, "facility created");
        Ok(())
    }

    /// Stop accepting bookings. Existing reservations are untouched.
    pub async fn deactivate_facility(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.lock_facility(id).await?;
        if !guard.facility.active {
            return Ok(());
        }
        self.persist_and_apply(&mut guard, &Event::FacilityDeactivated { id })
            .await
    }

    /// Temporarily close for maintenance; `until` is inclusive, `None` means open-ended.
    pub async fn close_facility(
        &self,
        id: Ulid,
        reason: String,
        until: Option<chrono::NaiveDate>,
    ) -> Result<(), EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("closure reason too long"));
        }
        let mut guard = self.lock_facility(id).await?;
        let event = Event::FacilityClosed { id, reason, until };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn reopen_facility(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.lock_facility(id).await?;
        if guard.facility.closure.is_none() {
            return Ok(());
        }
        self.persist_and_apply(&mut guard, &Event::FacilityReopened { id })
            .await
    }

    // ── Pricing options ──────────────────────────────────────

    pub async fn add_pricing_option(
        &self,
        id: Ulid,
        facility_id: Ulid,
        name: String,
        price: Decimal,
        sort_order: i32,
    ) -> Result<(), EngineError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("pricing option name length"));
        }
        check_price("add-on price", price, self.config.pricing.max_total)?;
        let claim = self.claim_entity(id, facility_id)?;
        let mut guard = self.lock_facility(facility_id).await?;
        if guard.pricing_options.len() >= MAX_PRICING_OPTIONS_PER_FACILITY {
            return Err(EngineError::LimitExceeded("too many pricing options on facility"));
        }
        let event = Event::PricingOptionAdded {
            id,
            facility_id,
            name,
            price,
            sort_order,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.commit();
        Ok(())
    }

    /// Retired options stay attached to past reservations but can't be selected.
    pub async fn retire_pricing_option(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (facility_id, mut guard) = self.resolve_entity_write(&id).await?;
        let Some(option) = guard.pricing_options.iter().find(|o| o.id == id) else {
            return Err(EngineError::NotFound(id));
        };
        if option.active {
            let event = Event::PricingOptionRetired { id, facility_id };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        Ok(facility_id)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Validate, price and record a reservation as one step under the
    /// facility's write lock, so two overlapping requests can never both
    /// pass the conflict check.
    pub async fn create_reservation(
        &self,
        req: ReservationRequest,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let result = self.create_reservation_locked(req, now).await;
        match &result {
            Ok(r) => {
                metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
                info!(reservation = %r.id, facility = %r.facility_id, "reservation created");
            }
            Err(e) => {
                let reason = observability::rejection_label(e);
                metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => reason)
                    .increment(1);
                debug!("booking refused: {e}");
            }
        }
        result
    }

    async fn create_reservation_locked(
        &self,
        req: ReservationRequest,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        req.check_limits()?;
        let claim = self.claim_entity(req.id, req.facility_id)?;

        let mut guard = self.lock_facility(req.facility_id).await?;
        if guard.active_count() >= MAX_RESERVATIONS_PER_FACILITY {
            return Err(EngineError::LimitExceeded("too many reservations on facility"));
        }

        let nearby = guard.active_in(&req.span);
        let mut reasons = validate_booking(&guard.facility, self.rules(), &req.span, &nearby, now)
            .reasons()
            .to_vec();
        let addons = match resolve_addons(req.facility_id, &guard.pricing_options, &req.addon_ids) {
            Ok(addons) => addons,
            Err(EngineError::Rejected(more)) => {
                reasons.extend(more);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if !reasons.is_empty() {
            return Err(EngineError::Rejected(reasons));
        }

        let quote = compose_price(
            duration_hours(&req.span),
            guard.facility.hourly_rate,
            &addons,
            &self.config.pricing,
        )?;
        let addon_ids: Vec<Ulid> = addons.iter().map(|o| o.id).collect();

        let event = Event::ReservationCreated {
            id: req.id,
            facility_id: req.facility_id,
            user_id: req.user_id.clone(),
            span: req.span,
            total_amount: quote.total,
            payment_deadline: payment_deadline(self.rules(), now, &req.span),
            addon_ids,
            created_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.commit();

        let reservation = guard
            .reservation(req.id)
            .cloned()
            .ok_or(EngineError::NotFound(req.id))?;
        self.notify.send_notice(ReservationNotice {
            reservation_id: reservation.id,
            facility_name: guard.facility.name.clone(),
            span: reservation.span,
            total_amount: reservation.total_amount,
            user_id: req.user_id,
            contact: req.contact,
        });
        Ok(reservation)
    }

    pub async fn cancel_reservation(&self, id: Ulid, actor: &Actor) -> Result<Reservation, EngineError> {
        self.transition(id, ReservationStatus::Cancelled, |r| check_cancel(r, actor))
            .await
    }

    /// Uploaded proof keeps a pending reservation from expiring until an
    /// administrator verifies or rejects it.
    pub async fn record_payment_proof(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (facility_id, mut guard) = self.resolve_entity_write(&id).await?;
        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        check_transition(r, ReservationStatus::Confirmed)?;
        if !r.payment_proof {
            let event = Event::PaymentProofRecorded { id, facility_id };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Administrator rejects uploaded proof; the payment deadline applies again.
    pub async fn reject_payment_proof(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (facility_id, mut guard) = self.resolve_entity_write(&id).await?;
        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        if r.payment_proof && r.payment_status == PaymentStatus::Pending {
            let event = Event::PaymentProofRejected { id, facility_id };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Administrator verifies payment: pending becomes confirmed.
    pub async fn verify_payment(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (facility_id, mut guard) = self.resolve_entity_write(&id).await?;
        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        check_transition(r, ReservationStatus::Confirmed)?;
        let event = Event::PaymentVerified { id, facility_id };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    async fn transition(
        &self,
        id: Ulid,
        to: ReservationStatus,
        check: impl FnOnce(&Reservation) -> Result<(), EngineError>,
    ) -> Result<Reservation, EngineError> {
        let (facility_id, mut guard) = self.resolve_entity_write(&id).await?;
        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        check(r)?;
        let event = Event::ReservationStatusChanged {
            id,
            facility_id,
            status: to,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── Clock-driven transitions ─────────────────────────────

    /// Expire one reservation if it is still overdue at `now`. Idempotent:
    /// returns `false` when there is nothing to do (already expired, paid,
    /// cancelled, proof uploaded, or deadline not reached).
    pub async fn expire_reservation(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let (facility_id, mut guard) = self.resolve_entity_write(&id).await?;
        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        if !is_overdue(r, now) {
            return Ok(false);
        }
        let event = Event::ReservationStatusChanged {
            id,
            facility_id,
            status: ReservationStatus::Expired,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    /// Apply whatever the clock says is due for `id` at `now`: expiry,
    /// start of use, or completion. Re-checked under the lock.
    pub async fn apply_due_transition(
        &self,
        id: Ulid,
        now: Ms,
    ) -> Result<Option<ReservationStatus>, EngineError> {
        let (facility_id, mut guard) = self.resolve_entity_write(&id).await?;
        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        let Some(status) = due_transition(r, now) else {
            return Ok(None);
        };
        let event = Event::ReservationStatusChanged {
            id,
            facility_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        if status == ReservationStatus::Expired {
            metrics::counter!(observability::RESERVATIONS_EXPIRED_TOTAL).increment(1);
        }
        Ok(Some(status))
    }

    /// Reservations with a clock-driven transition due at `now`.
    /// Facilities that are locked right now are skipped until the next sweep.
    pub fn collect_due_transitions(&self, now: Ms) -> Vec<Ulid> {
        let mut due = Vec::new();
        for entry in self.state.iter() {
            let fs = entry.value().clone();
            if let Ok(guard) = fs.try_read() {
                due.extend(
                    guard
                        .reservations
                        .iter()
                        .filter(|r| due_transition(r, now).is_some())
                        .map(|r| r.id),
                );
            }
        }
        due
    }

    // ── Waitlist ─────────────────────────────────────────────

    pub async fn join_waitlist(
        &self,
        id: Ulid,
        facility_id: Ulid,
        user_id: String,
        span: Span,
        now: Ms,
    ) -> Result<(), EngineError> {
        if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("user id length"));
        }
        validate_span(&span)?;
        if !span.is_well_formed() {
            return Err(EngineError::Rejected(vec![Rejection::EndBeforeStart]));
        }
        let claim = self.claim_entity(id, facility_id)?;
        let mut guard = self.lock_facility(facility_id).await?;
        if guard.waitlist.len() >= MAX_WAITLIST_PER_FACILITY {
            return Err(EngineError::LimitExceeded("waitlist full"));
        }
        let event = Event::WaitlistJoined {
            id,
            facility_id,
            user_id,
            span,
            created_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.commit();
        Ok(())
    }

    pub async fn leave_waitlist(&self, id: Ulid, actor: &Actor) -> Result<Ulid, EngineError> {
        let (facility_id, mut guard) = self.resolve_entity_write(&id).await?;
        let entry = guard
            .waitlist
            .iter()
            .find(|w| w.id == id)
            .ok_or(EngineError::NotFound(id))?;
        if let Actor::User(user_id) = actor
            && *user_id != entry.user_id
        {
            return Err(EngineError::NotOwner(id));
        }
        let event = Event::WaitlistLeft { id, facility_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(facility_id)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event sequence that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let facilities: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for fs in facilities {
            let guard = fs.read().await;
            snapshot_facility(&guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn snapshot_facility(fs: &FacilityState, events: &mut Vec<Event>) {
    let f = &fs.facility;
    events.push(Event::FacilityCreated {
        id: f.id,
        name: f.name.clone(),
        hourly_rate: f.hourly_rate,
        capacity: f.capacity,
        category: f.category.clone(),
    });
    if !f.active {
        events.push(Event::FacilityDeactivated { id: f.id });
    }
    if let Some(closure) = &f.closure {
        events.push(Event::FacilityClosed {
            id: f.id,
            reason: closure.reason.clone(),
            until: closure.until,
        });
    }

    for o in &fs.pricing_options {
        events.push(Event::PricingOptionAdded {
            id: o.id,
            facility_id: f.id,
            name: o.name.clone(),
            price: o.price,
            sort_order: o.sort_order,
        });
        if !o.active {
            events.push(Event::PricingOptionRetired { id: o.id, facility_id: f.id });
        }
    }

    for r in &fs.reservations {
        let (id, facility_id) = (r.id, f.id);
        events.push(Event::ReservationCreated {
            id,
            facility_id,
            user_id: r.user_id.clone(),
            span: r.span,
            total_amount: r.total_amount,
            payment_deadline: r.payment_deadline,
            addon_ids: r.addon_ids.clone(),
            created_at: r.created_at,
        });
        if r.payment_proof {
            events.push(Event::PaymentProofRecorded { id, facility_id });
        }
        let replayed_status = if r.payment_status == PaymentStatus::Paid {
            events.push(Event::PaymentVerified { id, facility_id });
            ReservationStatus::Confirmed
        } else {
            ReservationStatus::Pending
        };
        if r.status != replayed_status {
            events.push(Event::ReservationStatusChanged {
                id,
                facility_id,
                status: r.status,
            });
        }
    }

    for w in &fs.waitlist {
        events.push(Event::WaitlistJoined {
            id: w.id,
            facility_id: f.id,
            user_id: w.user_id.clone(),
            span: w.span,
            created_at: w.created_at,
        });
    }
}
