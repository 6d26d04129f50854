use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::availability::{free_windows, slot_grid, DayAvailability, Slot};
use super::conflict::{validate_booking, validate_span, Verdict};
use super::pricing::{compose_price, duration_hours, resolve_addons, PriceQuote};
use super::{Engine, EngineError};

/// Everything a calendar view needs for one facility-day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySchedule {
    pub availability: DayAvailability,
    pub slots: Vec<Slot>,
}

impl Engine {
    async fn read_facility<T>(
        &self,
        facility_id: Ulid,
        f: impl FnOnce(&FacilityState) -> T,
    ) -> Result<T, EngineError> {
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = fs.read().await;
        Ok(f(&guard))
    }

    /// Free ranges, slot grid, fully-booked flag and utilization for `date`.
    pub async fn availability(&self, facility_id: Ulid, date: NaiveDate) -> Result<DaySchedule, EngineError> {
        let rules = self.rules();
        let operating = rules.operating_window(date);
        validate_span(&operating)?;
        self.read_facility(facility_id, |fs| {
            let nearby = fs.active_in(&operating);
            let availability = free_windows(&fs.facility, rules, &nearby, date);
            let slots = slot_grid(&availability, rules.slot_ms);
            DaySchedule { availability, slots }
        })
        .await
    }

    /// Dry-run of the booking checks against current state. May be stale by
    /// the time a real booking is attempted.
    pub async fn validate_booking(&self, facility_id: Ulid, window: Span, now: Ms) -> Result<Verdict, EngineError> {
        validate_span(&window)?;
        self.read_facility(facility_id, |fs| {
            let nearby = fs.active_in(&window);
            validate_booking(&fs.facility, self.rules(), &window, &nearby, now)
        })
        .await
    }

    /// Price `duration_hours` at `hourly_rate` with the given add-ons of `facility_id`.
    pub async fn preview_cost(
        &self,
        facility_id: Ulid,
        duration_hours: Decimal,
        hourly_rate: Decimal,
        addon_ids: &[Ulid],
    ) -> Result<PriceQuote, EngineError> {
        self.read_facility(facility_id, |fs| {
            let addons = resolve_addons(facility_id, &fs.pricing_options, addon_ids)?;
            compose_price(duration_hours, hourly_rate, &addons, &self.config.pricing)
        })
        .await?
    }

    /// Price a concrete window at the facility's own rate.
    pub async fn quote(&self, facility_id: Ulid, window: Span, addon_ids: &[Ulid]) -> Result<PriceQuote, EngineError> {
        validate_span(&window)?;
        if !window.is_well_formed() {
            return Err(EngineError::Rejected(vec![super::Rejection::EndBeforeStart]));
        }
        let rate = self.read_facility(facility_id, |fs| fs.facility.hourly_rate).await?;
        self.preview_cost(facility_id, duration_hours(&window), rate, addon_ids)
            .await
    }

    /// Active reservations of a facility overlapping `range`.
    pub async fn active_reservations(&self, facility_id: Ulid, range: Span) -> Result<Vec<Reservation>, EngineError> {
        validate_span(&range)?;
        self.read_facility(facility_id, |fs| fs.active_in(&range)).await
    }

    /// Active add-ons in sort order. Empty means none are configured.
    pub async fn active_pricing_options(&self, facility_id: Ulid) -> Result<Vec<PricingOption>, EngineError> {
        self.read_facility(facility_id, |fs| fs.active_pricing_options().cloned().collect())
            .await
    }

    /// All reservations of a facility, any status, by start time.
    pub async fn reservations_for_facility(&self, facility_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        self.read_facility(facility_id, |fs| fs.reservations.clone()).await
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let facility_id = self
            .get_facility_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        self.read_facility(facility_id, |fs| fs.reservation(id).cloned())
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_facilities(&self) -> Vec<Facility> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut facilities = Vec::with_capacity(handles.len());
        for fs in handles {
            facilities.push(fs.read().await.facility.clone());
        }
        facilities.sort_by_key(|f| f.id);
        facilities
    }

    /// A user's waitlist entries across all facilities, oldest first.
    pub async fn waitlist_for_user(&self, user_id: &str) -> Vec<WaitlistEntry> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut entries = Vec::new();
        for fs in handles {
            let guard = fs.read().await;
            entries.extend(guard.waitlist.iter().filter(|w| w.user_id == user_id).cloned());
        }
        entries.sort_by_key(|w| (w.created_at, w.id));
        entries
    }
}
