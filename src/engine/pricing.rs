use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

use super::error::Rejection;
use super::EngineError;

/// Sanity ceilings catching data-entry mistakes upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingLimits {
    pub max_hourly_rate: Decimal,
    pub max_total: Decimal,
}

impl Default for PricingLimits {
    fn default() -> Self {
        Self {
            max_hourly_rate: Decimal::from(100_000),
            max_total: Decimal::from(1_000_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineKind {
    Facility,
    Addon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub kind: LineKind,
    pub label: String,
    pub amount: Decimal,
}

/// Cost of a booking. Amounts are kept at full precision; round only for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub facility_cost: Decimal,
    pub addon_cost: Decimal,
    pub total: Decimal,
    pub breakdown: Vec<LineItem>,
}

impl PriceQuote {
    /// Total to two decimal places.
    pub fn display_total(&self) -> Decimal {
        self.total.round_dp(2)
    }
}

pub fn duration_hours(span: &Span) -> Decimal {
    Decimal::from(span.duration_ms()) / Decimal::from(HOUR_MS)
}

/// Pick the selected add-ons out of a facility's options.
///
/// Every id must name an active option owned by `facility_id`; all offending
/// ids are reported together. Repeated ids count once.
pub fn resolve_addons<'a>(
    facility_id: Ulid,
    options: &'a [PricingOption],
    selected: &[Ulid],
) -> Result<Vec<&'a PricingOption>, EngineError> {
    let mut chosen: Vec<&PricingOption> = Vec::with_capacity(selected.len());
    let mut reasons = Vec::new();
    for id in selected {
        if chosen.iter().any(|o| o.id == *id) {
            continue;
        }
        match options.iter().find(|o| o.id == *id && o.facility_id == facility_id) {
            None => reasons.push(Rejection::UnknownAddon(*id)),
            Some(o) if !o.active => reasons.push(Rejection::InactiveAddon(*id)),
            Some(o) => chosen.push(o),
        }
    }
    if reasons.is_empty() {
        Ok(chosen)
    } else {
        Err(EngineError::Rejected(reasons))
    }
}

/// `facility_cost = hours * rate`, plus each add-on's flat price once.
/// A duration that isn't positive is refused like an inverted window.
pub fn compose_price(
    duration_hours: Decimal,
    hourly_rate: Decimal,
    addons: &[&PricingOption],
    limits: &PricingLimits,
) -> Result<PriceQuote, EngineError> {
    if duration_hours <= Decimal::ZERO {
        return Err(EngineError::Rejected(vec![Rejection::EndBeforeStart]));
    }
    if hourly_rate.is_sign_negative() {
        return Err(EngineError::Configuration(format!("hourly rate {hourly_rate} is negative")));
    }
    if hourly_rate > limits.max_hourly_rate {
        return Err(EngineError::ceiling("hourly rate", hourly_rate, limits.max_hourly_rate));
    }

    let facility_cost = duration_hours
        .checked_mul(hourly_rate)
        .ok_or_else(|| EngineError::Configuration("facility cost overflow".into()))?;

    let mut breakdown = Vec::with_capacity(addons.len() + 1);
    breakdown.push(LineItem {
        kind: LineKind::Facility,
        label: format!("Facility ({} h x {})", duration_hours.normalize(), hourly_rate.normalize()),
        amount: facility_cost,
    });

    let mut addon_cost = Decimal::ZERO;
    for addon in addons {
        if addon.price.is_sign_negative() {
            return Err(EngineError::Configuration(format!(
                "pricing option {} has negative price {}",
                addon.id, addon.price
            )));
        }
        addon_cost += addon.price;
        breakdown.push(LineItem {
            kind: LineKind::Addon,
            label: addon.name.clone(),
            amount: addon.price,
        });
    }

    let total = facility_cost + addon_cost;
    if total > limits.max_total {
        return Err(EngineError::ceiling("total", total, limits.max_total));
    }

    Ok(PriceQuote {
        facility_cost,
        addon_cost,
        total,
        breakdown,
    })
}
