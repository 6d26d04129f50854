use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`. This is the time window every overlap
/// and availability computation works on; it is never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Build a well-formed window. Unchecked candidate windows coming from
    /// callers are built with a struct literal and validated instead.
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The part of `self` inside `bounds`, if any.
    pub fn clamp_to(&self, bounds: &Span) -> Option<Span> {
        let start = self.start.max(bounds.start);
        let end = self.end.min(bounds.end);
        (start < end).then(|| Span::new(start, end))
    }
}

// ── Facility ─────────────────────────────────────────────────────

/// A period during which the facility accepts no new reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub reason: String,
    /// Last closed day (inclusive). `None` means closed until reopened.
    pub until: Option<NaiveDate>,
}

impl Closure {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.until.is_none_or(|until| date <= until)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: Ulid,
    pub name: String,
    pub hourly_rate: Decimal,
    pub capacity: u32,
    pub category: Option<String>,
    pub active: bool,
    pub closure: Option<Closure>,
}

/// Flat-fee add-on attachable to a reservation of its facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingOption {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub name: String,
    pub price: Decimal,
    pub active: bool,
    pub sort_order: i32,
}

// ── Reservation ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    InUse,
    Completed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    /// Active reservations still occupy their window.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending | ReservationStatus::Confirmed | ReservationStatus::InUse
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::InUse => "in_use",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub user_id: String,
    pub span: Span,
    pub status: ReservationStatus,
    /// Priced once at creation, rounded to cents.
    pub total_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_deadline: Ms,
    /// An uploaded payment slip awaiting verification.
    pub payment_proof: bool,
    pub addon_ids: Vec<Ulid>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// A user waiting for a window that is currently taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub user_id: String,
    pub span: Span,
    pub created_at: Ms,
}

// ── Per-facility state ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FacilityState {
    pub facility: Facility,
    /// Sorted by `sort_order`, retired options included.
    pub pricing_options: Vec<PricingOption>,
    /// All reservations regardless of status, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    pub waitlist: Vec<WaitlistEntry>,
}

impl FacilityState {
    pub fn new(facility: Facility) -> Self {
        Self {
            facility,
            pricing_options: Vec::new(),
            reservations: Vec::new(),
            waitlist: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations (any status) whose window overlaps the query.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Reservations still holding their window. Terminal history doesn't count.
    pub fn active_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.is_active()).count()
    }

    /// Active reservations overlapping the query, cloned for pure-function use.
    pub fn active_in(&self, query: &Span) -> Vec<Reservation> {
        self.overlapping(query)
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    pub fn insert_pricing_option(&mut self, option: PricingOption) {
        let pos = self
            .pricing_options
            .partition_point(|o| o.sort_order <= option.sort_order);
        self.pricing_options.insert(pos, option);
    }

    pub fn active_pricing_options(&self) -> impl Iterator<Item = &PricingOption> {
        self.pricing_options.iter().filter(|o| o.active)
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    FacilityCreated {
        id: Ulid,
        name: String,
        hourly_rate: Decimal,
        capacity: u32,
        category: Option<String>,
    },
    FacilityDeactivated {
        id: Ulid,
    },
    FacilityClosed {
        id: Ulid,
        reason: String,
        until: Option<NaiveDate>,
    },
    FacilityReopened {
        id: Ulid,
    },
    PricingOptionAdded {
        id: Ulid,
        facility_id: Ulid,
        name: String,
        price: Decimal,
        sort_order: i32,
    },
    PricingOptionRetired {
        id: Ulid,
        facility_id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        facility_id: Ulid,
        user_id: String,
        span: Span,
        total_amount: Decimal,
        payment_deadline: Ms,
        addon_ids: Vec<Ulid>,
        created_at: Ms,
    },
    ReservationStatusChanged {
        id: Ulid,
        facility_id: Ulid,
        status: ReservationStatus,
    },
    PaymentProofRecorded {
        id: Ulid,
        facility_id: Ulid,
    },
    PaymentProofRejected {
        id: Ulid,
        facility_id: Ulid,
    },
    PaymentVerified {
        id: Ulid,
        facility_id: Ulid,
    },
    WaitlistJoined {
        id: Ulid,
        facility_id: Ulid,
        user_id: String,
        span: Span,
        created_at: Ms,
    },
    WaitlistLeft {
        id: Ulid,
        facility_id: Ulid,
    },
}

impl Event {
    /// The facility whose state this event mutates.
    pub fn facility_id(&self) -> Ulid {
        match self {
            Event::FacilityCreated { id, .. }
            | Event::FacilityDeactivated { id }
            | Event::FacilityClosed { id, .. }
            | Event::FacilityReopened { id } => *id,
            Event::PricingOptionAdded { facility_id, .. }
            | Event::PricingOptionRetired { facility_id, .. }
            | Event::ReservationCreated { facility_id, .. }
            | Event::ReservationStatusChanged { facility_id, .. }
            | Event::PaymentProofRecorded { facility_id, .. }
            | Event::PaymentProofRejected { facility_id, .. }
            | Event::PaymentVerified { facility_id, .. }
            | Event::WaitlistJoined { facility_id, .. }
            | Event::WaitlistLeft { facility_id, .. } => *facility_id,
        }
    }
}

/// Read-only snapshot handed to the notification collaborator once per
/// successfully created reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationNotice {
    pub reservation_id: Ulid,
    pub facility_name: String,
    pub span: Span,
    pub total_amount: Decimal,
    pub user_id: String,
    pub contact: Option<String>,
}
