//! Reservation status machine.
//!
//! ```text
//! pending   -> confirmed | cancelled | expired
//! confirmed -> in_use | cancelled | completed
//! in_use    -> completed
//! ```
//! `completed`, `cancelled` and `expired` are terminal.

use crate::model::*;
use crate::rules::BookingRules;

use super::EngineError;

use ReservationStatus::*;

impl ReservationStatus {
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (Pending, Confirmed | Cancelled | Expired)
                | (Confirmed, InUse | Cancelled | Completed)
                | (InUse, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Completed | Cancelled | Expired)
    }
}

/// Who is asking for a user-initiated transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User(String),
    Admin,
}

pub fn check_transition(r: &Reservation, to: ReservationStatus) -> Result<(), EngineError> {
    if r.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::IllegalTransition {
            id: r.id,
            from: r.status,
            to,
        })
    }
}

/// Users may cancel only their own reservations; administrators any.
pub fn check_cancel(r: &Reservation, actor: &Actor) -> Result<(), EngineError> {
    if let Actor::User(user_id) = actor
        && *user_id != r.user_id
    {
        return Err(EngineError::NotOwner(r.id));
    }
    check_transition(r, Cancelled)
}

/// Grace period from creation, but never past the start of the window.
pub fn payment_deadline(rules: &BookingRules, created_at: Ms, span: &Span) -> Ms {
    (created_at + rules.payment_grace_ms).min(span.start)
}

/// Pending, unpaid, no proof uploaded, and past its deadline.
pub fn is_overdue(r: &Reservation, now: Ms) -> bool {
    r.status == Pending
        && r.payment_status == PaymentStatus::Pending
        && !r.payment_proof
        && now >= r.payment_deadline
}

/// The transition the clock alone would apply to `r` at `now`, if any.
pub fn due_transition(r: &Reservation, now: Ms) -> Option<ReservationStatus> {
    match r.status {
        Pending if is_overdue(r, now) => Some(Expired),
        Confirmed if now >= r.span.end => Some(Completed),
        Confirmed if now >= r.span.start => Some(InUse),
        InUse if now >= r.span.end => Some(Completed),
        _ => None,
    }
}
