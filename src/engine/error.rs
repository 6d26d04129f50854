use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::{Ms, ReservationStatus, Span};

/// One reason a booking request was turned down. Rendered verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    EndBeforeStart,
    InPast,
    /// Same-day start not after `now + buffer`.
    TooSoon { buffer_ms: Ms },
    AlreadyElapsed,
    OutsideOperatingHours { open: String, last_end: String },
    TooShort { min_ms: Ms },
    TooLong { max_ms: Ms },
    FacilityInactive,
    FacilityClosed { reason: String, until: Option<NaiveDate> },
    /// Overlaps active reservations; `labels` are the rendered windows.
    Conflict { windows: Vec<Span>, labels: Vec<String> },
    UnknownAddon(Ulid),
    InactiveAddon(Ulid),
}

impl Rejection {
    /// Short stable tag for metrics labels and wire rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::EndBeforeStart => "end_before_start",
            Rejection::InPast => "in_past",
            Rejection::TooSoon { .. } => "too_soon",
            Rejection::AlreadyElapsed => "already_elapsed",
            Rejection::OutsideOperatingHours { .. } => "outside_operating_hours",
            Rejection::TooShort { .. } => "too_short",
            Rejection::TooLong { .. } => "too_long",
            Rejection::FacilityInactive => "facility_inactive",
            Rejection::FacilityClosed { .. } => "facility_closed",
            Rejection::Conflict { .. } => "conflict",
            Rejection::UnknownAddon(_) => "unknown_addon",
            Rejection::InactiveAddon(_) => "inactive_addon",
        }
    }
}

fn minutes(ms: Ms) -> String {
    let mins = ms / 60_000;
    match (mins / 60, mins % 60) {
        (0, m) => format!("{m} minutes"),
        (h, 0) => format!("{h} hours"),
        (h, m) => format!("{h} hours {m} minutes"),
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::EndBeforeStart => write!(f, "end time must be after start time"),
            Rejection::InPast => write!(f, "cannot book a date in the past"),
            Rejection::TooSoon { buffer_ms } => write!(
                f,
                "start time has passed or is too soon; book at least {} ahead",
                minutes(*buffer_ms)
            ),
            Rejection::AlreadyElapsed => write!(f, "the selected time window has already elapsed"),
            Rejection::OutsideOperatingHours { open, last_end } => {
                write!(f, "bookings must fall between {open} and {last_end}")
            }
            Rejection::TooShort { min_ms } => {
                write!(f, "minimum booking duration is {}", minutes(*min_ms))
            }
            Rejection::TooLong { max_ms } => {
                write!(f, "maximum booking duration is {}", minutes(*max_ms))
            }
            Rejection::FacilityInactive => write!(f, "facility is not accepting bookings"),
            Rejection::FacilityClosed { reason, until } => match until {
                Some(date) => write!(f, "facility closed: {reason} (until {date})"),
                None => write!(f, "facility closed: {reason}"),
            },
            Rejection::Conflict { labels, .. } => {
                write!(f, "time slot conflicts with existing reservations: {}", labels.join(", "))
            }
            Rejection::UnknownAddon(id) => write!(f, "pricing option {id} does not belong to this facility"),
            Rejection::InactiveAddon(id) => write!(f, "pricing option {id} is not available"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Fix-your-input failures; every applicable reason is listed.
    Rejected(Vec<Rejection>),
    /// Upstream data outside sanity bounds (rates, totals).
    Configuration(String),
    /// Could not obtain the facility's booking lock in time. Retry with fresh data.
    Concurrency(Ulid),
    IllegalTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    NotOwner(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Conflicting windows, when this rejection includes an overlap.
    pub fn conflicts(&self) -> &[Span] {
        match self {
            EngineError::Rejected(reasons) => reasons
                .iter()
                .find_map(|r| match r {
                    Rejection::Conflict { windows, .. } => Some(windows.as_slice()),
                    _ => None,
                })
                .unwrap_or(&[]),
            _ => &[],
        }
    }

    pub fn is_conflict(&self) -> bool {
        !self.conflicts().is_empty()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Concurrency(_))
    }

    pub(crate) fn ceiling(what: &str, value: Decimal, ceiling: Decimal) -> Self {
        EngineError::Configuration(format!("{what} {value} exceeds sanity ceiling {ceiling}"))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Rejected(reasons) => {
                let msgs: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
                write!(f, "booking rejected: {}", msgs.join("; "))
            }
            EngineError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            EngineError::Concurrency(id) => {
                write!(f, "facility {id} is busy; retry the booking")
            }
            EngineError::IllegalTransition { id, from, to } => {
                write!(f, "reservation {id} cannot move from {from} to {to}")
            }
            EngineError::NotOwner(id) => write!(f, "reservation {id} belongs to another user"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_render_readably() {
        assert_eq!(Rejection::TooShort { min_ms: 30 * 60_000 }.to_string(), "minimum booking duration is 30 minutes");
        assert_eq!(
            Rejection::TooLong { max_ms: 810 * 60_000 }.to_string(),
            "maximum booking duration is 13 hours 30 minutes"
        );
        assert_eq!(
            Rejection::TooSoon { buffer_ms: 15 * 60_000 }.to_string(),
            "start time has passed or is too soon; book at least 15 minutes ahead"
        );
    }

    #[test]
    fn conflict_exposes_windows() {
        let err = EngineError::Rejected(vec![
            Rejection::TooShort { min_ms: 1 },
            Rejection::Conflict {
                windows: vec![Span::new(10, 20)],
                labels: vec!["10:00 AM - 11:00 AM".into()],
            },
        ]);
        assert!(err.is_conflict());
        assert_eq!(err.conflicts(), &[Span::new(10, 20)]);
        assert!(err.to_string().contains("10:00 AM - 11:00 AM"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn concurrency_is_retryable() {
        assert!(EngineError::Concurrency(Ulid::new()).is_retryable());
        assert!(!EngineError::Configuration("x".into()).is_conflict());
    }
}
