use crate::model::*;
use crate::rules::BookingRules;

use super::error::Rejection;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Hard bounds on timestamps accepted from callers, independent of policy.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.end - span.start > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Vec<Rejection>),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accept)
    }

    pub fn reasons(&self) -> &[Rejection] {
        match self {
            Verdict::Accept => &[],
            Verdict::Reject(reasons) => reasons,
        }
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        match self {
            Verdict::Accept => Ok(()),
            Verdict::Reject(reasons) => Err(EngineError::Rejected(reasons)),
        }
    }
}

/// Decide whether `candidate` may be booked on `facility`.
///
/// Pure: the only reservation data consulted is `reservations`, and `now`
/// is supplied by the caller. Every applicable reason is collected, in a
/// fixed order, so callers can show a complete error list.
pub fn validate_booking(
    facility: &Facility,
    rules: &BookingRules,
    candidate: &Span,
    reservations: &[Reservation],
    now: Ms,
) -> Verdict {
    let mut reasons = Vec::new();
    let well_formed = candidate.is_well_formed();

    if !well_formed {
        reasons.push(Rejection::EndBeforeStart);
    }

    let date = rules.local_date(candidate.start);
    let today = rules.local_date(now);
    if date < today {
        reasons.push(Rejection::InPast);
    } else if date == today {
        // Both may fire together.
        if candidate.start <= now + rules.advance_buffer_ms {
            reasons.push(Rejection::TooSoon {
                buffer_ms: rules.advance_buffer_ms,
            });
        }
        if candidate.end <= now {
            reasons.push(Rejection::AlreadyElapsed);
        }
    }

    let window = rules.operating_window(date);
    if candidate.start < window.start || candidate.end > window.end {
        reasons.push(Rejection::OutsideOperatingHours {
            open: rules.format_time(window.start),
            last_end: rules.format_time(window.end),
        });
    }

    if well_formed {
        let duration = candidate.duration_ms();
        if duration < rules.min_duration_ms {
            reasons.push(Rejection::TooShort {
                min_ms: rules.min_duration_ms,
            });
        }
        if duration > rules.max_duration_ms {
            reasons.push(Rejection::TooLong {
                max_ms: rules.max_duration_ms,
            });
        }
    }

    if !facility.active {
        reasons.push(Rejection::FacilityInactive);
    }
    if let Some(closure) = &facility.closure
        && closure.covers(date)
    {
        reasons.push(Rejection::FacilityClosed {
            reason: closure.reason.clone(),
            until: closure.until,
        });
    }

    if well_formed {
        let mut windows: Vec<Span> = reservations
            .iter()
            .filter(|r| r.facility_id == facility.id && r.is_active())
            .map(|r| r.span)
            .filter(|span| span.overlaps(candidate))
            .collect();
        if !windows.is_empty() {
            windows.sort_by_key(|s| (s.start, s.end));
            windows.dedup();
            let labels = windows.iter().map(|w| rules.format_window(w)).collect();
            reasons.push(Rejection::Conflict { windows, labels });
        }
    }

    if reasons.is_empty() {
        Verdict::Accept
    } else {
        Verdict::Reject(reasons)
    }
}
