use chrono::NaiveDate;
use serde::Serialize;

use crate::model::*;
use crate::rules::BookingRules;

// ── Availability Algorithm ────────────────────────────────────────

/// Free time for one facility on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    /// `[open, last_end)` for the date.
    pub operating: Span,
    /// Maximal free ranges inside `operating`, sorted and disjoint.
    pub free: Vec<Span>,
    /// Active reservations clamped to `operating`, merged.
    pub booked: Vec<Span>,
    pub fully_booked: bool,
    /// Booked share of operating hours, one decimal place.
    pub utilization_percent: f64,
    /// A closure covers this date; nothing is bookable.
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    Available,
    Booked,
}

impl SlotState {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotState::Available => "available",
            SlotState::Booked => "booked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub span: Span,
    pub state: SlotState,
}

/// Compute the free ranges of `facility` on `date`.
///
/// Starts from the operating window and subtracts every active reservation.
/// Reservations on other facilities or in inactive states are ignored, so the
/// caller may pass an unfiltered list.
pub fn free_windows(
    facility: &Facility,
    rules: &BookingRules,
    reservations: &[Reservation],
    date: NaiveDate,
) -> DayAvailability {
    let operating = rules.operating_window(date);

    let mut booked: Vec<Span> = reservations
        .iter()
        .filter(|r| r.facility_id == facility.id && r.is_active())
        .filter_map(|r| r.span.clamp_to(&operating))
        .collect();
    booked.sort_by_key(|s| s.start);
    let booked = merge_overlapping(&booked);

    let closed = facility
        .closure
        .as_ref()
        .is_some_and(|c| c.covers(date));

    let free = if closed {
        Vec::new()
    } else {
        subtract_intervals(&[operating], &booked)
    };

    // A single reservation running from before open to after last end is
    // also treated as a full day, even though clamping already empties `free`.
    let spans_whole_day = reservations.iter().any(|r| {
        r.facility_id == facility.id
            && r.is_active()
            && r.span.start < operating.start
            && r.span.end > operating.end
    });
    let fully_booked = !closed && (free.is_empty() || spans_whole_day);

    let booked_ms: Ms = booked.iter().map(Span::duration_ms).sum();
    let utilization_percent = round1(booked_ms as f64 / operating.duration_ms() as f64 * 100.0);

    DayAvailability {
        date,
        operating,
        free,
        booked,
        fully_booked,
        utilization_percent,
        closed,
    }
}

/// Fixed-size slot view derived from the merged free ranges. A slot is
/// available only if it lies entirely inside one free range. The last slot
/// is truncated at the end of the operating window.
pub fn slot_grid(day: &DayAvailability, slot_ms: Ms) -> Vec<Slot> {
    let mut slots = Vec::new();
    if slot_ms <= 0 {
        return slots;
    }
    let mut fi = 0;
    let mut t = day.operating.start;
    while t < day.operating.end {
        let span = Span::new(t, (t + slot_ms).min(day.operating.end));
        while fi < day.free.len() && day.free[fi].end <= span.start {
            fi += 1;
        }
        let available = day
            .free
            .get(fi)
            .is_some_and(|free| free.contains_span(&span));
        slots.push(Slot {
            span,
            state: if available {
                SlotState::Available
            } else {
                SlotState::Booked
            },
        });
        t = span.end;
    }
    slots
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `base` disjoint.
/// Never yields zero-width pieces.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = to_remove[j];
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;
    use rust_decimal::Decimal;
    use ulid::Ulid;

    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    fn at(rules: &BookingRules, h: u32, m: u32) -> Ms {
        rules.at(day(), NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn facility() -> Facility {
        Facility {
            id: Ulid::new(),
            name: "Hall".into(),
            hourly_rate: Decimal::from(300),
            capacity: 50,
            category: Some("hall".into()),
            active: true,
            closure: None,
        }
    }

    fn reservation(f: &Facility, start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            facility_id: f.id,
            user_id: "carol".into(),
            span: Span { start, end },
            status,
            total_amount: Decimal::ZERO,
            payment_status: PaymentStatus::Pending,
            payment_deadline: start,
            payment_proof: false,
            addon_ids: vec![],
            created_at: 0,
        }
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let result = subtract_intervals(&[Span::new(100, 200)], &[Span::new(50, 250)]);
        assert!(result.is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let result = subtract_intervals(&[Span::new(100, 300)], &[Span::new(150, 200)]);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_back_to_back_leaves_no_gap() {
        let result = subtract_intervals(
            &[Span::new(0, 1000)],
            &[Span::new(0, 200), Span::new(200, 400)],
        );
        assert_eq!(result, vec![Span::new(400, 1000)]);
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    // ── free_windows ─────────────────────────────────────

    #[test]
    fn empty_day_is_all_free() {
        let rules = BookingRules::default();
        let f = facility();
        let day_av = free_windows(&f, &rules, &[], day());
        assert_eq!(day_av.free, vec![Span::new(at(&rules, 8, 0), at(&rules, 21, 30))]);
        assert!(!day_av.fully_booked);
        assert_eq!(day_av.utilization_percent, 0.0);
    }

    #[test]
    fn whole_window_reservation_fully_books() {
        let rules = BookingRules::default();
        let f = facility();
        let r = reservation(&f, at(&rules, 8, 0), at(&rules, 21, 30), ReservationStatus::Confirmed);
        let day_av = free_windows(&f, &rules, &[r], day());
        assert!(day_av.free.is_empty());
        assert!(day_av.fully_booked);
        assert_eq!(day_av.utilization_percent, 100.0);
    }

    #[test]
    fn ending_at_last_end_alone_is_not_full() {
        let rules = BookingRules::default();
        let f = facility();
        let r = reservation(&f, at(&rules, 18, 0), at(&rules, 21, 30), ReservationStatus::Pending);
        let day_av = free_windows(&f, &rules, &[r], day());
        assert!(!day_av.fully_booked);
        assert_eq!(day_av.free, vec![Span::new(at(&rules, 8, 0), at(&rules, 18, 0))]);
    }

    #[test]
    fn spanning_reservation_fully_books() {
        let rules = BookingRules::default();
        let f = facility();
        let r = reservation(&f, at(&rules, 7, 0), at(&rules, 22, 0), ReservationStatus::InUse);
        let day_av = free_windows(&f, &rules, &[r], day());
        assert!(day_av.fully_booked);
        assert_eq!(day_av.booked, vec![day_av.operating]);
    }

    #[test]
    fn back_to_back_reservations_leave_no_phantom_gap() {
        let rules = BookingRules::default();
        let f = facility();
        let rs = vec![
            reservation(&f, at(&rules, 10, 0), at(&rules, 12, 0), ReservationStatus::Confirmed),
            reservation(&f, at(&rules, 8, 0), at(&rules, 10, 0), ReservationStatus::Pending),
        ];
        let day_av = free_windows(&f, &rules, &rs, day());
        assert_eq!(day_av.free, vec![Span::new(at(&rules, 12, 0), at(&rules, 21, 30))]);
        assert_eq!(day_av.booked, vec![Span::new(at(&rules, 8, 0), at(&rules, 12, 0))]);
    }

    #[test]
    fn contiguous_reservations_fill_the_day() {
        let rules = BookingRules::default();
        let f = facility();
        let rs = vec![
            reservation(&f, at(&rules, 8, 0), at(&rules, 12, 0), ReservationStatus::Confirmed),
            reservation(&f, at(&rules, 12, 0), at(&rules, 17, 0), ReservationStatus::Confirmed),
            reservation(&f, at(&rules, 17, 0), at(&rules, 21, 30), ReservationStatus::Pending),
        ];
        let day_av = free_windows(&f, &rules, &rs, day());
        assert!(day_av.free.is_empty());
        assert!(day_av.fully_booked);
    }

    #[test]
    fn inactive_and_foreign_reservations_ignored() {
        let rules = BookingRules::default();
        let f = facility();
        let other = facility();
        let rs = vec![
            reservation(&f, at(&rules, 9, 0), at(&rules, 10, 0), ReservationStatus::Expired),
            reservation(&f, at(&rules, 10, 0), at(&rules, 11, 0), ReservationStatus::Cancelled),
            reservation(&other, at(&rules, 11, 0), at(&rules, 12, 0), ReservationStatus::Confirmed),
        ];
        let day_av = free_windows(&f, &rules, &rs, day());
        assert_eq!(day_av.free, vec![day_av.operating]);
    }

    #[test]
    fn utilization_rounds_to_one_decimal() {
        let rules = BookingRules::default();
        let f = facility();
        // 1h of 13.5h = 7.407..%
        let r = reservation(&f, at(&rules, 9, 0), at(&rules, 10, 0), ReservationStatus::Confirmed);
        let day_av = free_windows(&f, &rules, &[r], day());
        assert_eq!(day_av.utilization_percent, 7.4);
    }

    #[test]
    fn closed_day_has_no_free_time_and_is_not_fully_booked() {
        let rules = BookingRules::default();
        let mut f = facility();
        f.closure = Some(Closure { reason: "Graduation".into(), until: None });
        let day_av = free_windows(&f, &rules, &[], day());
        assert!(day_av.closed);
        assert!(day_av.free.is_empty());
        assert!(!day_av.fully_booked);
    }

    #[test]
    fn free_ranges_round_trip_to_booked_set() {
        let rules = BookingRules::default();
        let f = facility();
        let rs = vec![
            reservation(&f, at(&rules, 7, 0), at(&rules, 9, 0), ReservationStatus::Confirmed),
            reservation(&f, at(&rules, 11, 0), at(&rules, 12, 30), ReservationStatus::Pending),
            reservation(&f, at(&rules, 12, 30), at(&rules, 13, 0), ReservationStatus::InUse),
            reservation(&f, at(&rules, 20, 0), at(&rules, 21, 30), ReservationStatus::Confirmed),
        ];
        let day_av = free_windows(&f, &rules, &rs, day());

        let complement = subtract_intervals(&[day_av.operating], &day_av.free);
        assert_eq!(complement, day_av.booked);

        let mut reintersected: Vec<Span> = rs
            .iter()
            .filter_map(|r| r.span.clamp_to(&day_av.operating))
            .flat_map(|s| complement.iter().filter_map(move |c| s.clamp_to(c)))
            .collect();
        reintersected.sort_by_key(|s| s.start);
        assert_eq!(merge_overlapping(&reintersected), day_av.booked);
    }

    // ── slot_grid ────────────────────────────────────────

    #[test]
    fn slot_grid_marks_booked_slots() {
        let rules = BookingRules::default();
        let f = facility();
        let r = reservation(&f, at(&rules, 9, 0), at(&rules, 10, 15), ReservationStatus::Confirmed);
        let day_av = free_windows(&f, &rules, &[r], day());
        let grid = slot_grid(&day_av, rules.slot_ms);

        assert_eq!(grid.len(), 27);
        let booked: Vec<Span> = grid
            .iter()
            .filter(|s| s.state == SlotState::Booked)
            .map(|s| s.span)
            .collect();
        // 09:00, 09:30, 10:00 (partially covered)
        assert_eq!(booked.len(), 3);
        assert_eq!(booked[0].start, at(&rules, 9, 0));
        assert_eq!(booked[2].start, at(&rules, 10, 0));
    }

    #[test]
    fn slot_grid_all_available_on_empty_day() {
        let rules = BookingRules::default();
        let f = facility();
        let day_av = free_windows(&f, &rules, &[], day());
        let grid = slot_grid(&day_av, rules.slot_ms);
        assert!(grid.iter().all(|s| s.state == SlotState::Available));
        assert_eq!(grid.first().unwrap().span.start, at(&rules, 8, 0));
        assert_eq!(grid.last().unwrap().span.end, at(&rules, 21, 30));
    }

    #[test]
    fn slot_grid_truncates_last_slot() {
        let rules = BookingRules {
            last_end: NaiveTime::from_hms_opt(21, 45, 0).unwrap(),
            ..BookingRules::default()
        };
        let f = facility();
        let day_av = free_windows(&f, &rules, &[], day());
        let grid = slot_grid(&day_av, rules.slot_ms);
        assert_eq!(grid.last().unwrap().span.duration_ms(), 15 * MINUTE_MS);
    }
}
