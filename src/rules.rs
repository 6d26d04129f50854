use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Ms, Span, HOUR_MS, MINUTE_MS};

/// Booking policy for a deployment. Passed into the engine rather than
/// embedded so individual facilities can later carry overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRules {
    /// First bookable instant of the day.
    pub open: NaiveTime,
    /// Closing time of the venue. Informational; bookings end by `last_end`.
    pub close: NaiveTime,
    /// Latest permitted end of any booking.
    pub last_end: NaiveTime,
    pub min_duration_ms: Ms,
    pub max_duration_ms: Ms,
    /// Slot size for the availability grid.
    pub slot_ms: Ms,
    /// Same-day bookings must start strictly after `now + advance_buffer_ms`.
    pub advance_buffer_ms: Ms,
    /// Time an unpaid pending reservation holds its window.
    pub payment_grace_ms: Ms,
    /// Offset of the venue's wall clock from UTC.
    pub utc_offset_secs: i32,
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            open: hm(8, 0),
            close: hm(22, 0),
            last_end: hm(21, 30),
            min_duration_ms: 30 * MINUTE_MS,
            max_duration_ms: 13 * HOUR_MS + 30 * MINUTE_MS,
            slot_ms: 30 * MINUTE_MS,
            advance_buffer_ms: 15 * MINUTE_MS,
            payment_grace_ms: 24 * HOUR_MS,
            utc_offset_secs: 0,
        }
    }
}

impl BookingRules {
    /// Reject policies the engine cannot schedule against.
    pub fn validate(&self) -> Result<(), String> {
        if self.open >= self.last_end {
            return Err(format!("open ({}) must be before last end ({})", self.open, self.last_end));
        }
        if self.last_end > self.close {
            return Err(format!("last end ({}) must not be after close ({})", self.last_end, self.close));
        }
        if self.min_duration_ms <= 0 || self.min_duration_ms > self.max_duration_ms {
            return Err("min duration must be positive and at most max duration".into());
        }
        if self.slot_ms <= 0 {
            return Err("slot size must be positive".into());
        }
        if self.advance_buffer_ms < 0 || self.payment_grace_ms <= 0 {
            return Err("advance buffer must be >= 0 and payment grace > 0".into());
        }
        if self.utc_offset_secs.abs() >= 24 * 3600 {
            return Err("utc offset must be within one day".into());
        }
        Ok(())
    }

    // ── Calendar helpers ─────────────────────────────────────────

    pub fn local_datetime(&self, t: Ms) -> NaiveDateTime {
        let utc = DateTime::<Utc>::from_timestamp_millis(t).unwrap_or_default();
        utc.naive_utc() + chrono::Duration::seconds(self.utc_offset_secs as i64)
    }

    /// Calendar date of an instant on the venue's wall clock.
    pub fn local_date(&self, t: Ms) -> NaiveDate {
        self.local_datetime(t).date()
    }

    /// Instant of a wall-clock time on a given date.
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> Ms {
        date.and_time(time).and_utc().timestamp_millis() - self.utc_offset_secs as i64 * 1000
    }

    /// The bookable part of a day: `[open, last_end)`.
    pub fn operating_window(&self, date: NaiveDate) -> Span {
        Span::new(self.at(date, self.open), self.at(date, self.last_end))
    }

    pub fn operating_ms(&self) -> Ms {
        (self.last_end - self.open).num_milliseconds()
    }

    /// `"10:00 AM"`
    pub fn format_time(&self, t: Ms) -> String {
        self.local_datetime(t).format("%-I:%M %p").to_string()
    }

    /// `"10:00 AM - 11:00 AM"`
    pub fn format_window(&self, span: &Span) -> String {
        format!("{} - {}", self.format_time(span.start), self.format_time(span.end))
    }
}
