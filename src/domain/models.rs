use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type SpanId = i64;
pub type EntryId = i64;

/// Shortest closed interval the system accepts, in minutes.
pub const MIN_SPAN_MINUTES: i64 = 15;

pub fn min_span() -> Duration {
    Duration::minutes(MIN_SPAN_MINUTES)
}

/// Boundaries of a recorded interval. An open interval has no end yet; at
/// most one open interval exists system-wide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SpanBounds {
    Open { start: DateTime<Utc> },
    Closed { start: DateTime<Utc>, end: DateTime<Utc> },
}

impl SpanBounds {
    pub fn start(&self) -> DateTime<Utc> {
        match self {
            Self::Open { start } => *start,
            Self::Closed { start, .. } => *start,
        }
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Open { .. } => None,
            Self::Closed { end, .. } => Some(*end),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// One contiguous recorded period of work, owned by a log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSpan {
    pub id: SpanId,
    pub entry_id: EntryId,
    pub bounds: SpanBounds,
    pub created_at: DateTime<Utc>,
}

impl TimeSpan {
    pub fn open(id: SpanId, entry_id: EntryId, start: DateTime<Utc>) -> Self {
        Self {
            id,
            entry_id,
            bounds: SpanBounds::Open { start },
            created_at: start,
        }
    }

    pub fn closed(id: SpanId, entry_id: EntryId, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id,
            entry_id,
            bounds: SpanBounds::Closed { start, end },
            created_at: start,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.bounds.start()
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.bounds.end()
    }

    pub fn is_open(&self) -> bool {
        self.bounds.is_open()
    }

    /// Fractional hours recorded by this interval; open intervals accrue up
    /// to `now` and never contribute a negative duration.
    pub fn duration_hours(&self, now: DateTime<Utc>) -> f64 {
        let end = self.end().unwrap_or(now);
        let millis = (end - self.start()).num_milliseconds().max(0);
        millis as f64 / 3_600_000.0
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id <= 0 {
            return Err("span.id must be positive".to_string());
        }
        if self.entry_id <= 0 {
            return Err("span.entry_id must be positive".to_string());
        }
        if let SpanBounds::Closed { start, end } = self.bounds {
            validate_closed_range(start, end)?;
        }
        Ok(())
    }
}

pub fn validate_closed_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), String> {
    if end <= start {
        return Err("span end must be after its start".to_string());
    }
    if end - start < min_span() {
        return Err(format!("span must cover at least {MIN_SPAN_MINUTES} minutes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_closed() -> TimeSpan {
        TimeSpan::closed(
            1,
            7,
            fixed_time("2026-03-02T09:00:00Z"),
            fixed_time("2026-03-02T09:45:00Z"),
        )
    }

    #[test]
    fn validate_accepts_closed_span() {
        assert!(sample_closed().validate().is_ok());
    }

    #[test]
    fn validate_rejects_reversed_range() {
        let mut span = sample_closed();
        span.bounds = SpanBounds::Closed {
            start: fixed_time("2026-03-02T10:00:00Z"),
            end: fixed_time("2026-03-02T09:00:00Z"),
        };
        assert!(span.validate().is_err());
    }

    #[test]
    fn validate_rejects_closed_span_below_minimum() {
        let mut span = sample_closed();
        span.bounds = SpanBounds::Closed {
            start: fixed_time("2026-03-02T09:00:00Z"),
            end: fixed_time("2026-03-02T09:10:00Z"),
        };
        assert!(span.validate().is_err());
    }

    #[test]
    fn open_span_accrues_until_now() {
        let span = TimeSpan::open(2, 7, fixed_time("2026-03-02T09:00:00Z"));
        let now = fixed_time("2026-03-02T09:30:00Z");
        assert_eq!(span.duration_hours(now), 0.5);
    }

    #[test]
    fn open_span_duration_is_never_negative() {
        let span = TimeSpan::open(2, 7, fixed_time("2026-03-02T09:00:00Z"));
        let before_start = fixed_time("2026-03-02T08:00:00Z");
        assert_eq!(span.duration_hours(before_start), 0.0);
    }

    #[test]
    fn closed_span_duration_ignores_now() {
        let span = sample_closed();
        let far_future = fixed_time("2027-01-01T00:00:00Z");
        assert_eq!(span.duration_hours(far_future), 0.75);
    }

    #[test]
    fn spans_support_serde_roundtrip() {
        let closed = sample_closed();
        let open = TimeSpan::open(2, 7, fixed_time("2026-03-02T10:00:00Z"));

        let closed_roundtrip: TimeSpan =
            serde_json::from_str(&serde_json::to_string(&closed).expect("serialize closed"))
                .expect("deserialize closed");
        let open_roundtrip: TimeSpan =
            serde_json::from_str(&serde_json::to_string(&open).expect("serialize open"))
                .expect("deserialize open");

        assert_eq!(closed_roundtrip, closed);
        assert_eq!(open_roundtrip, open);
    }

    // Feature: worklog, Property 1: every closed range the validator accepts
    // covers at least the minimum duration
    proptest! {
        #[test]
        fn property1_accepted_ranges_cover_minimum_duration(
            offset_minutes in 0i64..10_000,
            length_minutes in 0i64..600
        ) {
            let start = fixed_time("2026-01-01T00:00:00Z") + Duration::minutes(offset_minutes);
            let end = start + Duration::minutes(length_minutes);
            if validate_closed_range(start, end).is_ok() {
                prop_assert!(end - start >= min_span());
            } else {
                prop_assert!(length_minutes < MIN_SPAN_MINUTES);
            }
        }
    }
}
