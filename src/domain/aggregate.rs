use chrono::{DateTime, Utc};

use crate::domain::models::TimeSpan;

/// Round fractional hours to the nearest quarter hour, ties away from zero.
pub fn round_to_quarter(hours: f64) -> f64 {
    (hours * 4.0).round() / 4.0
}

/// Total recorded hours for one entry: exact span durations plus the manual
/// adjustment, rounded once at the end. Rounding never happens per span.
pub fn compute_hours(spans: &[TimeSpan], manual_adjustment: f64, now: DateTime<Utc>) -> f64 {
    let exact: f64 = spans.iter().map(|span| span.duration_hours(now)).sum();
    round_to_quarter(exact + manual_adjustment)
}

/// Render rounded hours for display. Totals under one hour keep the decimal
/// form ("0.75h"); larger totals switch to hours and minutes ("2h 15m").
pub fn format_hours(hours: f64) -> String {
    let sign = if hours < 0.0 { "-" } else { "" };
    let magnitude = hours.abs();
    if magnitude < 1.0 {
        return format!("{sign}{magnitude:.2}h");
    }
    let total_minutes = (magnitude * 60.0).round() as i64;
    let whole_hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if minutes == 0 {
        format!("{sign}{whole_hours}h")
    } else {
        format!("{sign}{whole_hours}h {minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TimeSpan;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn closed_span(id: i64, start: &str, end: &str) -> TimeSpan {
        TimeSpan::closed(id, 7, fixed_time(start), fixed_time(end))
    }

    #[test]
    fn forty_minutes_rounds_up_to_three_quarters() {
        let spans = [closed_span(1, "2026-03-02T09:00:00Z", "2026-03-02T09:40:00Z")];
        let now = fixed_time("2026-03-02T12:00:00Z");
        assert_eq!(compute_hours(&spans, 0.0, now), 0.75);
    }

    #[test]
    fn rounding_applies_to_the_sum_not_per_span() {
        // 1.10 + 0.90 + 0.30 = 2.30 -> 2.25; per-span rounding would give 2.50.
        let spans = [
            closed_span(1, "2026-03-02T09:00:00Z", "2026-03-02T10:06:00Z"),
            closed_span(2, "2026-03-02T11:00:00Z", "2026-03-02T11:54:00Z"),
            closed_span(3, "2026-03-02T13:00:00Z", "2026-03-02T13:18:00Z"),
        ];
        let now = fixed_time("2026-03-02T15:00:00Z");
        assert_eq!(compute_hours(&spans, 0.0, now), 2.25);
    }

    #[test]
    fn manual_adjustment_joins_the_sum_before_rounding() {
        // 0.40h recorded + 0.20h adjustment = 0.60 -> 0.50; rounding the
        // recorded time first would give 0.25 + 0.20 = 0.45.
        let spans = [closed_span(1, "2026-03-02T09:00:00Z", "2026-03-02T09:24:00Z")];
        let now = fixed_time("2026-03-02T12:00:00Z");
        assert_eq!(compute_hours(&spans, 0.20, now), 0.50);
    }

    #[test]
    fn negative_adjustment_can_produce_negative_totals() {
        let spans = [closed_span(1, "2026-03-02T09:00:00Z", "2026-03-02T09:30:00Z")];
        let now = fixed_time("2026-03-02T12:00:00Z");
        assert_eq!(compute_hours(&spans, -1.0, now), -0.5);
    }

    #[test]
    fn open_spans_accrue_into_the_total() {
        let spans = [TimeSpan::open(1, 7, fixed_time("2026-03-02T09:00:00Z"))];
        let now = fixed_time("2026-03-02T09:50:00Z");
        assert_eq!(compute_hours(&spans, 0.0, now), 0.75);
    }

    #[test]
    fn halfway_ties_round_away_from_zero() {
        assert_eq!(round_to_quarter(0.125), 0.25);
        assert_eq!(round_to_quarter(-0.125), -0.25);
    }

    #[test]
    fn formatting_keeps_decimal_form_under_one_hour() {
        assert_eq!(format_hours(0.75), "0.75h");
        assert_eq!(format_hours(0.25), "0.25h");
        assert_eq!(format_hours(0.0), "0.00h");
    }

    #[test]
    fn formatting_switches_to_hours_and_minutes_at_one_hour() {
        assert_eq!(format_hours(2.25), "2h 15m");
        assert_eq!(format_hours(3.0), "3h");
        assert_eq!(format_hours(1.75), "1h 45m");
    }

    #[test]
    fn formatting_carries_the_sign_for_negative_totals() {
        assert_eq!(format_hours(-0.5), "-0.50h");
        assert_eq!(format_hours(-2.25), "-2h 15m");
    }

    // Feature: worklog, Property 2: every rounded total is a multiple of a
    // quarter hour
    proptest! {
        #[test]
        fn property2_rounded_totals_are_quarter_multiples(hours in -100.0f64..100.0) {
            let rounded = round_to_quarter(hours);
            let quarters = rounded * 4.0;
            prop_assert!((quarters - quarters.round()).abs() < 1e-9);
            prop_assert!((rounded - hours).abs() <= 0.125 + 1e-9);
        }
    }
}
