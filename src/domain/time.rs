use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

const QUARTER_HOUR_SECONDS: i64 = 15 * 60;

// Timestamps from the record store may arrive without an offset designator;
// those are defined to be UTC, never local time.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp string into the canonical instant representation.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("timestamp must not be empty".to_string());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&parsed));
        }
    }
    Err(format!("invalid timestamp '{raw}'"))
}

/// Compose the canonical instant for a local wall-clock time-of-day on a
/// local calendar date. Used when date/time edit controls operate in the
/// user's timezone. Ambiguous local times (DST fold) resolve to the earlier
/// instant; nonexistent local times (DST gap) are rejected.
pub fn instant_from_local(
    date: NaiveDate,
    hour: u32,
    minute: u32,
    second: u32,
    timezone: Tz,
) -> Result<DateTime<Utc>, String> {
    let Some(time) = NaiveTime::from_hms_opt(hour, minute, second) else {
        return Err(format!(
            "invalid time of day {hour:02}:{minute:02}:{second:02}"
        ));
    };
    match timezone.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(format!(
            "local time {date} {hour:02}:{minute:02}:{second:02} does not exist in {timezone}"
        )),
    }
}

/// Round an instant to the nearest 15-minute boundary.
pub fn snap_to_quarter_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = instant.timestamp();
    let snapped =
        (seconds + QUARTER_HOUR_SECONDS / 2).div_euclid(QUARTER_HOUR_SECONDS) * QUARTER_HOUR_SECONDS;
    Utc.timestamp_opt(snapped, 0).single().unwrap_or(instant)
}

/// Serialize an instant for the wire with an explicit UTC designator.
pub fn to_wire(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
