use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::{EntryId, SpanId, TimeSpan};
use crate::domain::time::{parse_instant, to_wire};
use crate::infrastructure::error::InfraError;

/// Wire representation of one recorded interval. End and creation timestamps
/// are optional; timestamps may arrive without an offset designator and are
/// treated as UTC by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSpanPayload {
    pub id: SpanId,
    #[serde(rename = "entryId")]
    pub entry_id: EntryId,
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(
        rename = "createdAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<String>,
}

/// Outgoing bounds for creating or rewriting an interval.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SpanWritePayload {
    pub start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StartSessionPayload {
    #[serde(rename = "entryId")]
    pub entry_id: EntryId,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdjustSpanPayload {
    #[serde(rename = "deltaHours")]
    pub delta_hours: f64,
}

pub fn decode_span(payload: &TimeSpanPayload) -> Result<TimeSpan, InfraError> {
    let start = parse_instant(&payload.start)
        .map_err(|reason| InfraError::Api(format!("span {} start: {reason}", payload.id)))?;
    let end = payload
        .end
        .as_deref()
        .map(|raw| {
            parse_instant(raw)
                .map_err(|reason| InfraError::Api(format!("span {} end: {reason}", payload.id)))
        })
        .transpose()?;

    if let Some(end) = end {
        if end <= start {
            return Err(InfraError::Api(format!(
                "span {} has a reversed range ({} .. {})",
                payload.id, payload.start,
                payload.end.as_deref().unwrap_or_default()
            )));
        }
    }

    let created_at = payload
        .created_at
        .as_deref()
        .map(|raw| {
            parse_instant(raw).map_err(|reason| {
                InfraError::Api(format!("span {} createdAt: {reason}", payload.id))
            })
        })
        .transpose()?
        .unwrap_or(start);

    let mut span = match end {
        Some(end) => TimeSpan::closed(payload.id, payload.entry_id, start, end),
        None => TimeSpan::open(payload.id, payload.entry_id, start),
    };
    span.created_at = created_at;
    Ok(span)
}

pub fn encode_span_write(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> SpanWritePayload {
    SpanWritePayload {
        start: to_wire(start),
        end: end.map(to_wire),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_payload() -> TimeSpanPayload {
        TimeSpanPayload {
            id: 11,
            entry_id: 7,
            start: "2026-03-02T09:00:00Z".to_string(),
            end: Some("2026-03-02T09:45:00Z".to_string()),
            created_at: Some("2026-03-02T09:00:00Z".to_string()),
        }
    }

    #[test]
    fn naive_and_designated_payloads_decode_to_the_same_span() {
        let designated = decode_span(&sample_payload()).expect("decode designated");

        let mut naive = sample_payload();
        naive.start = "2026-03-02T09:00:00".to_string();
        naive.end = Some("2026-03-02T09:45:00".to_string());
        naive.created_at = Some("2026-03-02T09:00:00".to_string());
        let naive = decode_span(&naive).expect("decode naive");

        assert_eq!(naive, designated);
    }

    #[test]
    fn missing_end_decodes_to_an_open_span() {
        let mut payload = sample_payload();
        payload.end = None;
        let span = decode_span(&payload).expect("decode open");
        assert!(span.is_open());
        assert_eq!(span.start(), fixed_time("2026-03-02T09:00:00Z"));
    }

    #[test]
    fn missing_created_at_defaults_to_start() {
        let mut payload = sample_payload();
        payload.created_at = None;
        let span = decode_span(&payload).expect("decode");
        assert_eq!(span.created_at, span.start());
    }

    #[test]
    fn reversed_ranges_are_rejected() {
        let mut payload = sample_payload();
        payload.end = Some("2026-03-02T08:00:00Z".to_string());
        assert!(decode_span(&payload).is_err());
    }

    #[test]
    fn unparseable_timestamps_are_rejected() {
        let mut payload = sample_payload();
        payload.start = "yesterday".to_string();
        assert!(decode_span(&payload).is_err());
    }

    #[test]
    fn encoded_writes_carry_the_utc_designator() {
        let payload = encode_span_write(
            fixed_time("2026-03-02T09:00:00Z"),
            Some(fixed_time("2026-03-02T09:45:00Z")),
        );
        assert_eq!(payload.start, "2026-03-02T09:00:00Z");
        assert_eq!(payload.end.as_deref(), Some("2026-03-02T09:45:00Z"));
    }

    #[test]
    fn open_writes_omit_the_end_field() {
        let payload = encode_span_write(fixed_time("2026-03-02T09:00:00Z"), None);
        let rendered = serde_json::to_string(&payload).expect("serialize");
        assert!(!rendered.contains("end"));
    }

    #[test]
    fn payload_field_names_follow_the_wire_convention() {
        let rendered = serde_json::to_string(&sample_payload()).expect("serialize");
        assert!(rendered.contains("\"entryId\":7"));
        assert!(rendered.contains("\"createdAt\""));
    }
}
