use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::models::{EntryId, SpanId, TimeSpan};
use crate::infrastructure::error::InfraError;

/// A span can live in two cache slots at once: its entry's list and, while
/// running, the active-session slot. Snapshots and rewrites address both so
/// rollback restores exactly what a speculative write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    Entry(EntryId),
    ActiveSession,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub slot: CacheSlot,
    pub span: TimeSpan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub slots: Vec<SlotSnapshot>,
}

pub trait SpanCacheRepository: Send + Sync {
    fn entry_spans(&self, entry_id: EntryId) -> Result<Vec<TimeSpan>, InfraError>;
    fn put_entry_spans(&self, entry_id: EntryId, spans: Vec<TimeSpan>) -> Result<(), InfraError>;
    fn active_session(&self) -> Result<Option<TimeSpan>, InfraError>;
    fn put_active_session(&self, span: Option<TimeSpan>) -> Result<(), InfraError>;
    fn find_span(&self, span_id: SpanId) -> Result<Option<TimeSpan>, InfraError>;
    fn snapshot_span_slots(&self, span_id: SpanId) -> Result<CacheSnapshot, InfraError>;
    /// Replace every cached copy of the span, keeping entry lists ordered.
    /// Returns how many slots were rewritten.
    fn rewrite_span(&self, span: &TimeSpan) -> Result<usize, InfraError>;
    fn remove_span(&self, span_id: SpanId) -> Result<(), InfraError>;
    fn restore(&self, snapshot: &CacheSnapshot) -> Result<(), InfraError>;
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<EntryId, Vec<TimeSpan>>,
    active: Option<TimeSpan>,
}

#[derive(Debug, Default)]
pub struct InMemorySpanCache {
    state: Mutex<CacheState>,
}

impl InMemorySpanCache {
    fn locked(&self) -> Result<std::sync::MutexGuard<'_, CacheState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("span cache lock poisoned: {error}")))
    }

    fn sort_spans(spans: &mut [TimeSpan]) {
        spans.sort_by_key(|span| (span.start(), span.id));
    }
}

impl SpanCacheRepository for InMemorySpanCache {
    fn entry_spans(&self, entry_id: EntryId) -> Result<Vec<TimeSpan>, InfraError> {
        let state = self.locked()?;
        Ok(state.entries.get(&entry_id).cloned().unwrap_or_default())
    }

    fn put_entry_spans(&self, entry_id: EntryId, mut spans: Vec<TimeSpan>) -> Result<(), InfraError> {
        Self::sort_spans(&mut spans);
        let mut state = self.locked()?;
        state.entries.insert(entry_id, spans);
        Ok(())
    }

    fn active_session(&self) -> Result<Option<TimeSpan>, InfraError> {
        let state = self.locked()?;
        Ok(state.active.clone())
    }

    fn put_active_session(&self, span: Option<TimeSpan>) -> Result<(), InfraError> {
        let mut state = self.locked()?;
        state.active = span;
        Ok(())
    }

    fn find_span(&self, span_id: SpanId) -> Result<Option<TimeSpan>, InfraError> {
        let state = self.locked()?;
        if let Some(active) = state.active.as_ref() {
            if active.id == span_id {
                return Ok(Some(active.clone()));
            }
        }
        Ok(state
            .entries
            .values()
            .flatten()
            .find(|span| span.id == span_id)
            .cloned())
    }

    fn snapshot_span_slots(&self, span_id: SpanId) -> Result<CacheSnapshot, InfraError> {
        let state = self.locked()?;
        let mut slots = Vec::new();
        for (entry_id, spans) in &state.entries {
            if let Some(span) = spans.iter().find(|span| span.id == span_id) {
                slots.push(SlotSnapshot {
                    slot: CacheSlot::Entry(*entry_id),
                    span: span.clone(),
                });
            }
        }
        if let Some(active) = state.active.as_ref() {
            if active.id == span_id {
                slots.push(SlotSnapshot {
                    slot: CacheSlot::ActiveSession,
                    span: active.clone(),
                });
            }
        }
        Ok(CacheSnapshot { slots })
    }

    fn rewrite_span(&self, span: &TimeSpan) -> Result<usize, InfraError> {
        let mut state = self.locked()?;
        let mut rewritten = 0;
        for spans in state.entries.values_mut() {
            let mut touched = false;
            for cached in spans.iter_mut() {
                if cached.id == span.id {
                    *cached = span.clone();
                    rewritten += 1;
                    touched = true;
                }
            }
            if touched {
                Self::sort_spans(spans);
            }
        }
        if let Some(active) = state.active.as_mut() {
            if active.id == span.id {
                *active = span.clone();
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }

    fn remove_span(&self, span_id: SpanId) -> Result<(), InfraError> {
        let mut state = self.locked()?;
        for spans in state.entries.values_mut() {
            spans.retain(|span| span.id != span_id);
        }
        if state.active.as_ref().is_some_and(|span| span.id == span_id) {
            state.active = None;
        }
        Ok(())
    }

    fn restore(&self, snapshot: &CacheSnapshot) -> Result<(), InfraError> {
        let mut state = self.locked()?;
        for slot in &snapshot.slots {
            match slot.slot {
                CacheSlot::Entry(entry_id) => {
                    let spans = state.entries.entry(entry_id).or_default();
                    match spans.iter_mut().find(|span| span.id == slot.span.id) {
                        Some(cached) => *cached = slot.span.clone(),
                        None => spans.push(slot.span.clone()),
                    }
                    Self::sort_spans(spans);
                }
                CacheSlot::ActiveSession => {
                    state.active = Some(slot.span.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn closed_span(id: i64, start: &str, end: &str) -> TimeSpan {
        TimeSpan::closed(id, 7, fixed_time(start), fixed_time(end))
    }

    #[test]
    fn entry_spans_are_kept_sorted_by_start_then_id() {
        let cache = InMemorySpanCache::default();
        cache
            .put_entry_spans(
                7,
                vec![
                    closed_span(2, "2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z"),
                    closed_span(1, "2026-03-02T09:00:00Z", "2026-03-02T09:30:00Z"),
                ],
            )
            .expect("put");
        let spans = cache.entry_spans(7).expect("read");
        assert_eq!(spans[0].id, 1);
        assert_eq!(spans[1].id, 2);
    }

    #[test]
    fn find_span_checks_the_active_slot_first() {
        let cache = InMemorySpanCache::default();
        let open = TimeSpan::open(5, 7, fixed_time("2026-03-02T09:00:00Z"));
        cache.put_active_session(Some(open.clone())).expect("put");
        assert_eq!(cache.find_span(5).expect("find"), Some(open));
        assert_eq!(cache.find_span(99).expect("find"), None);
    }

    #[test]
    fn rewrite_touches_every_slot_holding_the_span() {
        let cache = InMemorySpanCache::default();
        let open = TimeSpan::open(5, 7, fixed_time("2026-03-02T09:00:00Z"));
        cache.put_entry_spans(7, vec![open.clone()]).expect("put");
        cache.put_active_session(Some(open)).expect("put");

        let closed = closed_span(5, "2026-03-02T09:00:00Z", "2026-03-02T09:45:00Z");
        let rewritten = cache.rewrite_span(&closed).expect("rewrite");
        assert_eq!(rewritten, 2);
        assert_eq!(cache.entry_spans(7).expect("read")[0], closed);
        assert_eq!(cache.active_session().expect("read"), Some(closed));
    }

    #[test]
    fn restore_returns_the_snapshot_state_exactly() {
        let cache = InMemorySpanCache::default();
        let original = closed_span(1, "2026-03-02T09:00:00Z", "2026-03-02T09:30:00Z");
        cache.put_entry_spans(7, vec![original.clone()]).expect("put");

        let snapshot = cache.snapshot_span_slots(1).expect("snapshot");
        let moved = closed_span(1, "2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z");
        cache.rewrite_span(&moved).expect("rewrite");
        assert_ne!(cache.entry_spans(7).expect("read")[0], original);

        cache.restore(&snapshot).expect("restore");
        assert_eq!(cache.entry_spans(7).expect("read"), vec![original]);
    }

    #[test]
    fn restore_reinserts_a_span_removed_after_the_snapshot() {
        let cache = InMemorySpanCache::default();
        let original = closed_span(1, "2026-03-02T09:00:00Z", "2026-03-02T09:30:00Z");
        cache.put_entry_spans(7, vec![original.clone()]).expect("put");

        let snapshot = cache.snapshot_span_slots(1).expect("snapshot");
        cache.remove_span(1).expect("remove");
        assert!(cache.entry_spans(7).expect("read").is_empty());

        cache.restore(&snapshot).expect("restore");
        assert_eq!(cache.entry_spans(7).expect("read"), vec![original]);
    }

    #[test]
    fn remove_clears_the_active_slot_when_it_holds_the_span() {
        let cache = InMemorySpanCache::default();
        let open = TimeSpan::open(5, 7, fixed_time("2026-03-02T09:00:00Z"));
        cache.put_active_session(Some(open)).expect("put");
        cache.remove_span(5).expect("remove");
        assert_eq!(cache.active_session().expect("read"), None);
    }
}
