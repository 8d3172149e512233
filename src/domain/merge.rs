use chrono::{DateTime, Duration, Utc};

use crate::domain::models::{min_span, SpanId, TimeSpan};

/// Largest gap between two spans that still counts as connectable, minutes.
pub const DEFAULT_GAP_MINUTES: i64 = 15;

/// One group of connectable spans collapsed into a single surviving span.
/// `merged_end` is `None` when the group contains an open span, so the
/// merged result keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub keeper_id: SpanId,
    pub merged_start: DateTime<Utc>,
    pub merged_end: Option<DateTime<Utc>>,
    pub delete_ids: Vec<SpanId>,
}

/// Group spans of one entry that touch or sit within `gap_minutes` of each
/// other, and plan one merge per group of two or more.
///
/// Keeper preference inside a group: the preferred id when present, else an
/// open span, else the lowest id. A closed group whose merged window would
/// collapse below the minimum duration is repaired to start plus the minimum.
pub fn plan_connectable_merges(
    spans: &[TimeSpan],
    gap_minutes: i64,
    prefer: Option<SpanId>,
    now: DateTime<Utc>,
) -> Vec<MergePlan> {
    let mut ordered: Vec<&TimeSpan> = spans.iter().collect();
    ordered.sort_by_key(|span| (span.start(), span.id));

    let gap = Duration::minutes(gap_minutes);
    let mut plans = Vec::new();
    let mut group: Vec<&TimeSpan> = Vec::new();
    let mut group_end: Option<DateTime<Utc>> = None;

    for span in ordered {
        let end = effective_end(span, now);
        match group_end {
            Some(current_end) if span.start() <= current_end + gap => {
                group.push(span);
                group_end = Some(current_end.max(end));
            }
            _ => {
                if let Some(plan) = plan_for_group(&group, prefer) {
                    plans.push(plan);
                }
                group.clear();
                group.push(span);
                group_end = Some(end);
            }
        }
    }
    if let Some(plan) = plan_for_group(&group, prefer) {
        plans.push(plan);
    }
    plans
}

// An open span reaches at least its own start even when the clock reads
// earlier than the span's start.
fn effective_end(span: &TimeSpan, now: DateTime<Utc>) -> DateTime<Utc> {
    span.end().unwrap_or_else(|| now.max(span.start()))
}

fn plan_for_group(group: &[&TimeSpan], prefer: Option<SpanId>) -> Option<MergePlan> {
    if group.len() < 2 {
        return None;
    }

    let keeper_id = pick_keeper(group, prefer);
    let merged_start = group.iter().map(|span| span.start()).min()?;
    let any_open = group.iter().any(|span| span.is_open());
    let merged_end = if any_open {
        None
    } else {
        let end = group.iter().filter_map(|span| span.end()).max()?;
        // Adjacent degenerate spans can collapse to a window shorter than
        // the minimum; repair to the minimum rather than reject.
        Some(end.max(merged_start + min_span()))
    };

    let mut delete_ids: Vec<SpanId> = group
        .iter()
        .map(|span| span.id)
        .filter(|id| *id != keeper_id)
        .collect();
    delete_ids.sort_unstable();

    Some(MergePlan {
        keeper_id,
        merged_start,
        merged_end,
        delete_ids,
    })
}

fn pick_keeper(group: &[&TimeSpan], prefer: Option<SpanId>) -> SpanId {
    if let Some(preferred) = prefer {
        if group.iter().any(|span| span.id == preferred) {
            return preferred;
        }
    }
    if let Some(open) = group.iter().find(|span| span.is_open()) {
        return open.id;
    }
    group
        .iter()
        .map(|span| span.id)
        .min()
        .expect("group has at least two spans")
}
