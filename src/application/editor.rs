use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::domain::aggregate::{format_hours, round_to_quarter};
use crate::domain::models::{min_span, SpanId, TimeSpan};
use crate::domain::time::{instant_from_local, snap_to_quarter_hour};

/// Fraction of the span's duration added on each side of the viewport.
pub const VIEWPORT_PADDING_RATIO: f64 = 0.2;

/// Spans shorter than this get the local-daytime window instead of padding,
/// so a 15-minute span does not render as a viewport-filling block.
pub const SHORT_SPAN_MINUTES: i64 = 60;

pub const DAY_WINDOW_START_HOUR: u32 = 8;
pub const DAY_WINDOW_END_HOUR: u32 = 20;

/// A fresh pointer-down this soon after a commit is swallowed; it is almost
/// always the tail of the gesture that just committed.
pub const COMMIT_SUPPRESS_MILLIS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragMode {
    Move,
    ResizeStart,
    ResizeEnd,
}

/// The time window rendered by the editor. Frozen for the whole drag: the
/// mapping from pixel to instant must not shift under the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Viewport {
    fn padded(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let pad = Duration::milliseconds(
            ((end - start).num_milliseconds() as f64 * VIEWPORT_PADDING_RATIO) as i64,
        );
        Self {
            from: start - pad,
            to: end + pad,
        }
    }

    fn daytime(start: DateTime<Utc>, end: DateTime<Utc>, timezone: Tz) -> Self {
        let local_date = start.with_timezone(&timezone).date_naive();
        let window_start = instant_from_local(local_date, DAY_WINDOW_START_HOUR, 0, 0, timezone);
        let window_end = instant_from_local(local_date, DAY_WINDOW_END_HOUR, 0, 0, timezone);
        match (window_start, window_end) {
            (Ok(from), Ok(to)) => Self {
                // The window always contains the span itself.
                from: from.min(start),
                to: to.max(end),
            },
            _ => Self::padded(start, end),
        }
    }

    /// Viewport for editing one closed span.
    pub fn for_span(start: DateTime<Utc>, end: DateTime<Utc>, timezone: Tz) -> Self {
        if end - start < Duration::minutes(SHORT_SPAN_MINUTES) {
            Self::daytime(start, end, timezone)
        } else {
            Self::padded(start, end)
        }
    }

    /// Instant under a pointer position, clamped to the window.
    pub fn instant_at(&self, x: f64, width: f64) -> DateTime<Utc> {
        let fraction = if width > 0.0 { (x / width).clamp(0.0, 1.0) } else { 0.0 };
        let total = (self.to - self.from).num_milliseconds() as f64;
        self.from + Duration::milliseconds((total * fraction) as i64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragState {
    pub mode: DragMode,
    pub span_id: SpanId,
    pub origin_start: DateTime<Utc>,
    pub origin_end: DateTime<Utc>,
    pub grab_offset: Duration,
    pub viewport: Viewport,
    pub width: f64,
    pub proposed_start: DateTime<Utc>,
    pub proposed_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditorState {
    Idle,
    Dragging(DragState),
    /// The pointer went down on an open span; nothing to drag until the
    /// session closes, but the press is held so release returns cleanly.
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragStart {
    Started,
    SuppressedAfterCommit,
    ReadOnlyOpenSpan,
}

/// Committed result of a drag: the bounds to dispatch for the span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedEdit {
    pub span_id: SpanId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub struct TimelineEditor {
    state: EditorState,
    timezone: Tz,
    last_commit_at: Option<DateTime<Utc>>,
}

impl TimelineEditor {
    pub fn new(timezone: Tz) -> Self {
        Self {
            state: EditorState::Idle,
            timezone,
            last_commit_at: None,
        }
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn pointer_down(
        &mut self,
        span: &TimeSpan,
        mode: DragMode,
        x: f64,
        width: f64,
        now: DateTime<Utc>,
    ) -> DragStart {
        if let Some(committed_at) = self.last_commit_at {
            if now - committed_at < Duration::milliseconds(COMMIT_SUPPRESS_MILLIS) {
                return DragStart::SuppressedAfterCommit;
            }
        }
        let Some(end) = span.end() else {
            self.state = EditorState::ReadOnly;
            return DragStart::ReadOnlyOpenSpan;
        };

        let start = span.start();
        let viewport = Viewport::for_span(start, end, self.timezone);
        let grab_offset = match mode {
            DragMode::Move => viewport.instant_at(x, width) - start,
            DragMode::ResizeStart | DragMode::ResizeEnd => Duration::zero(),
        };

        self.state = EditorState::Dragging(DragState {
            mode,
            span_id: span.id,
            origin_start: start,
            origin_end: end,
            grab_offset,
            viewport,
            width,
            proposed_start: start,
            proposed_end: end,
        });
        DragStart::Started
    }

    pub fn pointer_move(&mut self, x: f64) {
        let EditorState::Dragging(drag) = &mut self.state else {
            return;
        };
        let pointer = drag.viewport.instant_at(x, drag.width);

        match drag.mode {
            DragMode::Move => {
                let duration = drag.origin_end - drag.origin_start;
                // The whole interval stays inside the frozen window; pinning
                // to an edge outranks the quarter-hour snap.
                let latest_start = drag.viewport.to - duration;
                drag.proposed_start = snap_to_quarter_hour(pointer - drag.grab_offset)
                    .max(drag.viewport.from)
                    .min(latest_start);
                drag.proposed_end = drag.proposed_start + duration;
            }
            DragMode::ResizeStart => {
                let snapped = snap_to_quarter_hour(pointer);
                drag.proposed_start = snapped.min(drag.proposed_end - min_span());
            }
            DragMode::ResizeEnd => {
                let snapped = snap_to_quarter_hour(pointer);
                drag.proposed_end = snapped.max(drag.proposed_start + min_span());
            }
        }
    }

    /// Release the pointer. Returns the edit to dispatch when the drag
    /// actually changed the bounds; a no-op release commits nothing and
    /// does not arm commit suppression.
    pub fn pointer_up(&mut self, now: DateTime<Utc>) -> Option<CommittedEdit> {
        let state = std::mem::replace(&mut self.state, EditorState::Idle);
        let EditorState::Dragging(drag) = state else {
            return None;
        };
        if drag.proposed_start == drag.origin_start && drag.proposed_end == drag.origin_end {
            return None;
        }
        self.last_commit_at = Some(now);
        Some(CommittedEdit {
            span_id: drag.span_id,
            start: drag.proposed_start,
            end: drag.proposed_end,
        })
    }

    pub fn proposal(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match &self.state {
            EditorState::Dragging(drag) => Some((drag.proposed_start, drag.proposed_end)),
            _ => None,
        }
    }

    /// Live label for the duration under the pointer, rounded the same way
    /// totals are.
    pub fn proposal_duration_label(&self) -> Option<String> {
        self.proposal().map(|(start, end)| {
            let hours = (end - start).num_milliseconds() as f64 / 3_600_000.0;
            format_hours(round_to_quarter(hours))
        })
    }
}
