use crate::application::editor::TimelineEditor;
use crate::application::mutation::{PendingWrites, SpanMutationCoordinator, SpanWriteLocks};
use crate::application::session::SessionService;
use crate::domain::aggregate::{compute_hours, format_hours, round_to_quarter};
use crate::domain::models::{EntryId, SpanId, TimeSpan};
use crate::domain::time::{parse_instant, to_wire};
use crate::infrastructure::config::{
    ensure_default_configs, read_active_poll_seconds, read_api_base_url,
    read_pending_write_timeout_seconds, read_stale_echo_tolerance_seconds, read_timezone,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::span_cache::{InMemorySpanCache, SpanCacheRepository};
use crate::infrastructure::span_mapper::encode_span_write;
use crate::infrastructure::worklog_client::{ReqwestWorklogClient, WorklogClient};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

pub struct AppState {
    config_dir: PathBuf,
    logs_dir: PathBuf,
    span_cache: Arc<InMemorySpanCache>,
    pending_writes: Arc<PendingWrites>,
    write_locks: Arc<SpanWriteLocks>,
    runtime: Mutex<RuntimeState>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let config_dir = workspace_root.join("config");
        let logs_dir = workspace_root.join("logs");
        fs::create_dir_all(&config_dir)?;
        fs::create_dir_all(&logs_dir)?;
        ensure_default_configs(&config_dir)?;

        let timeout = read_pending_write_timeout_seconds(&config_dir)?;
        let tolerance = read_stale_echo_tolerance_seconds(&config_dir)?;

        Ok(Self {
            config_dir,
            logs_dir,
            span_cache: Arc::new(InMemorySpanCache::default()),
            pending_writes: Arc::new(PendingWrites::new(timeout, tolerance)),
            write_locks: Arc::new(SpanWriteLocks::default()),
            runtime: Mutex::new(RuntimeState::default()),
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    manual_adjustments: HashMap<EntryId, f64>,
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("runtime state lock poisoned: {error}")))
}

fn worklog_client(state: &AppState) -> Result<Arc<ReqwestWorklogClient>, InfraError> {
    let base_url = read_api_base_url(&state.config_dir)?;
    Ok(Arc::new(ReqwestWorklogClient::new(&base_url)?))
}

fn session_service(
    state: &AppState,
) -> Result<SessionService<ReqwestWorklogClient, InMemorySpanCache>, InfraError> {
    Ok(SessionService::new(
        worklog_client(state)?,
        Arc::clone(&state.span_cache),
        Arc::clone(&state.pending_writes),
    ))
}

fn mutation_coordinator(
    state: &AppState,
) -> Result<SpanMutationCoordinator<ReqwestWorklogClient, InMemorySpanCache>, InfraError> {
    Ok(SpanMutationCoordinator::new(
        worklog_client(state)?,
        Arc::clone(&state.span_cache),
        Arc::clone(&state.pending_writes),
        Arc::clone(&state.write_locks),
    ))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpanItemResponse {
    pub id: SpanId,
    pub entry_id: EntryId,
    pub start: String,
    pub end: Option<String>,
    pub duration_label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntrySpansResponse {
    pub spans: Vec<SpanItemResponse>,
    pub total_hours: f64,
    pub total_label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionStateResponse {
    pub state: String,
    pub span: Option<SpanItemResponse>,
    pub elapsed_label: Option<String>,
}

fn span_item(span: &TimeSpan) -> SpanItemResponse {
    let now = Utc::now();
    SpanItemResponse {
        id: span.id,
        entry_id: span.entry_id,
        start: to_wire(span.start()),
        end: span.end().map(to_wire),
        duration_label: format_hours(round_to_quarter(span.duration_hours(now))),
    }
}

fn session_state(span: Option<&TimeSpan>) -> SessionStateResponse {
    match span {
        Some(span) => {
            let elapsed = round_to_quarter(span.duration_hours(Utc::now()));
            SessionStateResponse {
                state: "running".to_string(),
                span: Some(span_item(span)),
                elapsed_label: Some(format_hours(elapsed)),
            }
        }
        None => SessionStateResponse {
            state: "idle".to_string(),
            span: None,
            elapsed_label: None,
        },
    }
}

fn entry_spans_response(
    state: &AppState,
    entry_id: EntryId,
    spans: &[TimeSpan],
) -> Result<EntrySpansResponse, InfraError> {
    let adjustment = {
        let runtime = lock_runtime(state)?;
        runtime
            .manual_adjustments
            .get(&entry_id)
            .copied()
            .unwrap_or(0.0)
    };
    let total = compute_hours(spans, adjustment, Utc::now());
    Ok(EntrySpansResponse {
        spans: spans.iter().map(span_item).collect(),
        total_hours: total,
        total_label: format_hours(total),
    })
}

pub async fn start_session_impl(
    state: &AppState,
    entry_id: EntryId,
) -> Result<SessionStateResponse, InfraError> {
    let service = session_service(state)?;
    let span = service.start(entry_id).await?;
    state.log_info(
        "start_session",
        &format!("started span_id={} entry_id={entry_id}", span.id),
    );
    Ok(session_state(Some(&span)))
}

pub async fn pause_session_impl(state: &AppState) -> Result<SessionStateResponse, InfraError> {
    let Some(active) = state.span_cache.active_session()? else {
        return Err(InfraError::InvalidInput("no session is running".to_string()));
    };

    let service = session_service(state)?;
    let closed = service.pause(active.id).await?;
    state.log_info(
        "pause_session",
        &format!("paused span_id={} entry_id={}", closed.id, closed.entry_id),
    );
    Ok(session_state(None))
}

pub fn active_session_impl(state: &AppState) -> Result<SessionStateResponse, InfraError> {
    let active = state.span_cache.active_session()?;
    Ok(session_state(active.as_ref()))
}

pub async fn poll_active_session_impl(state: &AppState) -> Result<SessionStateResponse, InfraError> {
    let service = session_service(state)?;
    let active = service.poll_active().await?;
    Ok(session_state(active.as_ref()))
}

/// Mirror the store's running session until cancelled, on the configured
/// poll period. Poll failures are logged and the loop keeps going.
pub async fn run_active_session_poll_impl(
    state: &AppState,
    cancel: CancellationToken,
) -> Result<(), InfraError> {
    let period = read_active_poll_seconds(&state.config_dir)?;
    let service = session_service(state)?;
    service
        .run_poll_loop(period, cancel, |error| {
            state.log_error("poll_active_session", &error.to_string());
        })
        .await;
    Ok(())
}

/// Editor for the configured timezone; drag commits feed
/// `commit_span_edit_impl`.
pub fn timeline_editor_impl(state: &AppState) -> Result<TimelineEditor, InfraError> {
    Ok(TimelineEditor::new(read_timezone(&state.config_dir)?))
}

pub fn list_entry_spans_impl(
    state: &AppState,
    entry_id: EntryId,
) -> Result<EntrySpansResponse, InfraError> {
    let spans = state.span_cache.entry_spans(entry_id)?;
    entry_spans_response(state, entry_id, &spans)
}

pub async fn refresh_entry_spans_impl(
    state: &AppState,
    entry_id: EntryId,
) -> Result<EntrySpansResponse, InfraError> {
    let coordinator = mutation_coordinator(state)?;
    let spans = coordinator.refresh_entry(entry_id).await?;
    entry_spans_response(state, entry_id, &spans)
}

pub fn set_manual_adjustment_impl(
    state: &AppState,
    entry_id: EntryId,
    delta_hours: f64,
) -> Result<EntrySpansResponse, InfraError> {
    if !delta_hours.is_finite() {
        return Err(InfraError::InvalidInput(
            "delta_hours must be a finite number".to_string(),
        ));
    }
    {
        let mut runtime = lock_runtime(state)?;
        if delta_hours == 0.0 {
            runtime.manual_adjustments.remove(&entry_id);
        } else {
            runtime.manual_adjustments.insert(entry_id, delta_hours);
        }
    }
    state.log_info(
        "set_manual_adjustment",
        &format!("entry_id={entry_id} delta_hours={delta_hours}"),
    );
    list_entry_spans_impl(state, entry_id)
}

pub async fn commit_span_edit_impl(
    state: &AppState,
    span_id: SpanId,
    start_at: String,
    end_at: String,
) -> Result<SpanItemResponse, InfraError> {
    let start = parse_instant(&start_at).map_err(InfraError::InvalidInput)?;
    let end = parse_instant(&end_at).map_err(InfraError::InvalidInput)?;

    let coordinator = mutation_coordinator(state)?;
    let settled = coordinator.apply(span_id, start, Some(end)).await?;
    state.log_info(
        "commit_span_edit",
        &format!("span_id={span_id} start={} end={}", start_at.trim(), end_at.trim()),
    );
    Ok(span_item(&settled))
}

pub async fn create_span_impl(
    state: &AppState,
    entry_id: EntryId,
    start_at: String,
    end_at: String,
) -> Result<EntrySpansResponse, InfraError> {
    let start = parse_instant(&start_at).map_err(InfraError::InvalidInput)?;
    let end = parse_instant(&end_at).map_err(InfraError::InvalidInput)?;
    crate::application::mutation::validate_proposed_range(start, Some(end))?;

    let client = worklog_client(state)?;
    let created = client.create_span(entry_id, encode_span_write(start, Some(end))).await?;
    state.log_info(
        "create_span",
        &format!("created span_id={} entry_id={entry_id}", created.id),
    );

    refresh_entry_spans_impl(state, entry_id).await
}

pub async fn adjust_span_impl(
    state: &AppState,
    span_id: SpanId,
    delta_hours: f64,
) -> Result<SpanItemResponse, InfraError> {
    if !delta_hours.is_finite() || delta_hours == 0.0 {
        return Err(InfraError::InvalidInput(
            "delta_hours must be a finite non-zero number".to_string(),
        ));
    }

    let client = worklog_client(state)?;
    let adjusted = client.adjust_span(span_id, delta_hours).await?;
    state.span_cache.rewrite_span(&adjusted)?;
    state.log_info(
        "adjust_span",
        &format!("span_id={span_id} delta_hours={delta_hours}"),
    );
    Ok(span_item(&adjusted))
}

pub async fn delete_span_impl(state: &AppState, span_id: SpanId) -> Result<(), InfraError> {
    let coordinator = mutation_coordinator(state)?;
    coordinator.delete(span_id).await?;
    state.log_info("delete_span", &format!("deleted span_id={span_id}"));
    Ok(())
}

pub async fn merge_entry_spans_impl(
    state: &AppState,
    entry_id: EntryId,
    prefer: Option<SpanId>,
) -> Result<EntrySpansResponse, InfraError> {
    let coordinator = mutation_coordinator(state)?;
    let plans = coordinator.merge_entry_spans(entry_id, prefer).await?;
    state.log_info(
        "merge_entry_spans",
        &format!("entry_id={entry_id} merged_groups={}", plans.len()),
    );
    list_entry_spans_impl(state, entry_id)
}
