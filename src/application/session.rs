use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration as TokioDuration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::mutation::{ExternalVerdict, NowProvider, PendingWrites};
use crate::domain::models::{EntryId, SpanId, TimeSpan};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::span_cache::SpanCacheRepository;
use crate::infrastructure::worklog_client::WorklogClient;

/// Default period between active-session polls, in seconds.
pub const DEFAULT_POLL_SECONDS: u64 = 30;

/// Local view of the session lifecycle. The record store enforces that at
/// most one session runs at a time; this service never decides uniqueness
/// on its own, it asks the store and mirrors the answer.
pub struct SessionService<C, R>
where
    C: WorklogClient,
    R: SpanCacheRepository,
{
    client: Arc<C>,
    cache: Arc<R>,
    pending: Arc<PendingWrites>,
    now_provider: NowProvider,
}

impl<C, R> SessionService<C, R>
where
    C: WorklogClient,
    R: SpanCacheRepository,
{
    pub fn new(client: Arc<C>, cache: Arc<R>, pending: Arc<PendingWrites>) -> Self {
        Self {
            client,
            cache,
            pending,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn active_span(&self) -> Result<Option<TimeSpan>, InfraError> {
        self.cache.active_session()
    }

    /// Hours accrued by the running session so far, unrounded.
    pub fn elapsed_hours(&self) -> Result<Option<f64>, InfraError> {
        let now = (self.now_provider)();
        Ok(self
            .cache
            .active_session()?
            .map(|span| span.duration_hours(now)))
    }

    /// Start a session against an entry. The store answers with the open
    /// span, or refuses when another session is already running; a refusal
    /// leaves the cache untouched.
    pub async fn start(&self, entry_id: EntryId) -> Result<TimeSpan, InfraError> {
        if entry_id <= 0 {
            return Err(InfraError::InvalidInput("entry id must be positive".to_string()));
        }

        let span = self.client.start_session(entry_id).await?;
        self.cache.put_active_session(Some(span.clone()))?;

        // The store may reopen an existing span rather than mint a new one.
        let mut spans = self.cache.entry_spans(entry_id)?;
        match spans.iter_mut().find(|cached| cached.id == span.id) {
            Some(cached) => *cached = span.clone(),
            None => spans.push(span.clone()),
        }
        self.cache.put_entry_spans(entry_id, spans)?;
        Ok(span)
    }

    /// Close the running session. Refuses locally when the given span is
    /// not the cached active session.
    pub async fn pause(&self, span_id: SpanId) -> Result<TimeSpan, InfraError> {
        let active = self.cache.active_session()?;
        if active.as_ref().map(|span| span.id) != Some(span_id) {
            return Err(InfraError::InvalidInput(format!(
                "span {span_id} is not the running session"
            )));
        }

        let closed = self.client.pause_session(span_id).await?;
        self.cache.put_active_session(None)?;
        self.cache.rewrite_span(&closed)?;
        Ok(closed)
    }

    /// One poll round: ask the store for the running session and mirror it,
    /// unless a pending write says the store's answer is stale.
    pub async fn poll_active(&self) -> Result<Option<TimeSpan>, InfraError> {
        let remote = self.client.active_session().await?;
        let now = (self.now_provider)();

        match remote {
            Some(span) => {
                if self.pending.gate_external(&span, now)? == ExternalVerdict::Suppress {
                    return self.cache.active_session();
                }
                self.cache.put_active_session(Some(span.clone()))?;
                Ok(Some(span))
            }
            None => {
                self.cache.put_active_session(None)?;
                Ok(None)
            }
        }
    }

    /// Poll until cancelled. Transient poll failures are reported through
    /// `on_error` and the loop keeps going.
    pub async fn run_poll_loop<F>(
        &self,
        period_seconds: u64,
        cancel: CancellationToken,
        on_error: F,
    ) where
        F: Fn(&InfraError),
    {
        let period = TokioDuration::from_secs(period_seconds.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(error) = self.poll_active().await {
                        on_error(&error);
                    }
                }
            }
        }
    }
}
