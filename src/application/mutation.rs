use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::domain::merge::{plan_connectable_merges, MergePlan, DEFAULT_GAP_MINUTES};
use crate::domain::models::{validate_closed_range, EntryId, SpanId, TimeSpan};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::span_cache::SpanCacheRepository;
use crate::infrastructure::span_mapper::encode_span_write;
use crate::infrastructure::worklog_client::WorklogClient;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// How long a pending write may suppress external updates before it is
/// force-cleared, in seconds.
pub const PENDING_WRITE_TIMEOUT_SECONDS: u64 = 10;

/// How far an external span's bounds may drift from the bounds we sent and
/// still count as an echo of our own write, in seconds. The record store may
/// snap timestamps, so echo detection compares values with slack.
pub const STALE_ECHO_TOLERANCE_SECONDS: u64 = 60;

/// In-flight write to one span, remembered until the store confirms it or
/// the record times out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub span_id: SpanId,
    pub sent_start: DateTime<Utc>,
    pub sent_end: Option<DateTime<Utc>>,
    pub sent_at: DateTime<Utc>,
}

/// How an externally observed copy of a span should be treated while a
/// write to that span is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalVerdict {
    /// No write in flight; the external copy is authoritative.
    Accept,
    /// The external copy is the store echoing our own write back.
    AcceptEcho,
    /// The external copy predates our in-flight write; drop it.
    Suppress,
}

#[derive(Debug)]
pub struct PendingWrites {
    records: Mutex<HashMap<SpanId, PendingWrite>>,
    timeout: Duration,
    tolerance: Duration,
}

impl Default for PendingWrites {
    fn default() -> Self {
        Self::new(PENDING_WRITE_TIMEOUT_SECONDS, STALE_ECHO_TOLERANCE_SECONDS)
    }
}

impl PendingWrites {
    pub fn new(timeout_seconds: u64, tolerance_seconds: u64) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            timeout: Duration::seconds(timeout_seconds as i64),
            tolerance: Duration::seconds(tolerance_seconds as i64),
        }
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SpanId, PendingWrite>>, InfraError> {
        self.records
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("pending write lock poisoned: {error}")))
    }

    pub fn register(
        &self,
        span_id: SpanId,
        sent_start: DateTime<Utc>,
        sent_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut records = self.locked()?;
        records.insert(
            span_id,
            PendingWrite {
                span_id,
                sent_start,
                sent_end,
                sent_at: now,
            },
        );
        Ok(())
    }

    pub fn clear(&self, span_id: SpanId) -> Result<(), InfraError> {
        let mut records = self.locked()?;
        records.remove(&span_id);
        Ok(())
    }

    /// Live record for a span; expired records are purged on the way out so
    /// suppression can never outlast the timeout.
    pub fn get_live(&self, span_id: SpanId, now: DateTime<Utc>) -> Result<Option<PendingWrite>, InfraError> {
        let mut records = self.locked()?;
        records.retain(|_, record| now - record.sent_at <= self.timeout);
        Ok(records.get(&span_id).cloned())
    }

    /// Decide what to do with an externally observed copy of a span.
    /// An echo clears its record; the write has round-tripped.
    pub fn gate_external(&self, span: &TimeSpan, now: DateTime<Utc>) -> Result<ExternalVerdict, InfraError> {
        let Some(record) = self.get_live(span.id, now)? else {
            return Ok(ExternalVerdict::Accept);
        };
        if self.is_echo(&record, span) {
            self.clear(span.id)?;
            return Ok(ExternalVerdict::AcceptEcho);
        }
        Ok(ExternalVerdict::Suppress)
    }

    fn is_echo(&self, record: &PendingWrite, span: &TimeSpan) -> bool {
        let start_matches = (span.start() - record.sent_start).abs() <= self.tolerance;
        let end_matches = match (span.end(), record.sent_end) {
            (Some(observed), Some(sent)) => (observed - sent).abs() <= self.tolerance,
            (None, None) => true,
            _ => false,
        };
        start_matches && end_matches
    }
}

/// One fair async mutex per span id. Writes to the same span queue up in
/// issue order; writes to different spans never contend.
#[derive(Debug, Default)]
pub struct SpanWriteLocks {
    locks: Mutex<HashMap<SpanId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SpanWriteLocks {
    pub fn lock_for(&self, span_id: SpanId) -> Result<Arc<tokio::sync::Mutex<()>>, InfraError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("write lock registry poisoned: {error}")))?;
        Ok(Arc::clone(locks.entry(span_id).or_default()))
    }
}

pub fn validate_proposed_range(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Result<(), InfraError> {
    if let Some(end) = end {
        validate_closed_range(start, end).map_err(InfraError::InvalidInput)?;
    }
    Ok(())
}

/// Coordinates optimistic span mutations: apply the proposal to the cache
/// immediately, dispatch it to the record store, and reconcile with the
/// store's answer, rolling the cache back when the store refuses.
pub struct SpanMutationCoordinator<C, R>
where
    C: WorklogClient,
    R: SpanCacheRepository,
{
    client: Arc<C>,
    cache: Arc<R>,
    pending: Arc<PendingWrites>,
    locks: Arc<SpanWriteLocks>,
    now_provider: NowProvider,
}

impl<C, R> SpanMutationCoordinator<C, R>
where
    C: WorklogClient,
    R: SpanCacheRepository,
{
    pub fn new(
        client: Arc<C>,
        cache: Arc<R>,
        pending: Arc<PendingWrites>,
        locks: Arc<SpanWriteLocks>,
    ) -> Self {
        Self {
            client,
            cache,
            pending,
            locks,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Apply new bounds to a span. The cache reflects the proposal for the
    /// whole round trip; on refusal it is restored to the exact pre-write
    /// state and the error surfaces to the caller.
    pub async fn apply(
        &self,
        span_id: SpanId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<TimeSpan, InfraError> {
        validate_proposed_range(start, end)?;

        let lock = self.locks.lock_for(span_id)?;
        let _guard = lock.lock().await;

        let snapshot = self.cache.snapshot_span_slots(span_id)?;
        let cached = self
            .cache
            .find_span(span_id)?
            .ok_or_else(|| InfraError::NotFound(format!("span {span_id} is not cached")))?;

        let mut speculative = match end {
            Some(end) => TimeSpan::closed(span_id, cached.entry_id, start, end),
            None => TimeSpan::open(span_id, cached.entry_id, start),
        };
        speculative.created_at = cached.created_at;
        self.cache.rewrite_span(&speculative)?;
        self.pending.register(span_id, start, end, (self.now_provider)())?;

        match self.client.update_span(span_id, encode_span_write(start, end)).await {
            Ok(authoritative) => {
                self.cache.rewrite_span(&authoritative)?;
                self.pending.clear(span_id)?;
                Ok(authoritative)
            }
            Err(error) => {
                self.cache.restore(&snapshot)?;
                self.pending.clear(span_id)?;
                Err(error)
            }
        }
    }

    /// Delete a span, optimistically dropping it from the cache first.
    pub async fn delete(&self, span_id: SpanId) -> Result<(), InfraError> {
        let lock = self.locks.lock_for(span_id)?;
        let _guard = lock.lock().await;

        let snapshot = self.cache.snapshot_span_slots(span_id)?;
        self.cache.remove_span(span_id)?;

        match self.client.delete_span(span_id).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.cache.restore(&snapshot)?;
                Err(error)
            }
        }
    }

    /// Fold one externally observed span into the cache, unless a pending
    /// write says the observation is stale.
    pub fn absorb_external(&self, span: &TimeSpan) -> Result<ExternalVerdict, InfraError> {
        let verdict = self.pending.gate_external(span, (self.now_provider)())?;
        if verdict == ExternalVerdict::Suppress {
            return Ok(verdict);
        }
        if self.cache.rewrite_span(span)? == 0 {
            let mut spans = self.cache.entry_spans(span.entry_id)?;
            spans.push(span.clone());
            self.cache.put_entry_spans(span.entry_id, spans)?;
        }
        Ok(verdict)
    }

    /// Fold an externally observed deletion into the cache, unless a write
    /// to that span is still in flight.
    pub fn absorb_external_removal(&self, span_id: SpanId) -> Result<ExternalVerdict, InfraError> {
        if self.pending.get_live(span_id, (self.now_provider)())?.is_some() {
            return Ok(ExternalVerdict::Suppress);
        }
        self.cache.remove_span(span_id)?;
        Ok(ExternalVerdict::Accept)
    }

    /// Replace the cached span list for an entry with the store's answer,
    /// keeping the locally written copy of any span whose write is still in
    /// flight.
    pub async fn refresh_entry(&self, entry_id: EntryId) -> Result<Vec<TimeSpan>, InfraError> {
        let remote = self.client.list_spans(entry_id).await?;
        let now = (self.now_provider)();

        let mut spans = Vec::with_capacity(remote.len());
        for span in remote {
            match self.pending.gate_external(&span, now)? {
                ExternalVerdict::Suppress => {
                    if let Some(cached) = self.cache.find_span(span.id)? {
                        spans.push(cached);
                    } else {
                        spans.push(span);
                    }
                }
                _ => spans.push(span),
            }
        }
        self.cache.put_entry_spans(entry_id, spans)?;
        self.cache.entry_spans(entry_id)
    }

    /// Collapse connectable spans of an entry on the record store, then
    /// refresh the cache from the store's post-merge state.
    pub async fn merge_entry_spans(
        &self,
        entry_id: EntryId,
        prefer: Option<SpanId>,
    ) -> Result<Vec<MergePlan>, InfraError> {
        let spans = self.client.list_spans(entry_id).await?;
        let plans = plan_connectable_merges(&spans, DEFAULT_GAP_MINUTES, prefer, (self.now_provider)());

        // The store may already hold part of a plan when a later call
        // fails, so the cache is refreshed from the store no matter how
        // dispatch went; the first dispatch error still surfaces.
        let mut dispatch: Result<(), InfraError> = Ok(());
        'plans: for plan in &plans {
            if let Err(error) = self
                .client
                .update_span(
                    plan.keeper_id,
                    encode_span_write(plan.merged_start, plan.merged_end),
                )
                .await
            {
                dispatch = Err(error);
                break;
            }
            for span_id in &plan.delete_ids {
                if let Err(error) = self.client.delete_span(*span_id).await {
                    dispatch = Err(error);
                    break 'plans;
                }
            }
        }

        let refreshed = self.refresh_entry(entry_id).await;
        dispatch?;
        refreshed?;
        Ok(plans)
    }
}
