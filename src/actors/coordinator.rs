use std::sync::Arc;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::event_sourcing::core::{
    Aggregate, CommandHandler, CommandMetadata, CommandOutcome, Event, NewEvent, PartitionKey,
    Projector, SortableId,
};
use crate::event_sourcing::store::{EventStreamLedger, LedgerError, SnapshotStore, StoreError};
use crate::metrics::EngineMetrics;
use crate::utils::{retry_on_transient, CircuitBreaker, CircuitBreakerError};

use super::errors::{CommandError, StateError};

// ============================================================================
// Aggregate Coordinator - Single Writer For One Partition
// ============================================================================
//
// Responsibilities:
// - Keeps the materialized aggregate of one partition in memory
// - Detects a stale cache (new events in the ledger, projector revision
//   changed) and refreshes or rebuilds it
// - Runs commands against the cached payload and appends their events
//   under the optimistic concurrency check
// - Persists snapshots, best-effort
//
// Lifecycle:
//
//   Uninitialized ──snapshot ok──────────────► Ready
//        │                                      │ ▲
//        └──no snapshot / stale / unreadable──► FullRebuild
//                                               │
//   Ready ──last id moved──► delta fold ──gap──►┘
//
// The coordinator is driven by exactly one task (see `partition_actor`),
// so none of its methods need interior locking.
//
// ============================================================================

pub type PayloadOf<H> = <<H as CommandHandler>::Projector as Projector>::Payload;
pub type EventOf<H> = <<H as CommandHandler>::Projector as Projector>::Event;

/// Everything coordinators of one router share.
pub struct CoordinatorContext<H: CommandHandler> {
    pub projector: Arc<H::Projector>,
    pub handler: Arc<H>,
    pub ledger: Arc<dyn EventStreamLedger<Event = EventOf<H>>>,
    pub snapshots: Arc<dyn SnapshotStore<Payload = PayloadOf<H>>>,
    pub config: EngineConfig,
    pub metrics: Arc<EngineMetrics>,
    pub snapshot_breaker: CircuitBreaker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebuildReason {
    NoSnapshot,
    ProjectorChanged,
    DeltaRejected,
    Forced,
}

impl RebuildReason {
    fn as_str(self) -> &'static str {
        match self {
            RebuildReason::NoSnapshot => "no_snapshot",
            RebuildReason::ProjectorChanged => "projector_version",
            RebuildReason::DeltaRejected => "delta_rejected",
            RebuildReason::Forced => "forced",
        }
    }
}

pub struct AggregateCoordinator<H: CommandHandler> {
    ctx: Arc<CoordinatorContext<H>>,
    partition_key: PartitionKey,
    cached: Option<Aggregate<PayloadOf<H>>>,
    dirty: bool,
    events_since_snapshot: u64,
}

impl<H: CommandHandler> AggregateCoordinator<H> {
    pub fn new(ctx: Arc<CoordinatorContext<H>>, partition_key: PartitionKey) -> Self {
        Self {
            ctx,
            partition_key,
            cached: None,
            dirty: false,
            events_since_snapshot: 0,
        }
    }

    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    /// The cached aggregate, if one is loaded. Never touches storage.
    pub fn cached(&self) -> Option<&Aggregate<PayloadOf<H>>> {
        self.cached.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Bring the cache up to date with the ledger and return it.
    ///
    /// A failed refresh leaves a previously cached aggregate in place.
    pub async fn ensure_loaded(&mut self) -> Result<&Aggregate<PayloadOf<H>>, StateError> {
        let current = match self.cached.take() {
            Some(aggregate) if aggregate.is_built_by(&*self.ctx.projector) => aggregate,
            Some(stale) => {
                tracing::info!(
                    partition = %self.partition_key,
                    cached_version = %stale.projector_version,
                    projector_version = %self.ctx.projector.version(),
                    "Projector changed, rebuilding cached aggregate"
                );
                let rebuilt = self.full_rebuild(RebuildReason::ProjectorChanged).await?;
                self.mark_dirty(0);
                rebuilt
            }
            None => self.load().await?,
        };

        match self.refresh(&current).await {
            Ok(Some(newer)) => {
                self.mark_dirty(newer.version.saturating_sub(current.version));
                let cached: &Aggregate<PayloadOf<H>> = self.cached.insert(newer);
                Ok(cached)
            }
            Ok(None) => {
                let cached: &Aggregate<PayloadOf<H>> = self.cached.insert(current);
                Ok(cached)
            }
            Err(e) => {
                self.cached = Some(current);
                Err(e)
            }
        }
    }

    pub async fn get_state(&mut self) -> Result<Aggregate<PayloadOf<H>>, StateError> {
        self.ensure_loaded().await.cloned()
    }

    /// Validate `command` against the current state and append what it
    /// emits. Never retries: a conflict resynchronizes the cache and is
    /// reported to the caller.
    pub async fn execute(
        &mut self,
        command: H::Command,
        metadata: CommandMetadata,
    ) -> Result<CommandOutcome<EventOf<H>>, CommandError<H::Error>> {
        let ctx = self.ctx.clone();

        let current = self.ensure_loaded().await?;
        let payloads = ctx
            .handler
            .handle(&current.payload, &command)
            .map_err(CommandError::Domain)?;
        let version = current.version;
        let expected = current.last_applied_id.clone();

        if payloads.is_empty() {
            return Ok(CommandOutcome {
                events: Vec::new(),
                version,
            });
        }

        let correlation_id = Uuid::new_v4();
        let new_events = payloads
            .into_iter()
            .map(|payload| NewEvent::new(payload, metadata.to_event_metadata(correlation_id)))
            .collect();

        match ctx
            .ledger
            .append_events(&self.partition_key, expected.as_ref(), new_events)
            .await
        {
            Ok(appended) => {
                ctx.metrics.record_appended(appended.len());
                self.apply_appended(&appended);
                Ok(CommandOutcome {
                    version: appended.last().map_or(version, |event| event.version),
                    events: appended,
                })
            }
            Err(LedgerError::Conflict(conflict)) => {
                ctx.metrics.record_conflict();
                tracing::info!(
                    partition = %self.partition_key,
                    expected = ?conflict.expected,
                    actual = ?conflict.actual,
                    "Concurrency conflict, resynchronizing"
                );
                if let Err(e) = self.ensure_loaded().await {
                    tracing::warn!(
                        partition = %self.partition_key,
                        error = %e,
                        "Resynchronization after conflict failed"
                    );
                }
                Err(CommandError::Conflict(conflict))
            }
            Err(LedgerError::Store(e)) => Err(CommandError::Store(e)),
            Err(other @ LedgerError::CursorNotFound(_)) => Err(CommandError::Store(self.corrupt(other))),
        }
    }

    /// Forced full replay, followed by an immediate snapshot attempt.
    pub async fn rebuild(&mut self) -> Result<Aggregate<PayloadOf<H>>, StateError> {
        let rebuilt = self.full_rebuild(RebuildReason::Forced).await?;
        self.cached = Some(rebuilt.clone());
        self.mark_dirty(0);
        self.flush_snapshot().await;
        Ok(rebuilt)
    }

    /// True when enough events were applied since the last snapshot.
    pub fn snapshot_due(&self) -> bool {
        let every = self.ctx.config.snapshot_every_events;
        self.dirty && every > 0 && self.events_since_snapshot >= every
    }

    /// Save the cache if dirty. Failures are logged and counted only.
    pub async fn flush_snapshot(&mut self) {
        if !self.dirty {
            return;
        }
        let Some(aggregate) = self.cached.as_ref() else {
            return;
        };

        let result = self
            .ctx
            .snapshot_breaker
            .call(self.ctx.snapshots.save(&self.partition_key, aggregate))
            .await;

        match result {
            Ok(()) => {
                self.dirty = false;
                self.events_since_snapshot = 0;
                self.ctx.metrics.record_snapshot_write("ok");
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                self.ctx.metrics.record_snapshot_write("skipped");
                tracing::debug!(partition = %self.partition_key, "Snapshot store circuit open, skipping");
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                self.ctx.metrics.record_snapshot_write("failed");
                tracing::warn!(
                    partition = %self.partition_key,
                    error = %e,
                    "Snapshot write failed"
                );
            }
        }
    }

    fn apply_appended(&mut self, appended: &[Event<EventOf<H>>]) {
        let Some(cached) = self.cached.take() else {
            return;
        };

        match cached.project(&*self.ctx.projector, appended) {
            Ok(aggregate) => {
                self.cached = Some(aggregate);
                self.mark_dirty(appended.len() as u64);
            }
            Err(e) => {
                // Appended events are durable; the cache is rebuilt on next use.
                tracing::warn!(
                    partition = %self.partition_key,
                    error = %e,
                    "Could not fold appended events, dropping cache"
                );
            }
        }
    }

    fn mark_dirty(&mut self, applied: u64) {
        self.dirty = true;
        self.events_since_snapshot += applied;
    }

    async fn load(&mut self) -> Result<Aggregate<PayloadOf<H>>, StateError> {
        let reason = match self.load_snapshot().await {
            Some(snapshot) if snapshot.is_built_by(&*self.ctx.projector) => {
                tracing::debug!(
                    partition = %self.partition_key,
                    version = snapshot.version,
                    "Adopted snapshot"
                );
                return Ok(snapshot);
            }
            Some(_) => RebuildReason::ProjectorChanged,
            None => RebuildReason::NoSnapshot,
        };

        let rebuilt = self.full_rebuild(reason).await?;
        self.mark_dirty(0);
        Ok(rebuilt)
    }

    async fn load_snapshot(&self) -> Option<Aggregate<PayloadOf<H>>> {
        match self.ctx.snapshots.load(&self.partition_key).await {
            Ok(Some(snapshot)) if snapshot.partition_key == self.partition_key => Some(snapshot),
            Ok(Some(snapshot)) => {
                tracing::warn!(
                    partition = %self.partition_key,
                    found = %snapshot.partition_key,
                    "Snapshot belongs to another partition, ignoring"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    partition = %self.partition_key,
                    error = %e,
                    "Snapshot read failed, treating as missing"
                );
                None
            }
        }
    }

    /// `Some(newer)` when the ledger moved past `current`.
    async fn refresh(
        &self,
        current: &Aggregate<PayloadOf<H>>,
    ) -> Result<Option<Aggregate<PayloadOf<H>>>, StateError> {
        let last_id = self.read_last_id().await?;
        if last_id == current.last_applied_id {
            return Ok(None);
        }

        let delta = match self.read_since(current.last_applied_id.as_ref()).await {
            Ok(delta) => delta,
            Err(LedgerError::CursorNotFound(cursor)) => {
                tracing::warn!(
                    partition = %self.partition_key,
                    cursor = %cursor,
                    "Cached cursor unknown to ledger, rebuilding"
                );
                return self.full_rebuild(RebuildReason::DeltaRejected).await.map(Some);
            }
            Err(e) => return Err(self.read_failure(e)),
        };

        tracing::debug!(
            partition = %self.partition_key,
            from_version = current.version,
            event_count = delta.len(),
            "Folding ledger delta"
        );

        match current.clone().project(&*self.ctx.projector, &delta) {
            Ok(newer) if reaches(&newer, last_id.as_ref(), &delta) => Ok(Some(newer)),
            Ok(_) => {
                tracing::warn!(
                    partition = %self.partition_key,
                    cached_id = ?current.last_applied_id,
                    ledger_id = ?last_id,
                    event_count = delta.len(),
                    "Delta does not reach the ledger head, rebuilding"
                );
                self.full_rebuild(RebuildReason::DeltaRejected).await.map(Some)
            }
            Err(e) => {
                tracing::warn!(
                    partition = %self.partition_key,
                    error = %e,
                    "Delta could not be folded, rebuilding"
                );
                self.full_rebuild(RebuildReason::DeltaRejected).await.map(Some)
            }
        }
    }

    async fn full_rebuild(&self, reason: RebuildReason) -> Result<Aggregate<PayloadOf<H>>, StateError> {
        let events = self.read_since(None).await.map_err(|e| self.read_failure(e))?;
        let aggregate = Aggregate::fold_all(&*self.ctx.projector, self.partition_key.clone(), &events)?;

        self.ctx.metrics.record_rebuild(reason.as_str());
        tracing::info!(
            partition = %self.partition_key,
            reason = reason.as_str(),
            version = aggregate.version,
            "Rebuilt aggregate from ledger"
        );
        Ok(aggregate)
    }

    async fn read_last_id(&self) -> Result<Option<SortableId>, StateError> {
        let ledger = &self.ctx.ledger;
        let partition_key = &self.partition_key;
        retry_on_transient(&self.ctx.config.store_retry, |_attempt| ledger.get_last_id(partition_key))
            .await
            .into_result()
            .map_err(|e| self.read_failure(e))
    }

    async fn read_since(&self, from_id: Option<&SortableId>) -> Result<Vec<Event<EventOf<H>>>, LedgerError> {
        let ledger = &self.ctx.ledger;
        let partition_key = &self.partition_key;
        retry_on_transient(&self.ctx.config.store_retry, |_attempt| {
            ledger.get_events_since(partition_key, from_id, None)
        })
        .await
        .into_result()
    }

    fn read_failure(&self, err: LedgerError) -> StateError {
        match err {
            LedgerError::Store(e) => StateError::Store(e),
            other => StateError::Store(self.corrupt(other)),
        }
    }

    fn corrupt(&self, err: LedgerError) -> StoreError {
        StoreError::Corrupt {
            partition: self.partition_key.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Whether folding `delta` brought the cache up to the ledger head read
/// just before. An empty delta while the head moved means the ledger did
/// not recognize the cached cursor; a cursor the ledger never issued (e.g.
/// from a foreign snapshot) must not be trusted.
fn reaches<P, E>(folded: &Aggregate<P>, ledger_head: Option<&SortableId>, delta: &[Event<E>]) -> bool {
    if delta.is_empty() {
        return false;
    }
    match (ledger_head, folded.last_applied_id.as_ref()) {
        (Some(head), Some(applied)) => applied >= head,
        _ => false,
    }
}
