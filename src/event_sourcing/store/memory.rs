use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::event_sourcing::core::{
    Aggregate, CodecError, DomainEvent, Event, EventMetadata, EventTypeRegistry, NewEvent,
    PartitionKey, SerializedEvent, SortableId, SortableIdGenerator,
};

use super::ledger::{ConcurrencyConflict, CursorPolicy, EventStreamLedger, LedgerError, StoreError};
use super::snapshot::SnapshotStore;

// ============================================================================
// In-Memory Backends - Reference Ledger And Snapshot Store
// ============================================================================
//
// Payloads are stored in their serialized form so that every read goes
// through the codec exactly like a real backend would.
//
// The concurrency check and the append happen under one lock, so of two
// appends racing on the same expected id exactly one wins.
//
// ============================================================================

#[derive(Debug, Clone)]
struct StoredRecord {
    id: SortableId,
    version: u64,
    aggregate_type: String,
    metadata: EventMetadata,
    body: SerializedEvent,
}

pub struct InMemoryLedger<E: DomainEvent> {
    streams: Mutex<HashMap<PartitionKey, Vec<StoredRecord>>>,
    registry: Arc<EventTypeRegistry<E>>,
    ids: SortableIdGenerator,
    cursor_policy: CursorPolicy,
}

impl<E: DomainEvent> InMemoryLedger<E> {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(EventTypeRegistry::for_domain()))
    }

    pub fn with_registry(registry: Arc<EventTypeRegistry<E>>) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            registry,
            ids: SortableIdGenerator::new(),
            cursor_policy: CursorPolicy::default(),
        }
    }

    pub fn with_cursor_policy(mut self, cursor_policy: CursorPolicy) -> Self {
        self.cursor_policy = cursor_policy;
        self
    }

    /// Number of events stored for a partition.
    pub async fn stream_len(&self, partition_key: &PartitionKey) -> usize {
        self.streams
            .lock()
            .await
            .get(partition_key)
            .map_or(0, Vec::len)
    }

    fn rehydrate(&self, partition_key: &PartitionKey, record: &StoredRecord) -> Result<Event<E>, StoreError> {
        let payload = self.registry.decode(&record.body)?;
        Ok(Event {
            id: record.id.clone(),
            partition_key: partition_key.clone(),
            aggregate_type: record.aggregate_type.clone(),
            event_type: record.body.type_tag.clone(),
            version: record.version,
            payload,
            metadata: record.metadata.clone(),
        })
    }
}

impl<E: DomainEvent> Default for InMemoryLedger<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: DomainEvent> EventStreamLedger for InMemoryLedger<E> {
    type Event = E;

    async fn append_events(
        &self,
        partition_key: &PartitionKey,
        expected_last_id: Option<&SortableId>,
        events: Vec<NewEvent<E>>,
    ) -> Result<Vec<Event<E>>, LedgerError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        // Encode outside the lock; a codec failure persists nothing.
        let encoded = events
            .iter()
            .map(|event| self.registry.encode(&event.payload))
            .collect::<Result<Vec<_>, CodecError>>()
            .map_err(StoreError::from)?;

        let mut streams = self.streams.lock().await;
        let stream = streams.entry(partition_key.clone()).or_default();

        let actual = stream.last().map(|record| record.id.clone());
        if actual.as_ref() != expected_last_id {
            tracing::debug!(
                partition = %partition_key,
                expected = ?expected_last_id,
                actual = ?actual,
                "Rejected append on stale expected id"
            );
            return Err(ConcurrencyConflict {
                expected: expected_last_id.cloned(),
                actual,
            }
            .into());
        }

        let mut next_version = stream.last().map_or(0, |record| record.version);
        let mut appended = Vec::with_capacity(events.len());

        for (event, body) in events.into_iter().zip(encoded) {
            next_version += 1;
            let record = StoredRecord {
                id: self.ids.next_id(),
                version: next_version,
                aggregate_type: partition_key.group().to_string(),
                metadata: event.metadata.clone(),
                body,
            };

            appended.push(Event {
                id: record.id.clone(),
                partition_key: partition_key.clone(),
                aggregate_type: record.aggregate_type.clone(),
                event_type: record.body.type_tag.clone(),
                version: record.version,
                payload: event.payload,
                metadata: event.metadata,
            });
            stream.push(record);
        }

        tracing::debug!(
            partition = %partition_key,
            event_count = appended.len(),
            version = next_version,
            "Appended events to ledger"
        );

        Ok(appended)
    }

    async fn get_events_since(
        &self,
        partition_key: &PartitionKey,
        from_id: Option<&SortableId>,
        limit: Option<usize>,
    ) -> Result<Vec<Event<E>>, LedgerError> {
        let streams = self.streams.lock().await;
        let stream = streams.get(partition_key).map(Vec::as_slice).unwrap_or(&[]);

        let start = match from_id {
            None => 0,
            Some(cursor) => match stream.iter().position(|record| &record.id == cursor) {
                Some(index) => index + 1,
                None => match self.cursor_policy {
                    CursorPolicy::FromStart => {
                        tracing::warn!(
                            partition = %partition_key,
                            cursor = %cursor,
                            "Cursor not found, serving stream from start"
                        );
                        0
                    }
                    CursorPolicy::Empty => stream.len(),
                    CursorPolicy::Reject => return Err(LedgerError::CursorNotFound(cursor.clone())),
                },
            },
        };

        let take = match limit {
            Some(n) if n > 0 => n,
            _ => usize::MAX,
        };

        let events = stream[start..]
            .iter()
            .take(take)
            .map(|record| self.rehydrate(partition_key, record))
            .collect::<Result<Vec<_>, StoreError>>()?;

        tracing::debug!(
            partition = %partition_key,
            event_count = events.len(),
            "Read events from ledger"
        );

        Ok(events)
    }

    async fn get_last_id(&self, partition_key: &PartitionKey) -> Result<Option<SortableId>, LedgerError> {
        let streams = self.streams.lock().await;
        Ok(streams
            .get(partition_key)
            .and_then(|stream| stream.last())
            .map(|record| record.id.clone()))
    }
}

// ============================================================================
// Snapshot Store
// ============================================================================

pub struct InMemorySnapshotStore<P> {
    snapshots: RwLock<HashMap<PartitionKey, Vec<u8>>>,
    _phantom: PhantomData<fn() -> P>,
}

impl<P> InMemorySnapshotStore<P> {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            _phantom: PhantomData,
        }
    }

    /// Drop a snapshot, as if the cache backend lost it.
    pub async fn evict(&self, partition_key: &PartitionKey) -> bool {
        self.snapshots.write().await.remove(partition_key).is_some()
    }

    pub async fn contains(&self, partition_key: &PartitionKey) -> bool {
        self.snapshots.read().await.contains_key(partition_key)
    }
}

impl<P> Default for InMemorySnapshotStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P> SnapshotStore for InMemorySnapshotStore<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Payload = P;

    async fn save(&self, partition_key: &PartitionKey, aggregate: &Aggregate<P>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(aggregate).map_err(|e| StoreError::Codec(e.into()))?;
        self.snapshots.write().await.insert(partition_key.clone(), bytes);

        tracing::debug!(
            partition = %partition_key,
            version = aggregate.version,
            "Saved snapshot"
        );
        Ok(())
    }

    async fn load(&self, partition_key: &PartitionKey) -> Result<Option<Aggregate<P>>, StoreError> {
        let snapshots = self.snapshots.read().await;
        let Some(bytes) = snapshots.get(partition_key) else {
            return Ok(None);
        };

        match serde_json::from_slice(bytes) {
            Ok(aggregate) => Ok(Some(aggregate)),
            Err(e) => {
                tracing::warn!(
                    partition = %partition_key,
                    error = %e,
                    "Unreadable snapshot, treating as missing"
                );
                Ok(None)
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
