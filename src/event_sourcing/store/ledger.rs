use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::{CodecError, DomainEvent, Event, NewEvent, PartitionKey, SortableId};
use crate::utils::IsTransient;

// ============================================================================
// Event Stream Ledger - Append-Only Log Per Partition
// ============================================================================
//
// The ledger is the only authority on what happened. Concurrency is decided
// here and only here: an append names the last id the writer has seen, and
// the ledger refuses the whole batch if its stream has moved on since.
//
// Guarantees every implementation must give:
// - versions within a partition are 1..N without gaps or duplicates
// - ids within a partition strictly increase in append order
// - a batch is persisted entirely or not at all
// - of two appends racing on the same expected id, exactly one wins
//
// ============================================================================

/// The writer's view of the stream was stale.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("concurrency conflict: expected last id {expected:?}, actual {actual:?}")]
pub struct ConcurrencyConflict {
    pub expected: Option<SortableId>,
    pub actual: Option<SortableId>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("event codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("corrupt data for partition {partition}: {reason}")]
    Corrupt { partition: String, reason: String },
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        // Codec and corruption failures will not heal by retrying.
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),

    #[error("cursor {0} not found in partition")]
    CursorNotFound(SortableId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IsTransient for LedgerError {
    fn is_transient(&self) -> bool {
        match self {
            LedgerError::Conflict(_) => true,
            LedgerError::CursorNotFound(_) => false,
            LedgerError::Store(e) => e.is_transient(),
        }
    }
}

/// What `get_events_since` does with a cursor that is not in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorPolicy {
    /// Serve the whole stream, as if no cursor was given.
    #[default]
    FromStart,
    /// Serve nothing.
    Empty,
    /// Fail with `LedgerError::CursorNotFound`.
    Reject,
}

#[async_trait]
pub trait EventStreamLedger: Send + Sync {
    type Event: DomainEvent;

    /// Append `events` if the partition's last id equals `expected_last_id`
    /// (`None` for an empty stream). Returns the stored events with their
    /// assigned ids and versions. An empty batch is a no-op and skips the
    /// concurrency check.
    async fn append_events(
        &self,
        partition_key: &PartitionKey,
        expected_last_id: Option<&SortableId>,
        events: Vec<NewEvent<Self::Event>>,
    ) -> Result<Vec<Event<Self::Event>>, LedgerError>;

    /// Events with id greater than `from_id`, ascending. `limit` truncates
    /// when positive.
    async fn get_events_since(
        &self,
        partition_key: &PartitionKey,
        from_id: Option<&SortableId>,
        limit: Option<usize>,
    ) -> Result<Vec<Event<Self::Event>>, LedgerError>;

    async fn get_all_events(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Vec<Event<Self::Event>>, LedgerError> {
        self.get_events_since(partition_key, None, None).await
    }

    async fn get_last_id(&self, partition_key: &PartitionKey) -> Result<Option<SortableId>, LedgerError>;
}
