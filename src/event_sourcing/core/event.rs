use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::partition_key::PartitionKey;
use super::sortable_id::SortableId;

// ============================================================================
// Event Envelope - Stored Event With Ordering Metadata
// ============================================================================
//
// `NewEvent` is what a coordinator proposes; the ledger turns it into an
// `Event` by stamping the sortable id and the per-partition version.
// Once appended an `Event` is never modified.
//
// ============================================================================

/// Causation, correlation and actor information carried by every event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventMetadata {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub user_id: Option<String>,
}

impl EventMetadata {
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id,
            causation_id: None,
            user_id: None,
        }
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// An event payload waiting to be appended.
#[derive(Clone, Debug)]
pub struct NewEvent<E> {
    pub payload: E,
    pub metadata: EventMetadata,
}

impl<E> NewEvent<E> {
    pub fn new(payload: E, metadata: EventMetadata) -> Self {
        Self { payload, metadata }
    }
}

/// An appended, immutable event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event<E> {
    pub id: SortableId,
    pub partition_key: PartitionKey,
    pub aggregate_type: String,
    pub event_type: String,
    /// 1-based, contiguous within the partition.
    pub version: u64,
    pub payload: E,
    pub metadata: EventMetadata,
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Implemented by every event payload type (usually one enum per aggregate).
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Type tag of this particular variant, e.g. `"OrderCreated"`.
    fn event_type(&self) -> &'static str;

    /// Every tag this type can produce; used to build a codec registry.
    fn event_types() -> &'static [&'static str]
    where
        Self: Sized;

    /// Schema revision written alongside new payloads.
    fn schema_version() -> u32
    where
        Self: Sized,
    {
        1
    }
}

// ============================================================================
// Tests
// ============================================================================
