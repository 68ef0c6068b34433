use async_trait::async_trait;

use crate::event_sourcing::core::{Aggregate, PartitionKey};

use super::ledger::StoreError;

// ============================================================================
// Snapshot Store - Cached Materializations
// ============================================================================
//
// Snapshots bound replay cost. They are never authoritative: a missing,
// stale or unreadable snapshot only means the aggregate is rebuilt from
// the ledger. Last write wins.
//
// ============================================================================

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    type Payload: Send + Sync + 'static;

    async fn save(
        &self,
        partition_key: &PartitionKey,
        aggregate: &Aggregate<Self::Payload>,
    ) -> Result<(), StoreError>;

    async fn load(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<Aggregate<Self::Payload>>, StoreError>;
}
