use serde::de::DeserializeOwned;
use serde::Serialize;

use super::event::{DomainEvent, Event};
use super::partition_key::PartitionKey;

// ============================================================================
// Projector - Pure Fold From Events To State
// ============================================================================
//
// `apply` must be deterministic and total. Combinations of payload variant
// and event that the projector does not recognise return the payload
// unchanged; they are never an error.
//
// `type_name`/`version` identify the projection logic revision. A cached
// or snapshotted aggregate carrying a different pair was built by other
// logic and gets rebuilt from the ledger.
//
// ============================================================================

pub trait Projector: Send + Sync + 'static {
    type Payload: Serialize
        + DeserializeOwned
        + Clone
        + PartialEq
        + std::fmt::Debug
        + Send
        + Sync
        + 'static;
    type Event: DomainEvent;

    fn type_name(&self) -> &str;

    fn version(&self) -> &str;

    /// The "empty" payload a partition starts from.
    fn initial_state(&self, partition_key: &PartitionKey) -> Self::Payload;

    fn apply(&self, payload: Self::Payload, event: &Event<Self::Event>) -> Self::Payload;
}
