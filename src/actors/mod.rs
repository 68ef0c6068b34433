// ============================================================================
// Actors Module
// ============================================================================
//
// Partition-addressed single-writer coordinators.
//
// Structure:
// - coordinator     - State machine materializing one partition
// - partition_actor - Tokio task + mailbox driving one coordinator
// - router          - Routing table, spawn / respawn, public operations
// - errors          - Errors surfaced to callers
//
// Note: business rules live in CommandHandlers (src/domain), never here.
//
// ============================================================================

mod coordinator;
mod errors;
mod partition_actor;
mod router;

pub use coordinator::{AggregateCoordinator, CoordinatorContext, EventOf, PayloadOf};
pub use errors::{CommandError, StateError};
pub use router::PartitionRouter;
