// ============================================================================
// Event Sourcing Store - Generic Persistence Contracts
// ============================================================================
//
// Backends implement `EventStreamLedger` and `SnapshotStore`. The in-memory
// implementations are complete reference backends used by the demo and
// the tests.
//
// ============================================================================

pub mod ledger;
pub mod memory;
pub mod snapshot;

pub use ledger::{ConcurrencyConflict, CursorPolicy, EventStreamLedger, LedgerError, StoreError};
pub use memory::{InMemoryLedger, InMemorySnapshotStore};
pub use snapshot::SnapshotStore;
