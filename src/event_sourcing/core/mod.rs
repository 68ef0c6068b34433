// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// Key Principles:
// - No domain-specific code (no Order, Customer, Product, etc.)
// - Generic over projector, event and payload types
// - No I/O: storage contracts live in `store`
//
// ============================================================================

pub mod aggregate;
pub mod codec;
pub mod command;
pub mod event;
pub mod partition_key;
pub mod projector;
pub mod sortable_id;

// Re-export core types for convenience
pub use aggregate::{Aggregate, ProjectionError};
pub use codec::{CodecError, EventTypeRegistry, EventUpcaster, SerializedEvent};
pub use command::{Command, CommandHandler, CommandMetadata, CommandOutcome};
pub use event::{DomainEvent, Event, EventMetadata, NewEvent};
pub use partition_key::{PartitionKey, ParseError, DEFAULT_GROUP, DEFAULT_ROOT_PARTITION_KEY};
pub use projector::Projector;
pub use sortable_id::{SortableId, SortableIdError, SortableIdGenerator};
