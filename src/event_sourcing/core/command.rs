use uuid::Uuid;

use super::event::{Event, EventMetadata};
use super::partition_key::PartitionKey;
use super::projector::Projector;

// ============================================================================
// Commands - Caller Intent Addressed To One Partition
// ============================================================================
//
// Flow: Command → CommandHandler (against current payload) → event payloads
//       → ledger append → fold into cached aggregate
//
// The handler only decides WHICH events to emit. It never touches storage
// and never sees versions or ids.
//
// ============================================================================

/// A command knows which partition it addresses.
pub trait Command: Send + 'static {
    fn partition_key(&self) -> PartitionKey;
}

pub trait CommandHandler: Send + Sync + 'static {
    type Projector: Projector;
    type Command: Command;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Business rules: validate `command` against the current payload and
    /// return the event payloads to append (possibly none).
    fn handle(
        &self,
        payload: &<Self::Projector as Projector>::Payload,
        command: &Self::Command,
    ) -> Result<Vec<<Self::Projector as Projector>::Event>, Self::Error>;
}

/// Tracing context copied onto every event a command produces.
#[derive(Debug, Clone, Default)]
pub struct CommandMetadata {
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub user_id: Option<String>,
}

impl CommandMetadata {
    pub fn correlated(correlation_id: Uuid) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Self::default()
        }
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Metadata for one emitted event. A missing correlation id is replaced
    /// by a fresh one shared by all events of the same command.
    pub(crate) fn to_event_metadata(&self, fallback_correlation: Uuid) -> EventMetadata {
        let mut metadata = EventMetadata::new(self.correlation_id.unwrap_or(fallback_correlation));
        metadata.causation_id = self.causation_id;
        metadata.user_id = self.user_id.clone();
        metadata
    }
}

/// Result of a successful command.
#[derive(Debug, Clone)]
pub struct CommandOutcome<E> {
    /// Events appended by this command, empty when the handler emitted none.
    pub events: Vec<Event<E>>,
    /// Aggregate version after the command.
    pub version: u64,
}
