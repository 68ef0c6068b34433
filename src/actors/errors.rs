use crate::event_sourcing::core::{PartitionKey, ProjectionError};
use crate::event_sourcing::store::{ConcurrencyConflict, StoreError};
use crate::utils::IsTransient;

// ============================================================================
// Coordinator Errors
// ============================================================================

/// Why a command did not produce a committed outcome. In every case the
/// ledger is unchanged by this command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError<D> {
    /// Another writer appended first. The coordinator has already
    /// resynchronized; the caller may re-submit.
    #[error(transparent)]
    Conflict(ConcurrencyConflict),

    #[error("command rejected: {0}")]
    Domain(D),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("aggregate could not be materialized: {0}")]
    Projection(#[from] ProjectionError),

    #[error("partition coordinator is gone")]
    CoordinatorGone,

    /// The command addresses another partition than the one it was sent to.
    #[error("command for partition {command} sent to partition {target}")]
    Misaddressed { target: PartitionKey, command: PartitionKey },
}

impl<D> From<StateError> for CommandError<D> {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Store(e) => CommandError::Store(e),
            StateError::Projection(e) => CommandError::Projection(e),
            StateError::CoordinatorGone => CommandError::CoordinatorGone,
        }
    }
}

impl<D> IsTransient for CommandError<D> {
    fn is_transient(&self) -> bool {
        match self {
            CommandError::Conflict(_) => true,
            CommandError::Store(e) => e.is_transient(),
            CommandError::Domain(_)
            | CommandError::Projection(_)
            | CommandError::CoordinatorGone
            | CommandError::Misaddressed { .. } => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("aggregate could not be materialized: {0}")]
    Projection(#[from] ProjectionError),

    #[error("partition coordinator is gone")]
    CoordinatorGone,
}

impl<D> CommandError<D> {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Conflict(_) => "conflict",
            CommandError::Domain(_) => "rejected",
            CommandError::Store(_) => "store_error",
            CommandError::Projection(_) => "projection_error",
            CommandError::CoordinatorGone => "coordinator_gone",
            CommandError::Misaddressed { .. } => "misaddressed",
        }
    }
}
