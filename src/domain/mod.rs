// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each domain has its own subdirectory with value objects, events,
// commands, errors, a projector and a command handler.
//
// This layer is completely separate from the event sourcing infrastructure.
//
// ============================================================================

pub mod order;
