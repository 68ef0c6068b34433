// ============================================================================
// Order Domain - Reference Domain For The Engine
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderItem, OrderStatus)
// - Events (OrderCreated, OrderConfirmed, etc.)
// - Commands (CreateOrder, ConfirmOrder, etc.), addressed by order id
// - Errors (OrderError enum)
// - State (OrderPayload) and the projector folding events into it
// - Command Handler (business rules)
//
// Nothing here knows about storage, versions or coordinators.
//
// ============================================================================

pub mod command_handler;
pub mod commands;
pub mod errors;
pub mod events;
pub mod projector;
pub mod state;
pub mod value_objects;

// Re-export for convenience
pub use command_handler::*;
pub use commands::*;
pub use errors::*;
pub use events::*;
pub use projector::*;
pub use state::*;
pub use value_objects::*;
