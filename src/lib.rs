// ============================================================================
// partition_es - Partition-Addressed Event Sourcing Engine
// ============================================================================
//
// Layers, leaves first:
// - event_sourcing::core  - ids, partition keys, events, codec, projector,
//                           aggregate fold, command traits
// - event_sourcing::store - ledger / snapshot contracts + in-memory backends
// - actors                - single-writer coordinator per partition, router
// - domain                - reference order domain
//
// ============================================================================

pub mod actors;
pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod metrics;
pub mod utils;

pub use actors::{CommandError, PartitionRouter, StateError};
pub use config::{ConfigError, EngineConfig};
pub use metrics::EngineMetrics;
