use serde::{Deserialize, Serialize};

use super::event::Event;
use super::partition_key::PartitionKey;
use super::projector::Projector;
use super::sortable_id::SortableId;

// ============================================================================
// Aggregate - Materialized State Of One Partition
// ============================================================================
//
// Key Principles:
// 1. `payload` is the fold of events 1..=version through the named projector
// 2. Events are folded strictly in version order, one at a time
// 3. The aggregate remembers which projector revision built it
// 4. A snapshot is just a serialized Aggregate and is never authoritative
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error("expected version {expected}, got {found}")]
    VersionGap { expected: u64, found: u64 },

    #[error("event id {found} does not follow last applied id {last}")]
    NonIncreasingId { last: SortableId, found: SortableId },

    #[error("event for partition {found} cannot be applied to {expected}")]
    PartitionMismatch {
        expected: PartitionKey,
        found: PartitionKey,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Aggregate<P> {
    pub partition_key: PartitionKey,
    pub payload: P,
    pub version: u64,
    pub last_applied_id: Option<SortableId>,
    pub projector_type_name: String,
    pub projector_version: String,
}

impl<P: Clone> Aggregate<P> {
    /// Aggregate at version 0 holding the projector's initial state.
    pub fn empty<R>(projector: &R, partition_key: PartitionKey) -> Self
    where
        R: Projector<Payload = P>,
    {
        Self {
            payload: projector.initial_state(&partition_key),
            partition_key,
            version: 0,
            last_applied_id: None,
            projector_type_name: projector.type_name().to_string(),
            projector_version: projector.version().to_string(),
        }
    }

    /// Full replay: fold every event from the initial state.
    pub fn fold_all<R>(
        projector: &R,
        partition_key: PartitionKey,
        events: &[Event<R::Event>],
    ) -> Result<Self, ProjectionError>
    where
        R: Projector<Payload = P>,
    {
        Self::empty(projector, partition_key).project(projector, events)
    }

    /// Fold `events` on top of this aggregate.
    ///
    /// Each event must carry exactly the next version, an id greater than
    /// the last applied one, and this aggregate's partition key. On error
    /// the aggregate is consumed; callers keep a clone or rebuild.
    pub fn project<R>(mut self, projector: &R, events: &[Event<R::Event>]) -> Result<Self, ProjectionError>
    where
        R: Projector<Payload = P>,
    {
        for event in events {
            if event.partition_key != self.partition_key {
                return Err(ProjectionError::PartitionMismatch {
                    expected: self.partition_key.clone(),
                    found: event.partition_key.clone(),
                });
            }
            if event.version != self.version + 1 {
                return Err(ProjectionError::VersionGap {
                    expected: self.version + 1,
                    found: event.version,
                });
            }
            if let Some(last) = &self.last_applied_id {
                if event.id <= *last {
                    return Err(ProjectionError::NonIncreasingId {
                        last: last.clone(),
                        found: event.id.clone(),
                    });
                }
            }

            self.payload = projector.apply(self.payload, event);
            self.version = event.version;
            self.last_applied_id = Some(event.id.clone());
        }

        Ok(self)
    }

    /// True when this aggregate was produced by the same projector revision.
    pub fn is_built_by<R>(&self, projector: &R) -> bool
    where
        R: Projector<Payload = P>,
    {
        self.projector_type_name == projector.type_name()
            && self.projector_version == projector.version()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::event::{DomainEvent, EventMetadata};

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    enum CounterEvent {
        Added(i64),
        Reset,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Added(_) => "Added",
                CounterEvent::Reset => "Reset",
            }
        }

        fn event_types() -> &'static [&'static str] {
            &["Added", "Reset"]
        }
    }

    struct CounterProjector {
        version: &'static str,
    }

    impl Projector for CounterProjector {
        type Payload = i64;
        type Event = CounterEvent;

        fn type_name(&self) -> &str {
            "Counter"
        }

        fn version(&self) -> &str {
            self.version
        }

        fn initial_state(&self, _partition_key: &PartitionKey) -> i64 {
            0
        }

        fn apply(&self, payload: i64, event: &Event<CounterEvent>) -> i64 {
            match event.payload {
                CounterEvent::Added(n) => payload + n,
                CounterEvent::Reset => 0,
            }
        }
    }

    fn events(pk: &PartitionKey, payloads: Vec<CounterEvent>) -> Vec<Event<CounterEvent>> {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Event {
                id: SortableId::generate(),
                partition_key: pk.clone(),
                aggregate_type: pk.group().to_string(),
                event_type: payload.event_type().to_string(),
                version: i as u64 + 1,
                payload,
                metadata: EventMetadata::default(),
            })
            .collect()
    }

    #[test]
    fn test_fold_all_applies_in_order() {
        let projector = CounterProjector { version: "1" };
        let pk = PartitionKey::generate("Counter");
        let history = events(
            &pk,
            vec![CounterEvent::Added(5), CounterEvent::Reset, CounterEvent::Added(3)],
        );

        let aggregate = Aggregate::fold_all(&projector, pk.clone(), &history).unwrap();

        assert_eq!(aggregate.payload, 3);
        assert_eq!(aggregate.version, 3);
        assert_eq!(aggregate.last_applied_id, Some(history[2].id.clone()));
        assert!(aggregate.is_built_by(&projector));
    }

    #[test]
    fn test_incremental_fold_matches_full_replay() {
        let projector = CounterProjector { version: "1" };
        let pk = PartitionKey::generate("Counter");
        let history = events(
            &pk,
            vec![
                CounterEvent::Added(1),
                CounterEvent::Added(2),
                CounterEvent::Added(4),
            ],
        );

        let incremental = Aggregate::empty(&projector, pk.clone())
            .project(&projector, &history[..1])
            .unwrap()
            .project(&projector, &history[1..])
            .unwrap();
        let full = Aggregate::fold_all(&projector, pk, &history).unwrap();

        assert_eq!(incremental, full);
    }

    #[test]
    fn test_version_gap_is_rejected() {
        let projector = CounterProjector { version: "1" };
        let pk = PartitionKey::generate("Counter");
        let history = events(&pk, vec![CounterEvent::Added(1), CounterEvent::Added(2)]);

        let err = Aggregate::empty(&projector, pk)
            .project(&projector, &history[1..])
            .unwrap_err();

        assert_eq!(err, ProjectionError::VersionGap { expected: 1, found: 2 });
    }

    #[test]
    fn test_foreign_partition_is_rejected() {
        let projector = CounterProjector { version: "1" };
        let pk = PartitionKey::generate("Counter");
        let other = PartitionKey::generate("Counter");
        let history = events(&other, vec![CounterEvent::Added(1)]);

        let err = Aggregate::empty(&projector, pk).project(&projector, &history).unwrap_err();
        assert!(matches!(err, ProjectionError::PartitionMismatch { .. }));
    }

    #[test]
    fn test_non_increasing_id_is_rejected() {
        let projector = CounterProjector { version: "1" };
        let pk = PartitionKey::generate("Counter");
        let mut history = events(&pk, vec![CounterEvent::Added(1), CounterEvent::Added(2)]);
        history[1].id = history[0].id.clone();

        let err = Aggregate::fold_all(&projector, pk, &history).unwrap_err();
        assert!(matches!(err, ProjectionError::NonIncreasingId { .. }));
    }

    #[test]
    fn test_projector_revision_is_recorded() {
        let v1 = CounterProjector { version: "1" };
        let v2 = CounterProjector { version: "2" };
        let aggregate = Aggregate::empty(&v1, PartitionKey::generate("Counter"));

        assert!(aggregate.is_built_by(&v1));
        assert!(!aggregate.is_built_by(&v2));
    }
}
