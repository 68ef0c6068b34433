use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use partition_es::domain::order::{
    OrderCommand, OrderCommandHandler, OrderError, OrderEvent, OrderItem, OrderItemsUpdated,
    OrderPayload, OrderProjector, OrderStatus, ORDER_GROUP,
};
use partition_es::event_sourcing::core::{
    Aggregate, Command, CommandMetadata, Event, EventMetadata, NewEvent, PartitionKey, SortableId,
};
use partition_es::event_sourcing::store::{
    ConcurrencyConflict, EventStreamLedger, InMemoryLedger, InMemorySnapshotStore, LedgerError,
    SnapshotStore, StoreError,
};
use partition_es::utils::RetryConfig;
use partition_es::{CommandError, EngineConfig, EngineMetrics, PartitionRouter, StateError};

// ============================================================================
// Test Fixtures
// ============================================================================

type OrderRouter = PartitionRouter<OrderCommandHandler>;

fn test_config() -> EngineConfig {
    EngineConfig {
        snapshot_interval_ms: 60_000,
        idle_timeout_ms: 60_000,
        store_retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
        ..EngineConfig::default()
    }
}

fn router_with(
    projector: OrderProjector,
    ledger: Arc<dyn EventStreamLedger<Event = OrderEvent>>,
    snapshots: Arc<dyn SnapshotStore<Payload = OrderPayload>>,
    config: EngineConfig,
) -> (OrderRouter, Arc<EngineMetrics>) {
    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let router = PartitionRouter::new(
        projector,
        OrderCommandHandler::new(),
        ledger,
        snapshots,
        config,
        metrics.clone(),
    );
    (router, metrics)
}

fn item(quantity: i32) -> OrderItem {
    OrderItem {
        product_id: Uuid::from_u128(42),
        quantity,
    }
}

fn create(order_id: Uuid) -> OrderCommand {
    OrderCommand::CreateOrder {
        order_id,
        customer_id: Uuid::new_v4(),
        items: vec![item(1)],
    }
}

fn update(order_id: Uuid, quantity: i32) -> OrderCommand {
    OrderCommand::UpdateItems {
        order_id,
        items: vec![item(quantity)],
        reason: None,
    }
}

fn order_key(order_id: Uuid) -> PartitionKey {
    PartitionKey::for_group(ORDER_GROUP, order_id)
}

fn foreign_update(quantity: i32) -> NewEvent<OrderEvent> {
    NewEvent::new(
        OrderEvent::ItemsUpdated(OrderItemsUpdated {
            items: vec![item(quantity)],
            reason: Some("written by another process".to_string()),
        }),
        EventMetadata::default(),
    )
}

/// Snapshot backend that is always down.
struct BrokenSnapshots;

#[async_trait]
impl SnapshotStore for BrokenSnapshots {
    type Payload = OrderPayload;

    async fn save(&self, _pk: &PartitionKey, _aggregate: &Aggregate<OrderPayload>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("snapshot cluster down".to_string()))
    }

    async fn load(&self, _pk: &PartitionKey) -> Result<Option<Aggregate<OrderPayload>>, StoreError> {
        Err(StoreError::Unavailable("snapshot cluster down".to_string()))
    }
}

/// Ledger wrapper that can fail reads and sneak in a competing append.
#[derive(Default)]
struct ScriptedLedger {
    inner: InMemoryLedger<OrderEvent>,
    failing_reads: AtomicU32,
    interleave_next_append: AtomicBool,
}

impl ScriptedLedger {
    fn take_failure(&self) -> bool {
        self.failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventStreamLedger for ScriptedLedger {
    type Event = OrderEvent;

    async fn append_events(
        &self,
        pk: &PartitionKey,
        expected_last_id: Option<&SortableId>,
        events: Vec<NewEvent<OrderEvent>>,
    ) -> Result<Vec<Event<OrderEvent>>, LedgerError> {
        if self.interleave_next_append.swap(false, Ordering::SeqCst) {
            let last = self.inner.get_last_id(pk).await?;
            self.inner.append_events(pk, last.as_ref(), vec![foreign_update(99)]).await?;
        }
        self.inner.append_events(pk, expected_last_id, events).await
    }

    async fn get_events_since(
        &self,
        pk: &PartitionKey,
        from_id: Option<&SortableId>,
        limit: Option<usize>,
    ) -> Result<Vec<Event<OrderEvent>>, LedgerError> {
        if self.take_failure() {
            return Err(StoreError::Unavailable("ledger timeout".to_string()).into());
        }
        self.inner.get_events_since(pk, from_id, limit).await
    }

    async fn get_last_id(&self, pk: &PartitionKey) -> Result<Option<SortableId>, LedgerError> {
        if self.take_failure() {
            return Err(StoreError::Unavailable("ledger timeout".to_string()).into());
        }
        self.inner.get_last_id(pk).await
    }
}

// ============================================================================
// End-To-End Scenario
// ============================================================================

#[tokio::test]
async fn test_literal_scenario() {
    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    let (router, _) = router_with(OrderProjector::new(), ledger.clone(), snapshots.clone(), test_config());

    // 1. Create: one event, version 1.
    let created = router
        .execute_command(&pk, create(order_id), CommandMetadata::default())
        .await
        .unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(ledger.stream_len(&pk).await, 1);
    let id1 = created.events[0].id.clone();

    // 2. Update on top of id1: version 2.
    let updated = router
        .execute_command(&pk, update(order_id, 3), CommandMetadata::default())
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    let id2 = updated.events[0].id.clone();
    assert!(id1 < id2);
    let incremental = router.get_state(&pk).await.unwrap();

    // 3. A writer still holding id1 is rejected and nothing is stored.
    let err = ledger
        .append_events(&pk, Some(&id1), vec![foreign_update(7)])
        .await
        .unwrap_err();
    match err {
        LedgerError::Conflict(ConcurrencyConflict { expected, actual }) => {
            assert_eq!(expected, Some(id1.clone()));
            assert_eq!(actual, Some(id2.clone()));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(ledger.stream_len(&pk).await, 2);

    // 4. Delta read after id1 is exactly the second event.
    let delta = ledger.get_events_since(&pk, Some(&id1), None).await.unwrap();
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].id, id2);
    assert_eq!(delta[0].version, 2);

    // 5. Lose every cache: the state is refolded from the full stream.
    router.shutdown().await;
    assert!(snapshots.evict(&pk).await);

    let (router, metrics) = router_with(OrderProjector::new(), ledger.clone(), snapshots.clone(), test_config());
    let rebuilt = router.get_state(&pk).await.unwrap();
    assert_eq!(rebuilt.version, 2);
    assert_eq!(rebuilt.payload, incremental.payload);
    assert_eq!(metrics.rebuilds_total.with_label_values(&["no_snapshot"]).get(), 1);

    router.flush_snapshots().await;
    assert!(snapshots.contains(&pk).await);
    router.shutdown().await;

    // 6. New projector revision: the v1 snapshot is ignored and replaced.
    let (router, metrics) = router_with(
        OrderProjector::with_version("2"),
        ledger.clone(),
        snapshots.clone(),
        test_config(),
    );
    let upgraded = router.get_state(&pk).await.unwrap();
    assert_eq!(upgraded.payload, rebuilt.payload);
    assert_eq!(upgraded.version, 2);
    assert_eq!(upgraded.projector_version, "2");
    assert_eq!(metrics.rebuilds_total.with_label_values(&["projector_version"]).get(), 1);
    router.shutdown().await;
}

// ============================================================================
// Coordinator Behaviour
// ============================================================================

#[tokio::test]
async fn test_conflict_resynchronizes_and_is_reported() {
    let ledger = Arc::new(ScriptedLedger::default());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let (router, metrics) = router_with(OrderProjector::new(), ledger.clone(), snapshots, test_config());
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    router.dispatch(create(order_id), CommandMetadata::default()).await.unwrap();

    ledger.interleave_next_append.store(true, Ordering::SeqCst);
    let err = router
        .dispatch(OrderCommand::ConfirmOrder { order_id }, CommandMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Conflict(_)));
    assert_eq!(metrics.concurrency_conflicts_total.get(), 1);

    // The competing event is already folded in; nothing from the failed
    // command was applied.
    let state = router.get_state(&pk).await.unwrap();
    assert_eq!(state.version, 2);
    let order = state.payload.order().unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(order.items, vec![item(99)]);

    // Re-submitting works against the refreshed state.
    let confirmed = router
        .dispatch(OrderCommand::ConfirmOrder { order_id }, CommandMetadata::default())
        .await
        .unwrap();
    assert_eq!(confirmed.version, 3);
}

#[tokio::test]
async fn test_execute_with_retry_recovers_from_conflict() {
    let ledger = Arc::new(ScriptedLedger::default());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let (router, _) = router_with(OrderProjector::new(), ledger.clone(), snapshots, test_config());
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    router.dispatch(create(order_id), CommandMetadata::default()).await.unwrap();
    ledger.interleave_next_append.store(true, Ordering::SeqCst);

    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    };
    let outcome = router
        .execute_with_retry(&pk, OrderCommand::ConfirmOrder { order_id }, CommandMetadata::default(), &retry)
        .await
        .unwrap();

    assert_eq!(outcome.version, 3);
    assert_eq!(ledger.inner.stream_len(&pk).await, 3);
}

#[tokio::test]
async fn test_domain_rejection_and_no_op_leave_ledger_untouched() {
    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let (router, metrics) = router_with(OrderProjector::new(), ledger.clone(), snapshots, test_config());
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    let err = router
        .dispatch(OrderCommand::ConfirmOrder { order_id }, CommandMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Domain(OrderError::NotFound)));
    assert_eq!(ledger.stream_len(&pk).await, 0);

    router.dispatch(create(order_id), CommandMetadata::default()).await.unwrap();

    // Same items as already stored: the handler emits nothing.
    let outcome = router.dispatch(update(order_id, 1), CommandMetadata::default()).await.unwrap();
    assert!(outcome.events.is_empty());
    assert_eq!(outcome.version, 1);
    assert_eq!(ledger.stream_len(&pk).await, 1);

    assert_eq!(metrics.commands_total.with_label_values(&["rejected"]).get(), 1);
    assert_eq!(metrics.commands_total.with_label_values(&["ok"]).get(), 2);
}

#[tokio::test]
async fn test_command_metadata_is_copied_onto_events() {
    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let (router, _) = router_with(OrderProjector::new(), ledger.clone(), snapshots, test_config());
    let order_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();

    let outcome = router
        .dispatch(create(order_id), CommandMetadata::correlated(correlation_id).by_user("alice"))
        .await
        .unwrap();

    let stored = ledger.get_all_events(&order_key(order_id)).await.unwrap();
    assert_eq!(stored, outcome.events);
    assert_eq!(stored[0].metadata.correlation_id, correlation_id);
    assert_eq!(stored[0].metadata.user_id.as_deref(), Some("alice"));
    assert_eq!(stored[0].aggregate_type, ORDER_GROUP);
    assert_eq!(stored[0].event_type, "OrderCreated");
}

#[tokio::test]
async fn test_snapshot_failures_never_fail_commands() {
    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new());
    let config = EngineConfig {
        snapshot_every_events: 1,
        ..test_config()
    };
    let (router, metrics) = router_with(OrderProjector::new(), ledger.clone(), Arc::new(BrokenSnapshots), config);
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    router.dispatch(create(order_id), CommandMetadata::default()).await.unwrap();
    for quantity in 2..5 {
        router.dispatch(update(order_id, quantity), CommandMetadata::default()).await.unwrap();
    }

    let state = router.get_state(&pk).await.unwrap();
    assert_eq!(state.version, 4);
    assert!(metrics.snapshot_writes_total.with_label_values(&["failed"]).get() >= 1);

    let rebuilt = router.rebuild_state(&pk).await.unwrap();
    assert_eq!(rebuilt.payload, state.payload);
}

#[tokio::test]
async fn test_commands_on_one_partition_are_serialized() {
    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let (router, metrics) = router_with(OrderProjector::new(), ledger.clone(), snapshots, test_config());
    let router = Arc::new(router);
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    router.dispatch(create(order_id), CommandMetadata::default()).await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .dispatch(update(order_id, 100 + i), CommandMetadata::default())
                    .await
            })
        })
        .collect();

    let mut versions = Vec::new();
    for task in tasks {
        versions.push(task.await.unwrap().unwrap().version);
    }
    versions.sort_unstable();
    assert_eq!(versions, (2..=21).collect::<Vec<u64>>());
    assert_eq!(metrics.concurrency_conflicts_total.get(), 0);

    let stored = ledger.get_all_events(&pk).await.unwrap();
    let stored_versions: Vec<u64> = stored.iter().map(|e| e.version).collect();
    assert_eq!(stored_versions, (1..=21).collect::<Vec<u64>>());
    assert!(stored.windows(2).all(|w| w[0].id < w[1].id));

    // Incremental cache equals a replay of the stored stream.
    let cached = router.get_state(&pk).await.unwrap();
    let replayed = Aggregate::fold_all(&OrderProjector::new(), pk.clone(), &stored).unwrap();
    assert_eq!(cached, replayed);
}

#[tokio::test]
async fn test_partitions_get_their_own_coordinators() {
    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let (router, metrics) = router_with(OrderProjector::new(), ledger, snapshots, test_config());

    let first = create(Uuid::new_v4());
    let second = create(Uuid::new_v4());
    let first_key = first.partition_key();

    router.dispatch(first, CommandMetadata::default()).await.unwrap();
    router.dispatch(second, CommandMetadata::default()).await.unwrap();

    let active = router.active_partitions().await;
    assert_eq!(active.len(), 2);
    assert!(active.contains(&first_key));
    assert_eq!(metrics.active_coordinators.get(), 2);

    router.shutdown().await;
    assert!(router.active_partitions().await.is_empty());
    assert_eq!(metrics.active_coordinators.get(), 0);
}

#[tokio::test]
async fn test_idle_coordinator_deactivates_and_rehydrates() {
    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let config = EngineConfig {
        idle_timeout_ms: 50,
        ..test_config()
    };
    let (router, metrics) = router_with(OrderProjector::new(), ledger, snapshots.clone(), config);
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    router.dispatch(create(order_id), CommandMetadata::default()).await.unwrap();
    assert!(!snapshots.contains(&pk).await);

    tokio::time::sleep(Duration::from_millis(300)).await;

    // Deactivation flushed the snapshot.
    assert!(router.active_partitions().await.is_empty());
    assert!(snapshots.contains(&pk).await);

    // The next request spawns a fresh coordinator that adopts the snapshot.
    let outcome = router
        .dispatch(OrderCommand::ConfirmOrder { order_id }, CommandMetadata::default())
        .await
        .unwrap();
    assert_eq!(outcome.version, 2);
    assert_eq!(metrics.rebuilds_total.with_label_values(&["no_snapshot"]).get(), 1);
    assert_eq!(router.active_partitions().await, vec![pk]);
}

#[tokio::test]
async fn test_transient_read_failures_are_retried() {
    let ledger = Arc::new(ScriptedLedger::default());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let (router, _) = router_with(OrderProjector::new(), ledger.clone(), snapshots, test_config());
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    router.dispatch(create(order_id), CommandMetadata::default()).await.unwrap();

    ledger.failing_reads.store(2, Ordering::SeqCst);
    let state = router.get_state(&pk).await.unwrap();
    assert_eq!(state.version, 1);

    ledger.failing_reads.store(100, Ordering::SeqCst);
    let err = router.get_state(&pk).await.unwrap_err();
    assert!(matches!(err, StateError::Store(StoreError::Unavailable(_))));

    // The cache survived the failed refresh.
    ledger.failing_reads.store(0, Ordering::SeqCst);
    let state = router.get_state(&pk).await.unwrap();
    assert_eq!(state.version, 1);
}

#[tokio::test]
async fn test_rebuild_matches_incremental_state() {
    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let (router, metrics) = router_with(OrderProjector::new(), ledger, snapshots.clone(), test_config());
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    router.dispatch(create(order_id), CommandMetadata::default()).await.unwrap();
    router.dispatch(update(order_id, 8), CommandMetadata::default()).await.unwrap();
    router
        .dispatch(
            OrderCommand::CancelOrder {
                order_id,
                reason: Some("out of stock".to_string()),
                cancelled_by: None,
            },
            CommandMetadata::default(),
        )
        .await
        .unwrap();

    let before = router.get_state(&pk).await.unwrap();
    let rebuilt = router.rebuild_state(&pk).await.unwrap();

    assert_eq!(rebuilt, before);
    assert_eq!(metrics.rebuilds_total.with_label_values(&["forced"]).get(), 1);
    // Rebuild writes a snapshot right away.
    assert!(snapshots.contains(&pk).await);
}

#[tokio::test]
async fn test_snapshot_timer_flushes_dirty_state() {
    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let config = EngineConfig {
        snapshot_interval_ms: 30,
        snapshot_every_events: 0,
        ..test_config()
    };
    let (router, metrics) = router_with(OrderProjector::new(), ledger, snapshots.clone(), config);
    let order_id = Uuid::new_v4();
    let pk = order_key(order_id);

    router.dispatch(create(order_id), CommandMetadata::default()).await.unwrap();
    assert!(!snapshots.contains(&pk).await);

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Written by the timer while the coordinator is still live.
    assert_eq!(router.active_partitions().await, vec![pk.clone()]);
    assert!(snapshots.contains(&pk).await);
    assert_eq!(metrics.snapshot_writes_total.with_label_values(&["ok"]).get(), 1);

    // Clean state is not written again on later ticks.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(metrics.snapshot_writes_total.with_label_values(&["ok"]).get(), 1);
}
