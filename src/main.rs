use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use partition_es::domain::order::{
    OrderCommand, OrderCommandHandler, OrderConfirmed, OrderEvent, OrderItem, OrderPayload,
    OrderProjector,
};
use partition_es::event_sourcing::core::{Command, CommandMetadata, EventMetadata, NewEvent};
use partition_es::event_sourcing::store::{EventStreamLedger, InMemoryLedger, InMemorySnapshotStore};
use partition_es::utils::RetryConfig;
use partition_es::{CommandError, EngineConfig, EngineMetrics, PartitionRouter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,partition_es=debug")),
        )
        .init();

    tracing::info!("🚀 Starting partition event sourcing demo");

    // === 1. Configuration and backends ===
    let config = EngineConfig::from_env()?;
    tracing::info!(?config, "Loaded engine configuration");

    let ledger = Arc::new(InMemoryLedger::<OrderEvent>::new().with_cursor_policy(config.cursor_policy));
    let snapshots = Arc::new(InMemorySnapshotStore::<OrderPayload>::new());
    let metrics = Arc::new(EngineMetrics::new()?);

    let router = PartitionRouter::new(
        OrderProjector::new(),
        OrderCommandHandler::new(),
        ledger.clone(),
        snapshots.clone(),
        config,
        metrics.clone(),
    );

    // === 2. Order lifecycle through the router ===
    tracing::info!("📝 Demonstrating order lifecycle");

    let order_id = Uuid::now_v7();
    let metadata = CommandMetadata::correlated(Uuid::new_v4()).by_user("demo");

    let create = OrderCommand::CreateOrder {
        order_id,
        customer_id: Uuid::new_v4(),
        items: vec![
            OrderItem {
                product_id: Uuid::new_v4(),
                quantity: 2,
            },
            OrderItem {
                product_id: Uuid::new_v4(),
                quantity: 1,
            },
        ],
    };
    let partition_key = create.partition_key();

    let outcome = router.dispatch(create, metadata.clone()).await?;
    tracing::info!("✅ Order created: {} (version {})", order_id, outcome.version);

    let outcome = router
        .dispatch(
            OrderCommand::UpdateItems {
                order_id,
                items: vec![OrderItem {
                    product_id: Uuid::new_v4(),
                    quantity: 5,
                }],
                reason: Some("Customer changed quantity".to_string()),
            },
            metadata.clone(),
        )
        .await?;
    tracing::info!("✅ Order updated: {} (version {})", order_id, outcome.version);

    // === 3. A competing writer appends behind the coordinator's back ===
    let stale = ledger.get_last_id(&partition_key).await?;
    ledger
        .append_events(
            &partition_key,
            stale.as_ref(),
            vec![NewEvent::new(
                OrderEvent::Confirmed(OrderConfirmed {
                    confirmed_at: chrono::Utc::now(),
                }),
                EventMetadata::default(),
            )],
        )
        .await?;
    tracing::info!("⚠️  Another writer confirmed the order directly in the ledger");

    // The coordinator refreshes its cache before each command, so this
    // sees the confirmation and is rejected by the business rules.
    match router
        .dispatch(OrderCommand::ConfirmOrder { order_id }, metadata.clone())
        .await
    {
        Err(CommandError::Domain(e)) => tracing::info!("❎ Confirm rejected as expected: {}", e),
        other => tracing::warn!(?other, "Unexpected confirm outcome"),
    }

    // === 4. Ship with caller-side retries on transient failures ===
    router
        .execute_with_retry(
            &partition_key,
            OrderCommand::ShipOrder {
                order_id,
                tracking_number: "1Z999AA10123456784".to_string(),
                carrier: "UPS".to_string(),
            },
            metadata.clone(),
            &RetryConfig::aggressive(),
        )
        .await?;

    let state = router.get_state(&partition_key).await?;
    tracing::info!(
        version = state.version,
        status = ?state.payload.order().map(|o| o.status),
        "📦 Current order state"
    );

    // === 5. Snapshot loss and rebuild ===
    router.flush_snapshots().await;
    snapshots.evict(&partition_key).await;
    let rebuilt = router.rebuild_state(&partition_key).await?;
    tracing::info!(
        version = rebuilt.version,
        equal = (rebuilt.payload == state.payload),
        "🔁 Rebuilt from ledger"
    );

    // === 6. Shutdown and metrics ===
    router.shutdown().await;
    println!("{}", metrics.render()?);

    tracing::info!("🎉 Demo complete!");

    Ok(())
}
