use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::event_sourcing::core::{Aggregate, Command, CommandHandler, CommandMetadata, CommandOutcome, PartitionKey};
use crate::event_sourcing::store::{EventStreamLedger, SnapshotStore};
use crate::metrics::EngineMetrics;
use crate::utils::{retry_on_transient, CircuitBreaker, RetryConfig};

use super::coordinator::{CoordinatorContext, EventOf, PayloadOf};
use super::errors::{CommandError, StateError};
use super::partition_actor::{spawn_coordinator, CoordinatorHandle, CoordinatorMessage};

// ============================================================================
// Partition Router - Entry Point Of The Engine
// ============================================================================
//
// Maps `PartitionKey::to_string()` to the one coordinator task allowed to
// write that partition, spawning it on first use and again after it went
// idle. The table lock is only held to look up or insert a handle, never
// across ledger or snapshot I/O.
//
//   caller ──► router ──mpsc──► coordinator task ──► ledger / snapshots
//                 ▲                    │
//                 └──────oneshot───────┘
//
// ============================================================================

/// A message can bounce off a coordinator that exited between lookup and
/// send; it is then re-delivered to a fresh one.
const MAX_DELIVERY_ATTEMPTS: usize = 3;

struct Route<H: CommandHandler> {
    handle: CoordinatorHandle<H>,
    task: JoinHandle<()>,
    /// Distinguishes a respawned coordinator from the one it replaced.
    generation: u64,
}

type RouteTable<H> = RwLock<HashMap<String, Route<H>>>;

pub struct PartitionRouter<H: CommandHandler> {
    ctx: Arc<CoordinatorContext<H>>,
    routes: Arc<RouteTable<H>>,
    generations: AtomicU64,
}

impl<H: CommandHandler> PartitionRouter<H> {
    pub fn new(
        projector: H::Projector,
        handler: H,
        ledger: Arc<dyn EventStreamLedger<Event = EventOf<H>>>,
        snapshots: Arc<dyn SnapshotStore<Payload = PayloadOf<H>>>,
        config: EngineConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let snapshot_breaker = CircuitBreaker::new("snapshot_store", config.snapshot_breaker.clone());
        Self {
            ctx: Arc::new(CoordinatorContext {
                projector: Arc::new(projector),
                handler: Arc::new(handler),
                ledger,
                snapshots,
                config,
                metrics,
                snapshot_breaker,
            }),
            routes: Arc::new(RwLock::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.ctx.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Run `command` on the coordinator owning `partition_key`.
    pub async fn execute_command(
        &self,
        partition_key: &PartitionKey,
        command: H::Command,
        metadata: CommandMetadata,
    ) -> Result<CommandOutcome<EventOf<H>>, CommandError<H::Error>> {
        let addressed = command.partition_key();
        if addressed != *partition_key {
            return Err(CommandError::Misaddressed {
                target: partition_key.clone(),
                command: addressed,
            });
        }

        let (reply, response) = oneshot::channel();
        self.deliver(
            partition_key,
            CoordinatorMessage::Execute {
                command,
                metadata,
                reply,
            },
        )
        .await
        .map_err(|_| CommandError::CoordinatorGone)?;

        response.await.map_err(|_| CommandError::CoordinatorGone)?
    }

    /// Like `execute_command`, addressed by the command itself.
    pub async fn dispatch(
        &self,
        command: H::Command,
        metadata: CommandMetadata,
    ) -> Result<CommandOutcome<EventOf<H>>, CommandError<H::Error>> {
        let partition_key = command.partition_key();
        self.execute_command(&partition_key, command, metadata).await
    }

    /// Re-submit the whole command while it fails transiently (conflicts,
    /// unavailable storage). Each attempt runs against fresh state.
    pub async fn execute_with_retry(
        &self,
        partition_key: &PartitionKey,
        command: H::Command,
        metadata: CommandMetadata,
        retry: &RetryConfig,
    ) -> Result<CommandOutcome<EventOf<H>>, CommandError<H::Error>>
    where
        H::Command: Clone,
    {
        retry_on_transient(retry, |_attempt| {
            self.execute_command(partition_key, command.clone(), metadata.clone())
        })
        .await
        .into_result()
    }

    /// Current materialized state, refreshed against the ledger.
    pub async fn get_state(&self, partition_key: &PartitionKey) -> Result<Aggregate<PayloadOf<H>>, StateError> {
        let (reply, response) = oneshot::channel();
        self.deliver(partition_key, CoordinatorMessage::GetState { reply })
            .await
            .map_err(|_| StateError::CoordinatorGone)?;

        response.await.map_err(|_| StateError::CoordinatorGone)?
    }

    /// Discard the cached state and replay the whole stream.
    pub async fn rebuild_state(&self, partition_key: &PartitionKey) -> Result<Aggregate<PayloadOf<H>>, StateError> {
        let (reply, response) = oneshot::channel();
        self.deliver(partition_key, CoordinatorMessage::Rebuild { reply })
            .await
            .map_err(|_| StateError::CoordinatorGone)?;

        response.await.map_err(|_| StateError::CoordinatorGone)?
    }

    /// Ask every live coordinator to persist its snapshot if dirty.
    pub async fn flush_snapshots(&self) {
        let handles: Vec<CoordinatorHandle<H>> = {
            let routes = self.routes.read().await;
            routes
                .values()
                .filter(|route| route.handle.is_alive())
                .map(|route| route.handle.clone())
                .collect()
        };

        join_all(handles.into_iter().map(|handle| async move {
            let (reply, done) = oneshot::channel();
            if handle.send(CoordinatorMessage::FlushSnapshot { reply }).await.is_ok() {
                let _ = done.await;
            }
        }))
        .await;
    }

    pub async fn active_partitions(&self) -> Vec<PartitionKey> {
        let routes = self.routes.read().await;
        routes
            .values()
            .filter(|route| route.handle.is_alive())
            .map(|route| route.handle.partition_key().clone())
            .collect()
    }

    /// Stop every coordinator and wait until each has flushed its snapshot.
    pub async fn shutdown(&self) {
        let routes: Vec<Route<H>> = {
            let mut table = self.routes.write().await;
            table.drain().map(|(_, route)| route).collect()
        };

        tracing::info!(coordinators = routes.len(), "Shutting down partition coordinators");

        join_all(routes.into_iter().map(|route| async move {
            // Already-exited coordinators reject the message; that is fine.
            let _ = route.handle.send(CoordinatorMessage::Shutdown).await;
            if let Err(e) = route.task.await {
                tracing::warn!(
                    partition = %route.handle.partition_key(),
                    error = %e,
                    "Coordinator task ended abnormally"
                );
            }
        }))
        .await;
    }

    async fn deliver(&self, partition_key: &PartitionKey, message: CoordinatorMessage<H>) -> Result<(), ()> {
        let mut message = message;
        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            let handle = self.handle_for(partition_key).await;
            match handle.send(message).await {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    tracing::debug!(
                        partition = %partition_key,
                        attempt,
                        "Coordinator exited before delivery, re-routing"
                    );
                    message = rejected;
                }
            }
        }

        tracing::warn!(partition = %partition_key, "Giving up delivering to coordinator");
        Err(())
    }

    async fn handle_for(&self, partition_key: &PartitionKey) -> CoordinatorHandle<H> {
        let route_key = partition_key.to_string();

        {
            let routes = self.routes.read().await;
            if let Some(route) = routes.get(&route_key).filter(|route| route.handle.is_alive()) {
                return route.handle.clone();
            }
        }

        let mut routes = self.routes.write().await;
        if let Some(route) = routes.get(&route_key).filter(|route| route.handle.is_alive()) {
            return route.handle.clone();
        }

        // The exiting task can only take the write lock after this guard is
        // released, i.e. after its route is in the table.
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let on_exit = evict_route(Arc::downgrade(&self.routes), route_key.clone(), generation);
        let (handle, task) = spawn_coordinator(self.ctx.clone(), partition_key.clone(), on_exit);
        routes.insert(
            route_key,
            Route {
                handle: handle.clone(),
                task,
                generation,
            },
        );
        handle
    }
}

/// Drop the route of an exited coordinator unless it was already replaced
/// or drained by `shutdown`.
async fn evict_route<H: CommandHandler>(routes: Weak<RouteTable<H>>, route_key: String, generation: u64) {
    let Some(routes) = routes.upgrade() else {
        return;
    };
    let mut routes = routes.write().await;
    if routes.get(&route_key).is_some_and(|route| route.generation == generation) {
        routes.remove(&route_key);
        tracing::debug!(partition = %route_key, "Evicted idle coordinator route");
    }
}
