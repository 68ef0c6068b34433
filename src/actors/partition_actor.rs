use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::event_sourcing::core::{Aggregate, CommandHandler, CommandMetadata, CommandOutcome, PartitionKey};

use super::coordinator::{AggregateCoordinator, CoordinatorContext, EventOf, PayloadOf};
use super::errors::{CommandError, StateError};

// ============================================================================
// Partition Actor - Mailbox Task Driving One Coordinator
// ============================================================================
//
// One tokio task per partition key owns the coordinator and processes its
// bounded mailbox strictly one message at a time, so command order equals
// version order equals append order.
//
// Besides messages the loop reacts to:
// - the snapshot timer (flush if dirty)
// - the idle timer (deactivate: stop accepting, drain, flush, exit)
//
// Callers that stop waiting for a reply do not cancel the work.
//
// ============================================================================

pub(crate) type ExecuteReply<H> =
    oneshot::Sender<Result<CommandOutcome<EventOf<H>>, CommandError<<H as CommandHandler>::Error>>>;
pub(crate) type StateReply<H> = oneshot::Sender<Result<Aggregate<PayloadOf<H>>, StateError>>;

pub(crate) enum CoordinatorMessage<H: CommandHandler> {
    Execute {
        command: H::Command,
        metadata: CommandMetadata,
        reply: ExecuteReply<H>,
    },
    GetState {
        reply: StateReply<H>,
    },
    Rebuild {
        reply: StateReply<H>,
    },
    FlushSnapshot {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Sending side of a coordinator's mailbox.
pub(crate) struct CoordinatorHandle<H: CommandHandler> {
    partition_key: PartitionKey,
    sender: mpsc::Sender<CoordinatorMessage<H>>,
}

// Manual `Clone`: only the sender is cloned, `H` need not be `Clone`.
impl<H: CommandHandler> Clone for CoordinatorHandle<H> {
    fn clone(&self) -> Self {
        Self {
            partition_key: self.partition_key.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<H: CommandHandler> CoordinatorHandle<H> {
    pub(crate) fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    /// False once the task stopped accepting messages.
    pub(crate) fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Hands the message back when the coordinator has already exited.
    pub(crate) async fn send(&self, message: CoordinatorMessage<H>) -> Result<(), CoordinatorMessage<H>> {
        self.sender.send(message).await.map_err(|rejected| rejected.0)
    }
}

/// Spawn the task owning `partition_key`. `on_exit` runs once the task
/// has drained its mailbox and flushed its snapshot.
pub(crate) fn spawn_coordinator<H, X>(
    ctx: Arc<CoordinatorContext<H>>,
    partition_key: PartitionKey,
    on_exit: X,
) -> (CoordinatorHandle<H>, JoinHandle<()>)
where
    H: CommandHandler,
    X: Future<Output = ()> + Send + 'static,
{
    let (sender, receiver) = mpsc::channel(ctx.config.mailbox_capacity);
    let coordinator = AggregateCoordinator::new(ctx.clone(), partition_key.clone());

    ctx.metrics.active_coordinators.inc();
    tracing::info!(partition = %partition_key, "Spawned partition coordinator");

    let task = tokio::spawn(async move {
        run(coordinator, receiver, ctx).await;
        on_exit.await;
    });
    (
        CoordinatorHandle {
            partition_key,
            sender,
        },
        task,
    )
}

async fn run<H: CommandHandler>(
    mut coordinator: AggregateCoordinator<H>,
    mut receiver: mpsc::Receiver<CoordinatorMessage<H>>,
    ctx: Arc<CoordinatorContext<H>>,
) {
    let snapshot_interval = ctx.config.snapshot_interval();
    let idle_timeout = ctx.config.idle_timeout();

    let mut snapshot_timer = time::interval_at(time::Instant::now() + snapshot_interval, snapshot_interval);
    snapshot_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let idle = time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            message = receiver.recv() => {
                let Some(message) = message else { break };
                idle.as_mut().reset(time::Instant::now() + idle_timeout);
                if !handle_message(&mut coordinator, &ctx, message).await {
                    break;
                }
            }
            _ = snapshot_timer.tick() => coordinator.flush_snapshot().await,
            () = &mut idle => {
                tracing::info!(partition = %coordinator.partition_key(), "Coordinator idle, deactivating");
                break;
            }
        }
    }

    // Messages already accepted into the mailbox are still served; new
    // senders see a closed channel and go to a fresh coordinator.
    receiver.close();
    while let Some(message) = receiver.recv().await {
        handle_message(&mut coordinator, &ctx, message).await;
    }

    coordinator.flush_snapshot().await;
    ctx.metrics.active_coordinators.dec();
    tracing::info!(partition = %coordinator.partition_key(), "Coordinator stopped");
}

/// Returns false when the loop should stop.
async fn handle_message<H: CommandHandler>(
    coordinator: &mut AggregateCoordinator<H>,
    ctx: &CoordinatorContext<H>,
    message: CoordinatorMessage<H>,
) -> bool {
    match message {
        CoordinatorMessage::Execute {
            command,
            metadata,
            reply,
        } => {
            let started = Instant::now();
            let result = coordinator.execute(command, metadata).await;

            let outcome = match &result {
                Ok(_) => "ok",
                Err(e) => e.kind(),
            };
            ctx.metrics.record_command(
                coordinator.partition_key().group(),
                outcome,
                started.elapsed().as_secs_f64(),
            );

            // The caller may have stopped waiting; the work is done either way.
            let _ = reply.send(result);

            if coordinator.snapshot_due() {
                coordinator.flush_snapshot().await;
            }
        }
        CoordinatorMessage::GetState { reply } => {
            let _ = reply.send(coordinator.get_state().await);
        }
        CoordinatorMessage::Rebuild { reply } => {
            let _ = reply.send(coordinator.rebuild().await);
        }
        CoordinatorMessage::FlushSnapshot { reply } => {
            coordinator.flush_snapshot().await;
            let _ = reply.send(());
        }
        CoordinatorMessage::Shutdown => return false,
    }
    true
}
