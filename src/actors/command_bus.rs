//! CommandBusActor - Receives instructions addressed to this instance
//!
//! Every instance subscribes to its own channel `instance:{id}` at startup.
//! Anyone (another instance, an operator, the HTTP API) can `dispatch` an
//! instruction to a target instance; delivery is fire-and-forget.
//!
//! ## Message Flow
//!
//! ```text
//! dispatch(target, kind) ──→ PUBLISH instance:{target} {"type": kind}
//!                                      │
//!                                      ▼
//!                  CommandBusActor (target) ──→ ActionTable[kind](ctx)
//!                                                      │
//!                                                      ▼
//!                                      ctx.notify_changed() ──→ ReporterActor
//! ```
//!
//! Payloads are handled one at a time on the actor task, so local state is
//! never mutated by two instructions at once. Malformed payloads and kinds
//! without a registered action are logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::runtime::InstanceContext;
use crate::store::{SharedStore, StoreResult, Subscription, instance_channel};

use super::messages::{BusCommand, Delivery, Instruction, InstructionKind};

/// Local action run for an instruction kind
pub type Action = fn(&Arc<InstanceContext>) -> Result<()>;

/// Mapping from instruction kind to the action it triggers
#[derive(Clone)]
pub struct ActionTable {
    actions: HashMap<InstructionKind, Action>,
}

impl ActionTable {
    /// A table without any action; every instruction is dropped
    pub fn empty() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register (or replace) the action for `kind`
    pub fn register(mut self, kind: InstructionKind, action: Action) -> Self {
        self.actions.insert(kind, action);
        self
    }

    pub fn get(&self, kind: &InstructionKind) -> Option<Action> {
        self.actions.get(kind).copied()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionTable {
    /// `leak`, `clear` and `compute`
    fn default() -> Self {
        Self::empty()
            .register(InstructionKind::Leak, leak_memory)
            .register(InstructionKind::Clear, clear_memory)
            .register(InstructionKind::Compute, run_compute)
    }
}

/// Allocate the configured fraction of currently free memory
pub fn leak_memory(ctx: &Arc<InstanceContext>) -> Result<()> {
    let free = ctx.memory_free_bytes();
    let bytes = (free as f64 * ctx.leak_fraction()) as usize;

    info!("leaking {bytes} of {free} free bytes");
    ctx.allocate_ballast(bytes)
}

/// Release every block allocated by `leak_memory`
pub fn clear_memory(ctx: &Arc<InstanceContext>) -> Result<()> {
    let freed = ctx.clear_ballast();
    info!("cleared {freed} bytes of ballast");
    Ok(())
}

/// Start the compute job in the background
///
/// Returns right away; the job's completion triggers one more snapshot
/// write so observers see the worker count drop again.
pub fn run_compute(ctx: &Arc<InstanceContext>) -> Result<()> {
    let done = ctx.start_compute();
    let ctx = Arc::clone(ctx);

    info!("started compute job ({} active)", ctx.active_tasks());

    tokio::spawn(async move {
        match done.await {
            Ok(result) => debug!("compute job finished with {result}"),
            Err(_) => error!("compute job panicked"),
        }
        ctx.notify_changed();
    });

    Ok(())
}

/// Publish an instruction to `target`'s channel
///
/// Fire-and-forget: the returned count is how many subscribers the store
/// handed the message to, not an acknowledgement.
pub async fn dispatch(
    store: &dyn SharedStore,
    target: &str,
    kind: &InstructionKind,
) -> StoreResult<usize> {
    let channel = instance_channel(target);
    let payload = Instruction::payload(kind);

    let receivers = store.publish(&channel, &payload).await?;
    debug!("dispatched {kind} to {channel} ({receivers} receivers)");

    Ok(receivers)
}

/// Pause between two failed attempts to re-subscribe
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Actor executing the instructions published on this instance's channel
///
/// A subscription that ends (the store dropped the pub/sub connection) is
/// replaced by a fresh one; only `Shutdown` or a closed command channel stop
/// the actor.
pub struct CommandBusActor {
    store: Arc<dyn SharedStore>,
    ctx: Arc<InstanceContext>,
    actions: ActionTable,
    subscription: Subscription,
    command_rx: mpsc::Receiver<BusCommand>,
    retry_delay: Duration,
}

impl CommandBusActor {
    pub fn new(
        store: Arc<dyn SharedStore>,
        ctx: Arc<InstanceContext>,
        actions: ActionTable,
        subscription: Subscription,
        command_rx: mpsc::Receiver<BusCommand>,
    ) -> Self {
        Self {
            store,
            ctx,
            actions,
            subscription,
            command_rx,
            retry_delay: RESUBSCRIBE_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or the command channel is
    /// closed.
    #[instrument(skip(self), fields(channel = %self.subscription.channel()))]
    pub async fn run(mut self) {
        debug!("starting command bus actor");

        loop {
            tokio::select! {
                payload = self.subscription.recv() => {
                    match payload {
                        Some(payload) => {
                            self.handle(&payload);
                        }
                        None => {
                            warn!("subscription closed, resubscribing");
                            if !self.resubscribe().await {
                                break;
                            }
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    if !self.on_command(cmd) {
                        break;
                    }
                }
            }
        }

        debug!("command bus actor stopped");
    }

    /// Handle one command; false once the actor has to stop
    fn on_command(&self, cmd: Option<BusCommand>) -> bool {
        match cmd {
            Some(BusCommand::Deliver {
                payload,
                respond_to,
            }) => {
                let _ = respond_to.send(self.handle(&payload));
                true
            }

            Some(BusCommand::Shutdown) => {
                debug!("received shutdown command");
                false
            }

            None => {
                warn!("command channel closed, shutting down");
                false
            }
        }
    }

    /// Subscribe again until the store accepts, still serving commands
    ///
    /// Returns false if the actor was told to stop meanwhile.
    async fn resubscribe(&mut self) -> bool {
        let channel = self.subscription.channel().to_string();

        loop {
            match self.store.subscribe(&channel).await {
                Ok(subscription) => {
                    info!("resubscribed to channel {channel}");
                    self.subscription = subscription;
                    return true;
                }
                Err(e) => {
                    error!(
                        "resubscribing to {channel} failed: {e}, retrying in {:?}",
                        self.retry_delay
                    );
                }
            }

            let retry = tokio::time::sleep(self.retry_delay);
            tokio::pin!(retry);

            loop {
                tokio::select! {
                    _ = &mut retry => break,

                    cmd = self.command_rx.recv() => {
                        if !self.on_command(cmd) {
                            return false;
                        }
                    }
                }
            }
        }
    }

    fn handle(&self, payload: &str) -> Delivery {
        debug!(
            "received message on channel {}: {payload}",
            self.subscription.channel()
        );

        let instruction = match Instruction::parse(self.ctx.instance_id(), payload) {
            Ok(instruction) => instruction,
            Err(e) => {
                warn!("dropping instruction: {e}");
                return Delivery::Malformed(e);
            }
        };

        let Some(action) = self.actions.get(&instruction.kind) else {
            warn!("Unknown instruction type: {}", instruction.kind);
            return Delivery::Unhandled(instruction.kind);
        };

        match action(&self.ctx) {
            Ok(()) => {
                trace!("executed {}", instruction.kind);
                self.ctx.notify_changed();
                Delivery::Executed(instruction.kind)
            }
            Err(e) => {
                error!("{} action failed: {:#}", instruction.kind, e);
                Delivery::Failed(instruction.kind)
            }
        }
    }
}

/// Handle for controlling a CommandBusActor
#[derive(Clone)]
pub struct CommandBusHandle {
    sender: mpsc::Sender<BusCommand>,
    pub instance_id: String,
    pub channel: String,
}

impl CommandBusHandle {
    /// Subscribe to this instance's channel and spawn the actor
    ///
    /// Fails if the first subscription cannot be established; later drops
    /// are handled by the actor.
    pub async fn spawn(
        store: Arc<dyn SharedStore>,
        ctx: Arc<InstanceContext>,
        actions: ActionTable,
    ) -> StoreResult<Self> {
        Self::spawn_with_retry_delay(store, ctx, actions, RESUBSCRIBE_DELAY).await
    }

    pub async fn spawn_with_retry_delay(
        store: Arc<dyn SharedStore>,
        ctx: Arc<InstanceContext>,
        actions: ActionTable,
        retry_delay: Duration,
    ) -> StoreResult<Self> {
        let channel = instance_channel(ctx.instance_id());
        let subscription = store.subscribe(&channel).await?;
        info!("subscribed to channel {channel}");

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let instance_id = ctx.instance_id().to_string();

        let actor = CommandBusActor::new(store, ctx, actions, subscription, cmd_rx)
            .with_retry_delay(retry_delay);
        tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            instance_id,
            channel,
        })
    }

    /// Hand a payload straight to the actor, bypassing the store
    ///
    /// Waits until the payload has been handled.
    pub async fn deliver(&self, payload: impl Into<String>) -> Result<Delivery> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BusCommand::Deliver {
                payload: payload.into(),
                respond_to: tx,
            })
            .await
            .context("failed to send Deliver command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down the command bus
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(BusCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
