//! ReporterActor - Publishes this instance's heartbeat and snapshot
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ──→ snapshot ──→ HSET server_heartbeats ──→ HSET instance:{id}:info
//! Change notification ─────────────────────────────────→ HSET instance:{id}:info
//!     ↑
//!     └─── Commands (ReportNow, Shutdown)
//! ```
//!
//! Writes are best effort: a failed write is logged and the next tick tries
//! again. There is no retry, backoff or lease; an instance that stops
//! reporting simply stops advancing its heartbeat.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, error, instrument, trace, warn};

use crate::runtime::InstanceContext;
use crate::store::{HEARTBEATS_KEY, SharedStore, instance_info_key};
use crate::util::now_ms;

use super::messages::ReporterCommand;

/// Default period between two reports
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Report timer; a stalled tick is followed by one full period, not a burst
fn report_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Next heartbeat value given the previous one and the wall clock
///
/// Never goes backwards, even if the wall clock does.
pub fn next_heartbeat(previous: i64, now: i64) -> i64 {
    previous.max(now)
}

/// Actor that keeps this instance's entries in the shared store fresh
pub struct ReporterActor {
    store: Arc<dyn SharedStore>,
    ctx: Arc<InstanceContext>,
    command_rx: mpsc::Receiver<ReporterCommand>,
    interval_duration: Duration,
    info_key: String,
    last_heartbeat: i64,
}

impl ReporterActor {
    pub fn new(
        store: Arc<dyn SharedStore>,
        ctx: Arc<InstanceContext>,
        command_rx: mpsc::Receiver<ReporterCommand>,
        interval_duration: Duration,
    ) -> Self {
        let info_key = instance_info_key(ctx.instance_id());

        Self {
            store,
            ctx,
            command_rx,
            interval_duration,
            info_key,
            last_heartbeat: 0,
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or the command channel is
    /// closed.
    #[instrument(skip(self), fields(instance = %self.ctx.instance_id()))]
    pub async fn run(mut self) {
        debug!("starting reporter actor");

        let ctx = Arc::clone(&self.ctx);
        let mut ticker = report_ticker(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.report().await {
                        error!("failed to report instance state: {:#}", e);
                    }
                }

                _ = ctx.changed() => {
                    trace!("state changed, writing snapshot out of band");
                    if let Err(e) = self.write_snapshot(now_ms()).await {
                        error!("failed to write snapshot: {:#}", e);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ReporterCommand::ReportNow { respond_to }) => {
                            debug!("received ReportNow command");
                            let result = self.report().await;
                            let _ = respond_to.send(result);
                        }

                        Some(ReporterCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("reporter actor stopped");
    }

    /// Write heartbeat, then snapshot
    async fn report(&mut self) -> Result<()> {
        let now = next_heartbeat(self.last_heartbeat, now_ms());
        self.last_heartbeat = now;

        let heartbeat = HashMap::from([(self.ctx.instance_id().to_string(), now.to_string())]);
        self.store
            .set_fields(HEARTBEATS_KEY, &heartbeat)
            .await
            .context("failed to write heartbeat")?;

        self.write_snapshot(now).await
    }

    async fn write_snapshot(&self, now: i64) -> Result<()> {
        let snapshot = self.ctx.snapshot(now);

        self.store
            .set_fields(&self.info_key, &snapshot.to_fields())
            .await
            .with_context(|| format!("failed to write {}", self.info_key))?;

        trace!(
            "reported {} workers, {:.2}/{:.2} MiB used",
            snapshot.worker_count, snapshot.memory_used_mib, snapshot.memory_total_mib
        );

        Ok(())
    }
}

/// Handle for controlling a ReporterActor
#[derive(Clone)]
pub struct ReporterHandle {
    sender: mpsc::Sender<ReporterCommand>,
    pub instance_id: String,
}

impl ReporterHandle {
    /// Spawn a new reporter actor
    pub fn spawn(
        store: Arc<dyn SharedStore>,
        ctx: Arc<InstanceContext>,
        interval_duration: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let instance_id = ctx.instance_id().to_string();

        let actor = ReporterActor::new(store, ctx, cmd_rx, interval_duration);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            instance_id,
        }
    }

    /// Report immediately and wait for the writes to finish
    pub async fn report_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReporterCommand::ReportNow { respond_to: tx })
            .await
            .context("failed to send ReportNow command")?;

        rx.await.context("failed to receive response")??;
        Ok(())
    }

    /// Gracefully shut down the reporter
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ReporterCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
