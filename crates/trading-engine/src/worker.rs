//! Signal-processing worker and expiry sweeper.
//!
//! Workers coordinate only through the signal store's conditional claim and
//! the idempotency keyspace, so any number of them can run against the same
//! queue; production runs one per role.

use std::sync::Arc;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use chrono::{Duration as ChronoDuration, Utc};
use copytrade_core::types::SignalPriority;

use crate::engine::{CopyTradeEngine, ProcessOutcome};

/// Pops pending signals in priority order and dispatches them.
pub struct SignalWorker {
    engine: Arc<CopyTradeEngine>,
}

impl SignalWorker {
    pub fn new(engine: Arc<CopyTradeEngine>) -> Self {
        Self { engine }
    }

    /// Spawn the dispatch loop and the expiry sweeper.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let dispatcher = self.clone();
        let dispatch_handle = tokio::spawn(async move {
            dispatcher.run_dispatch_loop().await;
        });
        let sweeper = self;
        let sweep_handle = tokio::spawn(async move {
            sweeper.run_sweeper().await;
        });
        vec![dispatch_handle, sweep_handle]
    }

    async fn run_dispatch_loop(&self) {
        info!("signal worker started");
        let idle = Duration::from_millis(self.engine.deps().config.poll_interval_ms.max(50));
        loop {
            match self.dispatch_next().await {
                Ok(true) => {} // keep draining without sleeping
                Ok(false) => sleep(idle).await,
                Err(err) => {
                    error!(error = %err, "signal dispatch iteration failed");
                    sleep(idle).await;
                }
            }
        }
    }

    /// Returns true when a signal was handled (drain without sleeping).
    async fn dispatch_next(&self) -> anyhow::Result<bool> {
        let deps = self.engine.deps();
        let signal = match deps.signals.next_pending().await? {
            Some(signal) => signal,
            None => return Ok(false),
        };

        // Copier-less low-priority signals exist for discovery data only;
        // they are skipped, not dispatched.
        if signal.priority == SignalPriority::Low {
            let skipped = deps
                .signals
                .skip(signal.id, "no copiers; retained for analytics")
                .await?;
            debug!(signal_id = %signal.id, skipped = skipped, "low-priority signal skipped");
            return Ok(true);
        }

        match self.engine.process_signal(signal.id).await? {
            ProcessOutcome::Completed { executed, considered } => {
                info!(
                    signal_id = %signal.id,
                    executed = executed,
                    considered = considered,
                    "signal dispatched"
                );
            }
            ProcessOutcome::AlreadyDone | ProcessOutcome::NotClaimed => {
                debug!(signal_id = %signal.id, "signal handled by another worker");
            }
            ProcessOutcome::Expired => {
                debug!(signal_id = %signal.id, "signal past expiry, leaving to sweeper");
            }
        }
        Ok(true)
    }

    async fn run_sweeper(&self) {
        let deps = self.engine.deps();
        let mut ticker = interval(Duration::from_secs(deps.config.sweep_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - ChronoDuration::seconds(deps.config.signal_expiry_secs);
            match deps.signals.expire_older_than(cutoff).await {
                Ok(0) => {}
                Ok(expired) => info!(expired = expired, "swept stale signals to EXPIRED"),
                Err(err) => error!(error = %err, "signal expiry sweep failed"),
            }
        }
    }
}
