//! Copy-trade engine: signal dispatch.
//!
//! The dispatch orchestration is a state machine over persisted Signal /
//! Trade / Position rows plus the idempotency keyspace, never coroutine
//! state, so a worker crash at any point leaves only durable, reconcilable
//! facts behind.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use copytrade_core::cache::{AcquireOutcome, IdempotencyKey, IdempotencyStore};
use copytrade_core::config::{EngineConfig, IdempotencyConfig};
use copytrade_core::credentials::CredentialProvider;
use copytrade_core::db::{
    FollowRepository, PositionRepository, SignalRepository, TradeRepository, UserRepository,
};
use copytrade_core::dlq::DeadLetterQueue;
use copytrade_core::events::{DomainEvent, EventBus};
use copytrade_core::types::{SignalStatus, Venue, WhaleFollow};
use copytrade_core::venues::{AdapterRegistry, Resilience};
use copytrade_core::Result;
use risk_manager::RiskManager;

/// Everything the engine needs, shared with the workers and the monitor.
#[derive(Clone)]
pub struct EngineDeps {
    pub pool: PgPool,
    pub users: Arc<UserRepository>,
    pub follows: Arc<FollowRepository>,
    pub signals: Arc<SignalRepository>,
    pub trades: Arc<TradeRepository>,
    pub positions: Arc<PositionRepository>,
    pub adapters: AdapterRegistry,
    pub resilience: Arc<Resilience>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub idempotency: IdempotencyStore,
    pub bus: EventBus,
    pub dlq: Arc<DeadLetterQueue>,
    pub risk: RiskManager,
    pub config: EngineConfig,
    pub idem_config: IdempotencyConfig,
}

/// Result of one dispatch attempt for a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// This worker dispatched the signal.
    Completed { executed: u32, considered: u32 },
    /// Another worker already finished it (idempotency marker present).
    AlreadyDone,
    /// Another worker holds the claim or won the status race.
    NotClaimed,
    /// The signal aged past its expiry before dispatch.
    Expired,
}

/// Result of one follower's execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowerOutcome {
    Executed { trade_id: Uuid },
    RiskRejected { reason: String },
    Skipped { reason: String },
    Failed { error: String },
}

impl FollowerOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, FollowerOutcome::Executed { .. })
    }
}

/// The copy-trade engine.
pub struct CopyTradeEngine {
    pub(crate) deps: EngineDeps,
}

impl CopyTradeEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    /// Dispatch one PENDING signal to all eligible followers.
    pub async fn process_signal(&self, signal_id: Uuid) -> Result<ProcessOutcome> {
        let key = IdempotencyKey::ProcessSignal { signal_id };
        let AcquireOutcome { acquired, already_completed } = self
            .deps
            .idempotency
            .acquire(&key, self.deps.idem_config.process_signal_ttl_secs)
            .await?;
        if already_completed {
            return Ok(ProcessOutcome::AlreadyDone);
        }
        if !acquired {
            return Ok(ProcessOutcome::NotClaimed);
        }

        let outcome = self.process_signal_locked(signal_id).await;
        match &outcome {
            Ok(ProcessOutcome::Completed { executed, considered }) => {
                self.deps
                    .idempotency
                    .mark_completed(
                        &key,
                        &json!({ "executed": executed, "considered": considered }).to_string(),
                    )
                    .await?;
            }
            _ => {}
        }
        self.deps.idempotency.release(&key).await?;
        outcome
    }

    async fn process_signal_locked(&self, signal_id: Uuid) -> Result<ProcessOutcome> {
        let signal = match self.deps.signals.get(signal_id).await? {
            Some(signal) => signal,
            None => {
                warn!(signal_id = %signal_id, "signal vanished before dispatch");
                return Ok(ProcessOutcome::NotClaimed);
            }
        };
        if signal.status != SignalStatus::Pending {
            return Ok(ProcessOutcome::NotClaimed);
        }
        if signal.age_seconds(Utc::now()) > self.deps.config.signal_expiry_secs {
            // The sweeper owns the EXPIRED transition; just refuse dispatch.
            return Ok(ProcessOutcome::Expired);
        }

        if !self.deps.signals.try_claim(signal.id, signal.version).await? {
            return Ok(ProcessOutcome::NotClaimed);
        }

        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            action = ?signal.action,
            is_close = signal.is_close,
            priority = ?signal.priority,
            "dispatching signal"
        );

        let followers = if signal.is_close {
            self.deps
                .follows
                .followers_for_close(signal.whale_id, &signal.symbol)
                .await?
        } else {
            self.deps.follows.followers_for_open(signal.whale_id).await?
        };

        let considered = followers.len() as u32;
        let soft_deadline =
            Instant::now() + Duration::from_secs(self.deps.config.soft_limit_secs);

        let mut executed = 0u32;
        let mut failures = 0u32;
        let mut venue_failures = 0u32;
        let mut last_error: Option<String> = None;

        for follow in &followers {
            if Instant::now() >= soft_deadline {
                warn!(
                    signal_id = %signal.id,
                    "soft time limit reached, not enrolling further followers"
                );
                break;
            }

            let trade_key = IdempotencyKey::Trade {
                signal_id: signal.id,
                user_id: follow.user_id,
            };
            let claim = self
                .deps
                .idempotency
                .acquire(&trade_key, self.deps.idem_config.trade_ttl_secs)
                .await?;
            if claim.already_completed || !claim.acquired {
                // Some other worker (or a previous life of this one) owns it.
                continue;
            }

            let outcome = self
                .execute_follower(&signal, follow, None, None)
                .await
                .unwrap_or_else(|err| FollowerOutcome::Failed { error: err.to_string() });

            match &outcome {
                FollowerOutcome::Executed { trade_id } => {
                    executed += 1;
                    self.deps
                        .idempotency
                        .mark_completed(&trade_key, &json!({ "trade_id": trade_id }).to_string())
                        .await?;
                }
                FollowerOutcome::RiskRejected { reason } => {
                    // Not an error: recorded on the per-follower result only.
                    info!(
                        signal_id = %signal.id,
                        user_id = %follow.user_id,
                        reason = %reason,
                        "follower rejected by risk policy"
                    );
                }
                FollowerOutcome::Skipped { reason } => {
                    info!(
                        signal_id = %signal.id,
                        user_id = %follow.user_id,
                        reason = %reason,
                        "follower skipped"
                    );
                }
                FollowerOutcome::Failed { error } => {
                    failures += 1;
                    if error.contains("circuit open") || error.contains("venue") {
                        venue_failures += 1;
                    }
                    last_error = Some(error.clone());
                    error!(
                        signal_id = %signal.id,
                        user_id = %follow.user_id,
                        error = %error,
                        "follower execution failed"
                    );
                }
            }
            self.deps.idempotency.release(&trade_key).await?;
        }

        // FAILED only when every follower failed for a venue-wide cause;
        // risk rejections and empty follower sets are a successful dispatch.
        let every_follower_failed_on_venue =
            considered > 0 && venue_failures == failures && failures == considered;
        if every_follower_failed_on_venue {
            self.deps
                .signals
                .finish(signal.id, SignalStatus::Failed, 0, last_error.as_deref())
                .await?;
            self.deps.bus.publish(DomainEvent::SignalFailed {
                signal_id: signal.id,
                error: last_error.unwrap_or_else(|| "venue unavailable".into()),
            });
        } else {
            self.deps
                .signals
                .finish(signal.id, SignalStatus::Processed, executed, None)
                .await?;
            self.deps.bus.publish(DomainEvent::SignalProcessed {
                signal_id: signal.id,
                trades_executed: executed,
                followers_considered: considered,
            });
        }

        Ok(ProcessOutcome::Completed { executed, considered })
    }

    /// Manual copy initiated through the command API: one explicit user
    /// instead of the enumerated follower set. Does not claim the signal.
    pub async fn copy_signal_manually(
        &self,
        signal_id: Uuid,
        user_id: Uuid,
        size_override: Option<Decimal>,
        venue_override: Option<Venue>,
    ) -> Result<FollowerOutcome> {
        let signal = match self.deps.signals.get(signal_id).await? {
            Some(signal) => signal,
            None => {
                return Ok(FollowerOutcome::Skipped {
                    reason: "signal not found".into(),
                })
            }
        };

        let trade_key = IdempotencyKey::Trade { signal_id, user_id };
        let claim = self
            .deps
            .idempotency
            .acquire(&trade_key, self.deps.idem_config.trade_ttl_secs)
            .await?;
        if claim.already_completed || !claim.acquired {
            return Ok(FollowerOutcome::Skipped {
                reason: "already executing for this user".into(),
            });
        }

        let follow = self
            .deps
            .follows
            .get(user_id, signal.whale_id)
            .await?
            .unwrap_or_else(|| WhaleFollow::new(user_id, signal.whale_id));

        let outcome = self
            .execute_follower(&signal, &follow, size_override, venue_override)
            .await
            .unwrap_or_else(|err| FollowerOutcome::Failed { error: err.to_string() });

        if let FollowerOutcome::Executed { trade_id } = &outcome {
            self.deps
                .idempotency
                .mark_completed(&trade_key, &json!({ "trade_id": trade_id }).to_string())
                .await?;
        }
        self.deps.idempotency.release(&trade_key).await?;
        Ok(outcome)
    }

    pub fn deps(&self) -> &EngineDeps {
        &self.deps
    }
}

impl CopyTradeEngine {
    pub(crate) fn record_dead_letter(&self, task: &str, args: serde_json::Value, error: &str) {
        self.deps.dlq.record(task, args, error);
    }
}
