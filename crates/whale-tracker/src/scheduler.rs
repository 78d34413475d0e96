//! Tiered polling scheduler.
//!
//! Four independent tickers pull eligible whales from the repository each
//! tick (pull model; no per-whale timers), sample their public positions
//! through the resilient adapter, feed the sharing tracker, diff against the
//! cached snapshot, and persist any resulting signals as PENDING.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use copytrade_core::cache::{PositionSnapshot, SnapshotCache};
use copytrade_core::config::{PollingConfig, TierConfig};
use copytrade_core::db::{PollTier, SignalRepository, WhaleRepository};
use copytrade_core::dlq::DeadLetterQueue;
use copytrade_core::error::VenueError;
use copytrade_core::events::{DomainEvent, EventBus};
use copytrade_core::types::{
    Confidence, Market, PositionSample, Signal, SignalAction, TraderScan, Whale,
};
use copytrade_core::venues::{AdapterRegistry, Resilience};
use copytrade_core::Result;

use crate::confidence::{confidence_score, derive_priority};
use crate::diff::diff_positions;
use crate::discovery;
use crate::sharing::{apply_outcome, PollOutcome, SharingPolicy};

/// Everything the scheduler needs, shared with the rest of the process.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub whales: Arc<WhaleRepository>,
    pub signals: Arc<SignalRepository>,
    pub snapshots: SnapshotCache,
    pub adapters: AdapterRegistry,
    pub resilience: Arc<Resilience>,
    pub bus: EventBus,
    pub dlq: Arc<DeadLetterQueue>,
}

/// The tiered whale poller.
pub struct PollingScheduler {
    deps: SchedulerDeps,
    config: PollingConfig,
    policy: SharingPolicy,
}

impl PollingScheduler {
    pub fn new(deps: SchedulerDeps, config: PollingConfig) -> Self {
        let policy = SharingPolicy {
            disable_after: config.sharing_disabled_after,
            recheck_after: ChronoDuration::hours(config.sharing_recheck_hours),
            rate_limit_cooldown: ChronoDuration::seconds(config.rate_limit_cooldown_secs),
        };
        Self { deps, config, policy }
    }

    /// Spawn one task per tier plus the leaderboard discovery sweep.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let tiers = [
            (PollTier::Critical, self.config.critical.clone()),
            (PollTier::High, self.config.high.clone()),
            (PollTier::Normal, self.config.normal.clone()),
            (PollTier::Low, self.config.low.clone()),
        ];

        let mut handles = Vec::new();
        for (tier, tier_config) in tiers {
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                scheduler.run_tier(tier, tier_config).await;
            }));
        }

        if self.config.discovery_period_secs > 0 {
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                discovery::run_discovery(
                    scheduler.deps.clone(),
                    scheduler.config.discovery_period_secs,
                )
                .await;
            }));
        }

        info!("polling scheduler started");
        handles
    }

    async fn run_tier(&self, tier: PollTier, tier_config: TierConfig) {
        let mut ticker = interval(Duration::from_secs(tier_config.period_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick(tier, &tier_config).await {
                // A failed tick never kills the tier; the next one retries.
                error!(tier = ?tier, error = %err, "tier tick failed");
            }
        }
    }

    async fn tick(&self, tier: PollTier, tier_config: &TierConfig) -> Result<()> {
        // Backpressure: only critical (and high) polling is unthrottled.
        if matches!(tier, PollTier::Normal | PollTier::Low) {
            let pending = self.deps.signals.count_pending().await?;
            if pending > self.config.backpressure_threshold as i64 {
                warn!(
                    tier = ?tier,
                    pending = pending,
                    "signal backlog high, skipping tick"
                );
                return Ok(());
            }
        }

        let whales = self
            .deps
            .whales
            .select_candidates(tier, tier_config.batch_size)
            .await?;
        debug!(tier = ?tier, candidates = whales.len(), "tier tick");

        let now = Utc::now();
        for whale in whales {
            if !whale.due(now) || !whale.pollable(now) {
                continue;
            }
            let whale_id = whale.id;
            if let Err(err) = self.poll_whale(whale).await {
                error!(whale_id = %whale_id, error = %err, "whale poll failed");
                self.deps.dlq.record(
                    "poll_whale",
                    json!({ "whale_id": whale_id, "tier": format!("{:?}", tier) }),
                    &err.to_string(),
                );
            }
        }
        Ok(())
    }

    /// One poll of one whale: sample, track sharing, diff, emit.
    async fn poll_whale(&self, mut whale: Whale) -> Result<()> {
        let (venue, venue_uid) = match (whale.venue, whale.venue_uid.clone()) {
            (Some(venue), Some(uid)) => (venue, uid),
            // On-chain whales have no CEX surface to poll.
            _ => return Ok(()),
        };
        let adapter = match self.deps.adapters.get(venue) {
            Some(adapter) => adapter,
            None => {
                warn!(venue = %venue, "no adapter registered, skipping whale");
                return Ok(());
            }
        };

        let scan = self
            .deps
            .resilience
            .call(venue, "leaderboard", || {
                let adapter = adapter.clone();
                let uid = venue_uid.clone();
                async move {
                    adapter
                        .get_open_positions_of_trader(&uid, Market::UsdmFutures)
                        .await
                }
            })
            .await;

        let now = Utc::now();
        let (outcome, current) = classify_scan(scan);
        apply_outcome(&mut whale, &outcome, &self.policy, now);
        self.deps.whales.update_sharing(&whale).await?;

        let current = match current {
            Some(positions) => positions,
            // Errors leave the snapshot untouched; stale diffs are worse
            // than a late one.
            None => return Ok(()),
        };

        let previous = self.deps.snapshots.get(whale.id).await?;
        let emitted = match previous {
            None => {
                // First observation: remember the book, emit nothing, or
                // every follower would be entered into positions the whale
                // already held.
                debug!(whale_id = %whale.id, positions = current.len(), "first observation");
                0
            }
            Some(snapshot) => {
                let diff = diff_positions(&snapshot.positions, &current);
                if diff.is_empty() {
                    0
                } else {
                    self.emit_signals(&whale, diff.opened, diff.closed).await?
                }
            }
        };

        let ttl = (whale.polling_interval_seconds as u64).max(10) * 2;
        self.deps
            .snapshots
            .put(&PositionSnapshot::new(whale.id, current), ttl)
            .await?;

        if emitted > 0 {
            info!(whale_id = %whale.id, signals = emitted, "whale position change detected");
        }
        Ok(())
    }

    async fn emit_signals(
        &self,
        whale: &Whale,
        opened: Vec<PositionSample>,
        closed: Vec<PositionSample>,
    ) -> Result<u32> {
        let auto_copy = self.deps.whales.count_auto_copy_followers(whale.id).await?;
        let active = self.deps.whales.count_active_followers(whale.id).await?;
        let now = Utc::now();

        let mut emitted = 0u32;
        let closing = closed.into_iter().map(|sample| (sample, true));
        let opening = opened.into_iter().map(|sample| (sample, false));
        // Closes first: a follower freeing margin helps the opens that
        // follow in the same poll.
        for (sample, is_close) in closing.chain(opening) {
            let action = if is_close {
                SignalAction::closing(sample.side)
            } else {
                SignalAction::opening(sample.side)
            };
            let score = confidence_score(whale.priority_score, sample.roe, sample.leverage);
            let confidence = Confidence::from_score(score);

            let mut signal = Signal::whale_signal(
                whale.id,
                action,
                sample.symbol.clone(),
                sample.market,
                is_close,
                now,
            );
            signal.whale_leverage = sample.leverage;
            signal.price_at_signal = Some(sample.entry_price);
            signal.amount_hint_usd = Some(sample.quantity * sample.entry_price);
            signal.confidence_score = score;
            signal.confidence = confidence;
            signal.priority = derive_priority(auto_copy, active, confidence);

            if self.deps.signals.insert(&signal).await? {
                emitted += 1;
                self.deps.bus.publish(DomainEvent::SignalDetected {
                    signal_id: signal.id,
                    whale_id: whale.id,
                    symbol: signal.symbol.clone(),
                    market: signal.market,
                    action: signal.action,
                    is_close: signal.is_close,
                    detected_at: now,
                });
            } else {
                debug!(fingerprint = %signal.fingerprint, "duplicate signal suppressed");
            }
        }

        if emitted > 0 && active > 0 {
            self.deps.whales.bump_priority_score(whale.id, 2).await?;
        }
        Ok(emitted)
    }
}

/// Split a scan result into a sharing-tracker outcome and, when the venue
/// actually answered, the observed position set.
fn classify_scan(
    scan: std::result::Result<TraderScan, VenueError>,
) -> (PollOutcome, Option<Vec<PositionSample>>) {
    match scan {
        Ok(TraderScan::Samples(positions)) => (PollOutcome::Samples, Some(positions)),
        Ok(TraderScan::Empty) => (PollOutcome::Empty, Some(Vec::new())),
        Err(err) if err.is_auth_or_rate() => {
            let venue_wide = matches!(err, VenueError::RateLimited { .. });
            (PollOutcome::AuthOrRateError { venue_wide }, None)
        }
        // An open circuit means the venue is unhealthy for everyone; rest
        // this whale for the rate-limit cooldown instead of hammering.
        Err(VenueError::CircuitOpen { .. }) => {
            (PollOutcome::AuthOrRateError { venue_wide: true }, None)
        }
        Err(_) => (PollOutcome::AdapterError, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytrade_core::types::PositionSide;
    use rust_decimal::Decimal;

    fn sample() -> PositionSample {
        PositionSample {
            symbol: "BTCUSDT".into(),
            market: Market::UsdmFutures,
            side: PositionSide::Long,
            quantity: Decimal::ONE,
            entry_price: Decimal::new(50_000, 0),
            leverage: Some(10),
            roe: None,
        }
    }

    #[test]
    fn classify_samples_and_empty() {
        let (outcome, positions) = classify_scan(Ok(TraderScan::Samples(vec![sample()])));
        assert_eq!(outcome, PollOutcome::Samples);
        assert_eq!(positions.unwrap().len(), 1);

        let (outcome, positions) = classify_scan(Ok(TraderScan::Empty));
        assert_eq!(outcome, PollOutcome::Empty);
        assert_eq!(positions.unwrap().len(), 0);
    }

    #[test]
    fn classify_auth_failure_is_not_empty() {
        let (outcome, positions) =
            classify_scan(Err(VenueError::AuthFailure("403".into())));
        assert_eq!(outcome, PollOutcome::AuthOrRateError { venue_wide: false });
        assert!(positions.is_none());
    }

    #[test]
    fn classify_rate_limit_is_venue_wide() {
        let (outcome, _) =
            classify_scan(Err(VenueError::RateLimited { retry_after_secs: Some(5) }));
        assert_eq!(outcome, PollOutcome::AuthOrRateError { venue_wide: true });
    }

    #[test]
    fn classify_circuit_open_rests_the_whale() {
        let (outcome, _) = classify_scan(Err(VenueError::CircuitOpen {
            scope: "binance:leaderboard".into(),
        }));
        assert_eq!(outcome, PollOutcome::AuthOrRateError { venue_wide: true });
    }

    #[test]
    fn classify_other_errors_are_neutral() {
        let (outcome, positions) = classify_scan(Err(VenueError::Venue {
            code: "500".into(),
            message: "oops".into(),
        }));
        assert_eq!(outcome, PollOutcome::AdapterError);
        assert!(positions.is_none());
    }
}
