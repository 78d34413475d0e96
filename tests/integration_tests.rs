//! Integration tests for component interactions.
//!
//! These tests verify that the major components work together correctly
//! without external services: detection → confidence → priority, the risk
//! and sizing policies feeding execution math, and the resilience wrapper's
//! behavior under venue failure.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use copytrade_core::config::{BreakerConfig, RetryConfig};
use copytrade_core::error::VenueError;
use copytrade_core::types::{
    Confidence, Market, PositionSample, PositionSide, SignalAction, SubscriptionTier, User,
    UserSettings, Venue, Whale, WhaleFollow,
};
use copytrade_core::venues::{CircuitState, Resilience, ResilienceConfig};
use risk_manager::{resolve_leverage, resolve_trade_size, RiskContext, RiskManager, TierLimits};
use whale_tracker::{confidence_score, derive_priority, diff_positions};

fn sample(symbol: &str, side: PositionSide) -> PositionSample {
    PositionSample {
        symbol: symbol.to_string(),
        market: Market::UsdmFutures,
        side,
        quantity: Decimal::ONE,
        entry_price: Decimal::new(50_000, 0),
        leverage: Some(10),
        roe: Some(Decimal::new(12, 0)),
    }
}

fn pro_user(available: i64) -> User {
    User {
        id: Uuid::new_v4(),
        external_id: "tg:42".into(),
        subscription_tier: SubscriptionTier::Pro,
        subscription_expires_at: None,
        is_active: true,
        is_banned: false,
        total_balance: Decimal::new(available, 0),
        available_balance: Decimal::new(available, 0),
        two_factor_enabled: false,
        created_at: Utc::now(),
    }
}

/// Whale opens a BTCUSDT long and the detection pipeline turns it into
/// a BUY opening signal with copyable metadata.
#[test]
fn detection_flows_into_signal_metadata() {
    let previous: Vec<PositionSample> = Vec::new();
    let current = vec![sample("BTCUSDT", PositionSide::Long)];

    let diff = diff_positions(&previous, &current);
    assert_eq!(diff.opened.len(), 1);
    assert!(diff.closed.is_empty());

    let opened = &diff.opened[0];
    assert_eq!(SignalAction::opening(opened.side), SignalAction::Buy);
    assert_eq!(SignalAction::closing(opened.side), SignalAction::Sell);

    let whale = Whale::cex(Venue::Binance, "uid-1").with_priority_score(90);
    let score = confidence_score(whale.priority_score, opened.roe, opened.leverage);
    // 45 + min(30, 36) - 15 = 60 → HIGH
    assert_eq!(score, 60);
    assert_eq!(Confidence::from_score(score), Confidence::High);

    // One auto-copying follower makes it a HIGH-priority dispatch.
    let priority = derive_priority(1, 1, Confidence::from_score(score));
    assert_eq!(priority, copytrade_core::types::SignalPriority::High);
}

/// The execution half of a copied open: sizing, leverage, risk, then
/// the fill math.
#[test]
fn happy_path_open_execution_math() {
    let user = pro_user(1_000);
    let mut settings = UserSettings::defaults_for(user.id);
    settings.max_leverage = 20;

    let mut follow = WhaleFollow::new(user.id, Uuid::new_v4());
    follow.trade_size_usdt = Some(Decimal::new(100, 0));
    follow.copy_whale_leverage = true;

    let size = resolve_trade_size(&follow, &settings, user.available_balance);
    assert_eq!(size, Decimal::new(100, 0));
    let leverage = resolve_leverage(&follow, &settings, Some(10), Market::UsdmFutures, 125);
    assert_eq!(leverage, 10);

    let verdict = RiskManager::default().check(
        &user,
        &settings,
        &TierLimits::for_tier(SubscriptionTier::Pro),
        Venue::Binance,
        Market::UsdmFutures,
        size,
        leverage,
        &RiskContext {
            available_balance: user.available_balance,
            open_positions: 0,
            daily_realized_pnl: Decimal::ZERO,
        },
    );
    assert!(verdict.allowed);
    assert_eq!(verdict.adjusted_size_usdt, Decimal::new(100, 0));
    assert_eq!(verdict.leverage, 10);

    // quantity = size * leverage / price = 100 * 10 / 50000 = 0.02
    let price = Decimal::new(50_000, 0);
    let quantity = (verdict.adjusted_size_usdt * Decimal::from(verdict.leverage) / price).round_dp(6);
    assert_eq!(quantity, Decimal::new(2, 2));

    // Reservation: 1000 - 100 = 900 available after Phase 1.
    assert_eq!(user.available_balance - verdict.adjusted_size_usdt, Decimal::new(900, 0));
}

/// Whale exits: the close signal inverts the side and the realized PnL
/// settles reservation + profit back to the balance.
#[test]
fn close_by_whale_exit_math() {
    let previous = vec![sample("BTCUSDT", PositionSide::Long)];
    let current: Vec<PositionSample> = Vec::new();
    let diff = diff_positions(&previous, &current);
    assert_eq!(diff.closed.len(), 1);
    assert_eq!(SignalAction::closing(diff.closed[0].side), SignalAction::Sell);

    // (51000 - 50000) * 0.02 * 10 = 200
    let entry = Decimal::new(50_000, 0);
    let exit = Decimal::new(51_000, 0);
    let quantity = Decimal::new(2, 2);
    let leverage = Decimal::new(10, 0);
    let realized = (exit - entry) * quantity * leverage;
    assert_eq!(realized, Decimal::new(200, 0));

    // available 900 + reservation 100 + pnl 200 = 1200
    let available_after = Decimal::new(900, 0) + Decimal::new(100, 0) + realized;
    assert_eq!(available_after, Decimal::new(1_200, 0));
}

/// Five consecutive venue failures trip the breaker and the next call
/// fails fast without touching the venue.
#[tokio::test]
async fn circuit_breaker_trips_and_fails_fast() {
    let resilience = Resilience::new(ResilienceConfig {
        retry: RetryConfig {
            max_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
        },
        breaker: BreakerConfig {
            failure_threshold: 5,
            cooldown_secs: 60,
            half_open_probes: 2,
            success_threshold: 2,
        },
    });

    for _ in 0..5 {
        let _: Result<(), VenueError> = resilience
            .call(Venue::Binance, "user:u1", || async {
                Err(VenueError::RetryableNetwork("502".into()))
            })
            .await;
    }
    assert_eq!(
        resilience.circuit_state(Venue::Binance, "user:u1"),
        CircuitState::Open
    );

    let result: Result<(), VenueError> = resilience
        .call(Venue::Binance, "user:u1", || async { Ok(()) })
        .await;
    assert!(matches!(result, Err(VenueError::CircuitOpen { .. })));

    // Other venues are unaffected: followers there execute normally.
    assert_eq!(
        resilience.circuit_state(Venue::Okx, "user:u1"),
        CircuitState::Closed
    );
}

/// A freshly observed whale produces no signals: the snapshot must exist
/// before diffs mean anything.
#[test]
fn first_observation_emits_nothing() {
    // The scheduler only diffs when a cached snapshot exists; this pins the
    // diff semantics the first-store relies on: same book → no intents.
    let book = vec![
        sample("BTCUSDT", PositionSide::Long),
        sample("ETHUSDT", PositionSide::Short),
    ];
    assert!(diff_positions(&book, &book).is_empty());
}

/// Tier table and settings compose: a FREE user cannot get futures
/// whatever their settings say.
#[test]
fn free_tier_futures_rejection_survives_settings() {
    let mut user = pro_user(500);
    user.subscription_tier = SubscriptionTier::Free;
    let mut settings = UserSettings::defaults_for(user.id);
    settings.max_leverage = 50;
    settings.trading_mode = copytrade_core::types::TradingMode::Futures;

    let verdict = RiskManager::default().check(
        &user,
        &settings,
        &TierLimits::for_tier(SubscriptionTier::Free),
        Venue::Bybit,
        Market::UsdmFutures,
        Decimal::new(50, 0),
        10,
        &RiskContext {
            available_balance: user.available_balance,
            open_positions: 0,
            daily_realized_pnl: Decimal::ZERO,
        },
    );
    assert!(!verdict.allowed);
}
