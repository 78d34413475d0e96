//! Throughput benchmarks for the pre-trade policy.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use uuid::Uuid;

use whalecopy::core::types::{Market, SubscriptionTier, User, UserSettings, Venue, WhaleFollow};
use whalecopy::risk::{resolve_leverage, resolve_trade_size, RiskContext, RiskManager, TierLimits};

fn user() -> User {
    User {
        id: Uuid::new_v4(),
        external_id: "bench".into(),
        subscription_tier: SubscriptionTier::Pro,
        subscription_expires_at: None,
        is_active: true,
        is_banned: false,
        total_balance: Decimal::new(10_000, 0),
        available_balance: Decimal::new(10_000, 0),
        two_factor_enabled: false,
        created_at: Utc::now(),
    }
}

fn bench_risk_check(c: &mut Criterion) {
    let user = user();
    let settings = UserSettings::defaults_for(user.id);
    let limits = TierLimits::for_tier(SubscriptionTier::Pro);
    let risk = RiskManager::default();
    let ctx = RiskContext {
        available_balance: user.available_balance,
        open_positions: 3,
        daily_realized_pnl: Decimal::new(-20, 0),
    };

    c.bench_function("risk_check", |b| {
        b.iter(|| {
            risk.check(
                black_box(&user),
                black_box(&settings),
                black_box(&limits),
                Venue::Binance,
                Market::UsdmFutures,
                Decimal::new(100, 0),
                10,
                black_box(&ctx),
            )
        })
    });
}

fn bench_sizing_chain(c: &mut Criterion) {
    let settings = UserSettings::defaults_for(Uuid::new_v4());
    let mut follow = WhaleFollow::new(Uuid::new_v4(), Uuid::new_v4());
    follow.trade_size_percent = Some(Decimal::new(5, 0));
    follow.copy_whale_leverage = true;

    c.bench_function("sizing_and_leverage", |b| {
        b.iter(|| {
            let size = resolve_trade_size(
                black_box(&follow),
                black_box(&settings),
                Decimal::new(10_000, 0),
            );
            let leverage = resolve_leverage(
                black_box(&follow),
                black_box(&settings),
                Some(10),
                Market::UsdmFutures,
                125,
            );
            (size, leverage)
        })
    });
}

criterion_group!(benches, bench_risk_check, bench_sizing_chain);
criterion_main!(benches);
