//! Sizing and leverage precedence.
//!
//! Both chains are a first-class contract: sources are evaluated strictly
//! in order and the first configured one wins.

use copytrade_core::types::{Market, UserSettings, WhaleFollow};
use rust_decimal::Decimal;

/// Resolve the copy size in USDT for one follower:
///
/// 1. `follow.trade_size_usdt`
/// 2. `follow.trade_size_percent` of the available balance
/// 3. `settings.default_trade_size_usdt`
/// 4. 1% of the available balance
pub fn resolve_trade_size(
    follow: &WhaleFollow,
    settings: &UserSettings,
    available_balance: Decimal,
) -> Decimal {
    if let Some(fixed) = follow.trade_size_usdt {
        return fixed;
    }
    if let Some(percent) = follow.trade_size_percent {
        return available_balance * percent / Decimal::new(100, 0);
    }
    if settings.default_trade_size_usdt > Decimal::ZERO {
        return settings.default_trade_size_usdt;
    }
    available_balance * Decimal::new(1, 2)
}

/// Resolve the leverage for one follower:
///
/// 1. `follow.leverage_override`
/// 2. the whale's own leverage, when `follow.copy_whale_leverage`
/// 3. `settings.default_leverage`
/// 4. 5
///
/// The result is always clamped to `settings.max_leverage` and the venue
/// cap; SPOT forces 1 regardless.
pub fn resolve_leverage(
    follow: &WhaleFollow,
    settings: &UserSettings,
    whale_leverage: Option<u32>,
    market: Market,
    venue_cap: u32,
) -> u32 {
    if market == Market::Spot {
        return 1;
    }

    let chosen = if let Some(override_lev) = follow.leverage_override {
        override_lev
    } else if follow.copy_whale_leverage {
        match whale_leverage {
            Some(lev) => lev,
            None => fallback_leverage(settings),
        }
    } else {
        fallback_leverage(settings)
    };

    chosen.max(1).min(settings.max_leverage).min(venue_cap)
}

fn fallback_leverage(settings: &UserSettings) -> u32 {
    if settings.default_leverage > 0 {
        settings.default_leverage
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn follow() -> WhaleFollow {
        WhaleFollow::new(Uuid::new_v4(), Uuid::new_v4())
    }

    fn settings() -> UserSettings {
        let mut s = UserSettings::defaults_for(Uuid::new_v4());
        s.default_trade_size_usdt = Decimal::new(25, 0);
        s.default_leverage = 7;
        s.max_leverage = 20;
        s
    }

    // One test per precedence level, in order.

    #[test]
    fn size_level_a_fixed_amount_wins() {
        let mut f = follow();
        f.trade_size_usdt = Some(Decimal::new(100, 0));
        f.trade_size_percent = Some(Decimal::new(50, 0));
        let size = resolve_trade_size(&f, &settings(), Decimal::new(1_000, 0));
        assert_eq!(size, Decimal::new(100, 0));
    }

    #[test]
    fn size_level_b_percent_of_available_balance() {
        let mut f = follow();
        f.trade_size_percent = Some(Decimal::new(5, 0));
        let size = resolve_trade_size(&f, &settings(), Decimal::new(1_000, 0));
        assert_eq!(size, Decimal::new(50, 0));
    }

    #[test]
    fn size_level_c_settings_default() {
        let size = resolve_trade_size(&follow(), &settings(), Decimal::new(1_000, 0));
        assert_eq!(size, Decimal::new(25, 0));
    }

    #[test]
    fn size_level_d_one_percent_fallback() {
        let mut s = settings();
        s.default_trade_size_usdt = Decimal::ZERO;
        let size = resolve_trade_size(&follow(), &s, Decimal::new(1_000, 0));
        assert_eq!(size, Decimal::new(10, 0));
    }

    #[test]
    fn leverage_level_a_override_clamped_to_settings_max() {
        let mut f = follow();
        f.leverage_override = Some(50);
        f.copy_whale_leverage = true;
        let lev = resolve_leverage(&f, &settings(), Some(3), Market::UsdmFutures, 125);
        assert_eq!(lev, 20, "override wins but clamps to max_leverage");
    }

    #[test]
    fn leverage_level_b_copies_whale_when_enabled() {
        let mut f = follow();
        f.copy_whale_leverage = true;
        let lev = resolve_leverage(&f, &settings(), Some(10), Market::UsdmFutures, 125);
        assert_eq!(lev, 10);

        // Whale leverage above the user's cap clamps down.
        let lev = resolve_leverage(&f, &settings(), Some(100), Market::UsdmFutures, 125);
        assert_eq!(lev, 20);
    }

    #[test]
    fn leverage_level_c_settings_default() {
        let lev = resolve_leverage(&follow(), &settings(), Some(10), Market::UsdmFutures, 125);
        assert_eq!(lev, 7, "whale leverage ignored without copy_whale_leverage");
    }

    #[test]
    fn leverage_level_d_hardcoded_fallback() {
        let mut s = settings();
        s.default_leverage = 0;
        let lev = resolve_leverage(&follow(), &s, None, Market::UsdmFutures, 125);
        assert_eq!(lev, 5);
    }

    #[test]
    fn leverage_level_e_spot_forces_one() {
        let mut f = follow();
        f.leverage_override = Some(10);
        let lev = resolve_leverage(&f, &settings(), Some(20), Market::Spot, 125);
        assert_eq!(lev, 1);
    }

    #[test]
    fn venue_cap_applies_after_everything() {
        let mut f = follow();
        f.leverage_override = Some(15);
        let lev = resolve_leverage(&f, &settings(), None, Market::UsdmFutures, 8);
        assert_eq!(lev, 8);
    }
}
