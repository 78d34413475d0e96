//! The pre-trade policy check.

use copytrade_core::config::AppConfig;
use copytrade_core::types::{Market, User, UserSettings, Venue};
use rust_decimal::Decimal;
use tracing::debug;

use crate::limits::TierLimits;

/// Mutable inputs gathered by the engine under the user row lock.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub available_balance: Decimal,
    pub open_positions: i64,
    /// Net realized PnL since the UTC day start (negative = loss).
    pub daily_realized_pnl: Decimal,
}

/// Outcome of a check. A rejection carries the first failing reason; an
/// acceptance may still carry warnings (e.g. auto-shrunk size).
#[derive(Debug, Clone)]
pub struct RiskVerdict {
    pub allowed: bool,
    pub adjusted_size_usdt: Decimal,
    pub leverage: u32,
    pub warnings: Vec<String>,
    pub reason: Option<String>,
}

impl RiskVerdict {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            adjusted_size_usdt: Decimal::ZERO,
            leverage: 1,
            warnings: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

/// Stateless policy over a [`RiskContext`].
#[derive(Debug, Clone)]
pub struct RiskManager {
    pub min_trading_balance: Decimal,
    pub min_trade_size: Decimal,
}

impl Default for RiskManager {
    fn default() -> Self {
        Self {
            min_trading_balance: Decimal::new(5, 0),
            min_trade_size: Decimal::new(5, 0),
        }
    }
}

impl RiskManager {
    pub fn new(min_trading_balance: Decimal, min_trade_size: Decimal) -> Self {
        Self {
            min_trading_balance,
            min_trade_size,
        }
    }

    /// Run the ordered policy. Checks are evaluated strictly in order and
    /// the first violation rejects.
    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &self,
        user: &User,
        settings: &UserSettings,
        limits: &TierLimits,
        venue: Venue,
        market: Market,
        requested_size_usdt: Decimal,
        requested_leverage: u32,
        ctx: &RiskContext,
    ) -> RiskVerdict {
        let mut warnings = Vec::new();

        // 1. Account state.
        if !user.can_trade() {
            return RiskVerdict::rejected("account inactive or banned");
        }

        // 2. Minimum working balance.
        if ctx.available_balance < self.min_trading_balance {
            return RiskVerdict::rejected(format!(
                "available balance {} below minimum {}",
                ctx.available_balance, self.min_trading_balance
            ));
        }

        // 3. Minimum request.
        if requested_size_usdt < self.min_trade_size {
            return RiskVerdict::rejected(format!(
                "trade size {} below minimum {}",
                requested_size_usdt, self.min_trade_size
            ));
        }

        // 4. Futures gating by tier.
        if market.is_futures() && !limits.futures_allowed {
            return RiskVerdict::rejected("futures trading requires PRO or higher");
        }

        // 5. Auto-shrink when the balance cannot cover the request.
        let mut adjusted = requested_size_usdt;
        if ctx.available_balance < requested_size_usdt {
            adjusted = ctx.available_balance * Decimal::new(80, 2);
            if adjusted < self.min_trade_size {
                return RiskVerdict::rejected(format!(
                    "balance {} cannot cover a minimum trade",
                    ctx.available_balance
                ));
            }
            warnings.push(format!(
                "size reduced from {} to {} (80% of available balance)",
                requested_size_usdt, adjusted
            ));
        }

        // 6. Per-user size ceiling.
        if let Some(max_size) = settings.max_trade_size_usdt {
            if adjusted > max_size {
                adjusted = max_size;
                warnings.push(format!("size capped at configured maximum {}", max_size));
            }
        }

        // 7. Daily loss limit (losses only; a profitable day never blocks).
        if settings.daily_loss_limit_usdt > Decimal::ZERO {
            let daily_loss = -ctx.daily_realized_pnl.min(Decimal::ZERO);
            if daily_loss >= settings.daily_loss_limit_usdt {
                return RiskVerdict::rejected(format!(
                    "daily loss {} reached limit {}",
                    daily_loss, settings.daily_loss_limit_usdt
                ));
            }
        }

        // 8. Open-position ceiling: the stricter of tier and user settings.
        let position_cap = match limits.max_open_positions {
            Some(tier_cap) => tier_cap.min(settings.max_open_positions),
            None => settings.max_open_positions,
        };
        if position_cap > 0 && ctx.open_positions >= position_cap as i64 {
            return RiskVerdict::rejected(format!(
                "open positions at limit ({})",
                position_cap
            ));
        }

        // 9. Leverage clamp.
        let venue_cap = AppConfig::venue_leverage_cap(venue, market);
        let leverage = requested_leverage
            .max(1)
            .min(settings.max_leverage)
            .min(limits.max_leverage)
            .min(venue_cap);
        if leverage < requested_leverage {
            warnings.push(format!(
                "leverage reduced from {} to {}",
                requested_leverage, leverage
            ));
        }

        // 10. Venue minimum notional, with a fee/slippage buffer.
        let min_notional = AppConfig::min_notional(venue, market);
        let notional = adjusted * Decimal::from(leverage);
        if notional < min_notional {
            let bumped = min_notional * Decimal::new(120, 2) / Decimal::from(leverage);
            if bumped <= ctx.available_balance * Decimal::new(10, 2) {
                warnings.push(format!(
                    "size bumped from {} to {} to clear the venue minimum notional",
                    adjusted, bumped
                ));
                adjusted = bumped;
            } else {
                return RiskVerdict::rejected(format!(
                    "notional {} below venue minimum {}",
                    notional, min_notional
                ));
            }
        }

        debug!(
            user_id = %user.id,
            size = %adjusted,
            leverage = leverage,
            warnings = warnings.len(),
            "risk check passed"
        );

        RiskVerdict {
            allowed: true,
            adjusted_size_usdt: adjusted,
            leverage,
            warnings,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use copytrade_core::types::SubscriptionTier;
    use uuid::Uuid;

    fn user(tier: SubscriptionTier) -> User {
        User {
            id: Uuid::new_v4(),
            external_id: "tg:7".into(),
            subscription_tier: tier,
            subscription_expires_at: None,
            is_active: true,
            is_banned: false,
            total_balance: Decimal::new(1_000, 0),
            available_balance: Decimal::new(1_000, 0),
            two_factor_enabled: false,
            created_at: Utc::now(),
        }
    }

    fn settings() -> UserSettings {
        let mut s = UserSettings::defaults_for(Uuid::new_v4());
        s.max_leverage = 20;
        s.max_open_positions = 10;
        s.daily_loss_limit_usdt = Decimal::new(100, 0);
        s
    }

    fn ctx(available: i64) -> RiskContext {
        RiskContext {
            available_balance: Decimal::new(available, 0),
            open_positions: 0,
            daily_realized_pnl: Decimal::ZERO,
        }
    }

    fn check(
        tier: SubscriptionTier,
        market: Market,
        size: Decimal,
        leverage: u32,
        ctx: &RiskContext,
    ) -> RiskVerdict {
        RiskManager::default().check(
            &user(tier),
            &settings(),
            &TierLimits::for_tier(tier),
            Venue::Binance,
            market,
            size,
            leverage,
            ctx,
        )
    }

    #[test]
    fn happy_path_passes_unchanged() {
        // 100 USDT at 10x from a 1000 USDT balance.
        let verdict = check(
            SubscriptionTier::Pro,
            Market::UsdmFutures,
            Decimal::new(100, 0),
            10,
            &ctx(1_000),
        );
        assert!(verdict.allowed);
        assert_eq!(verdict.adjusted_size_usdt, Decimal::new(100, 0));
        assert_eq!(verdict.leverage, 10);
        assert!(verdict.warnings.is_empty());
    }

    #[test]
    fn banned_user_rejected() {
        let mut u = user(SubscriptionTier::Pro);
        u.is_banned = true;
        let verdict = RiskManager::default().check(
            &u,
            &settings(),
            &TierLimits::for_tier(SubscriptionTier::Pro),
            Venue::Binance,
            Market::Spot,
            Decimal::new(50, 0),
            1,
            &ctx(1_000),
        );
        assert!(!verdict.allowed);
    }

    #[test]
    fn below_minimum_trading_balance_rejected() {
        let verdict = check(
            SubscriptionTier::Pro,
            Market::Spot,
            Decimal::new(10, 0),
            1,
            &ctx(4),
        );
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("below minimum"));
    }

    #[test]
    fn futures_gated_by_tier() {
        // A FREE user hitting a futures signal.
        let verdict = check(
            SubscriptionTier::Free,
            Market::UsdmFutures,
            Decimal::new(50, 0),
            5,
            &ctx(1_000),
        );
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("PRO"));
    }

    #[test]
    fn insufficient_balance_auto_adjusts_to_eighty_percent() {
        // Balance 50, request 100: proceed with 40.
        let verdict = check(
            SubscriptionTier::Pro,
            Market::UsdmFutures,
            Decimal::new(100, 0),
            1,
            &ctx(50),
        );
        assert!(verdict.allowed);
        assert_eq!(verdict.adjusted_size_usdt, Decimal::new(4_000, 2));
        assert_eq!(verdict.warnings.len(), 1);
    }

    #[test]
    fn auto_adjust_below_minimum_rejects() {
        // 80% of 6 = 4.8 < 5 → reject rather than dust-trade.
        let verdict = check(
            SubscriptionTier::Pro,
            Market::Spot,
            Decimal::new(100, 0),
            1,
            &ctx(6),
        );
        assert!(!verdict.allowed);
    }

    #[test]
    fn daily_loss_at_exact_limit_rejects() {
        let mut context = ctx(1_000);
        context.daily_realized_pnl = Decimal::new(-100, 0);
        let verdict = RiskManager::default().check(
            &user(SubscriptionTier::Pro),
            &settings(),
            &TierLimits::for_tier(SubscriptionTier::Pro),
            Venue::Binance,
            Market::Spot,
            Decimal::new(50, 0),
            1,
            &context,
        );
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("daily loss"));
    }

    #[test]
    fn profitable_day_never_blocks() {
        let mut context = ctx(1_000);
        context.daily_realized_pnl = Decimal::new(500, 0);
        let verdict = RiskManager::default().check(
            &user(SubscriptionTier::Pro),
            &settings(),
            &TierLimits::for_tier(SubscriptionTier::Pro),
            Venue::Binance,
            Market::Spot,
            Decimal::new(50, 0),
            1,
            &context,
        );
        assert!(verdict.allowed);
    }

    #[test]
    fn open_position_cap_uses_the_stricter_bound() {
        let mut context = ctx(1_000);
        context.open_positions = 10;
        // PRO tier caps at 10; user settings also 10.
        let verdict = RiskManager::default().check(
            &user(SubscriptionTier::Pro),
            &settings(),
            &TierLimits::for_tier(SubscriptionTier::Pro),
            Venue::Binance,
            Market::Spot,
            Decimal::new(50, 0),
            1,
            &context,
        );
        assert!(!verdict.allowed);
    }

    #[test]
    fn leverage_clamped_by_tier_and_settings() {
        let verdict = check(
            SubscriptionTier::Pro,
            Market::UsdmFutures,
            Decimal::new(100, 0),
            100,
            &ctx(1_000),
        );
        assert!(verdict.allowed);
        // settings.max_leverage = 20 and PRO tier caps at 20.
        assert_eq!(verdict.leverage, 20);
        assert!(!verdict.warnings.is_empty());
    }

    #[test]
    fn notional_exactly_at_minimum_passes_without_bump() {
        // Binance min notional 5; size 5 at 1x is exactly the boundary.
        let verdict = check(
            SubscriptionTier::Pro,
            Market::Spot,
            Decimal::new(5, 0),
            1,
            &ctx(1_000),
        );
        assert!(verdict.allowed);
        assert_eq!(verdict.adjusted_size_usdt, Decimal::new(5, 0));
        assert!(verdict.warnings.is_empty());
    }

    #[test]
    fn sub_notional_size_is_bumped_with_buffer() {
        let mut s = settings();
        // Force a sub-notional effective size via the user ceiling.
        s.max_trade_size_usdt = Some(Decimal::new(3, 0));
        let verdict = RiskManager::default().check(
            &user(SubscriptionTier::Pro),
            &s,
            &TierLimits::for_tier(SubscriptionTier::Pro),
            Venue::Binance,
            Market::Spot,
            Decimal::new(5, 0),
            1,
            &ctx(1_000),
        );
        assert!(verdict.allowed);
        // 5 * 1.20 = 6, affordable within 10% of 1000.
        assert_eq!(verdict.adjusted_size_usdt, Decimal::new(600, 2));
    }

    #[test]
    fn sub_notional_bump_beyond_ten_percent_rejects() {
        let mut s = settings();
        s.max_trade_size_usdt = Some(Decimal::new(3, 0));
        // 10% of 50 = 5 < 6 needed → reject.
        let verdict = RiskManager::default().check(
            &user(SubscriptionTier::Pro),
            &s,
            &TierLimits::for_tier(SubscriptionTier::Pro),
            Venue::Binance,
            Market::Spot,
            Decimal::new(5, 0),
            1,
            &ctx(50),
        );
        assert!(!verdict.allowed);
    }
}
