//! Subscriber account types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::venue::Venue;

/// Subscription plan a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Pro,
    Elite,
}

impl SubscriptionTier {
    pub fn code(&self) -> i16 {
        match self {
            SubscriptionTier::Free => 0,
            SubscriptionTier::Pro => 1,
            SubscriptionTier::Elite => 2,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => SubscriptionTier::Pro,
            2 => SubscriptionTier::Elite,
            _ => SubscriptionTier::Free,
        }
    }

    pub fn allows_futures(&self) -> bool {
        matches!(self, SubscriptionTier::Pro | SubscriptionTier::Elite)
    }
}

/// Which market segments a user copies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Spot,
    Futures,
    Mixed,
}

impl TradingMode {
    pub fn code(&self) -> i16 {
        match self {
            TradingMode::Spot => 0,
            TradingMode::Futures => 1,
            TradingMode::Mixed => 2,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => TradingMode::Futures,
            2 => TradingMode::Mixed,
            _ => TradingMode::Spot,
        }
    }
}

/// A subscriber account.
///
/// `available_balance` is the copy-trading reserve pool: Phase 1 of every
/// execution deducts from it and Phase 2 settles or refunds it. It never
/// exceeds `total_balance` and never goes negative at a commit boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Opaque identity from the host platform (e.g. a messenger user id).
    pub external_id: String,
    pub subscription_tier: SubscriptionTier,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_banned: bool,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub two_factor_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn can_trade(&self) -> bool {
        self.is_active && !self.is_banned
    }

    /// Whether the subscription currently grants its tier's privileges.
    pub fn subscription_active(&self) -> bool {
        match self.subscription_expires_at {
            Some(expires_at) => expires_at > Utc::now(),
            None => self.subscription_tier == SubscriptionTier::Free,
        }
    }

    /// Tier used for limit checks: expired paid plans fall back to FREE.
    pub fn effective_tier(&self) -> SubscriptionTier {
        if self.subscription_tier != SubscriptionTier::Free && !self.subscription_active() {
            SubscriptionTier::Free
        } else {
            self.subscription_tier
        }
    }
}

/// Per-user copy-trading settings (1:1 with [`User`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: Uuid,
    pub trading_mode: TradingMode,
    pub preferred_venue: Venue,
    pub auto_copy_enabled: bool,
    pub default_trade_size_usdt: Decimal,
    pub max_trade_size_usdt: Option<Decimal>,
    pub stop_loss_percent: Decimal,
    pub take_profit_percent: Option<Decimal>,
    pub daily_loss_limit_usdt: Decimal,
    pub max_open_positions: u32,
    pub default_leverage: u32,
    pub max_leverage: u32,
    pub auto_close_on_tp: bool,
    pub auto_close_on_whale_exit: bool,
    pub notify_on_trade: bool,
    pub notify_on_close: bool,
}

impl UserSettings {
    /// Conservative defaults for a freshly registered user.
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            trading_mode: TradingMode::Spot,
            preferred_venue: Venue::Binance,
            auto_copy_enabled: false,
            default_trade_size_usdt: Decimal::new(10, 0),
            max_trade_size_usdt: None,
            stop_loss_percent: Decimal::new(5, 0),
            take_profit_percent: None,
            daily_loss_limit_usdt: Decimal::new(100, 0),
            max_open_positions: 5,
            default_leverage: 5,
            max_leverage: 20,
            auto_close_on_tp: true,
            auto_close_on_whale_exit: true,
            notify_on_trade: true,
            notify_on_close: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(tier: SubscriptionTier, expires: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            external_id: "tg:1".into(),
            subscription_tier: tier,
            subscription_expires_at: expires,
            is_active: true,
            is_banned: false,
            total_balance: Decimal::new(1000, 0),
            available_balance: Decimal::new(1000, 0),
            two_factor_enabled: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn expired_pro_falls_back_to_free() {
        let expired = user(SubscriptionTier::Pro, Some(Utc::now() - Duration::days(1)));
        assert_eq!(expired.effective_tier(), SubscriptionTier::Free);

        let current = user(SubscriptionTier::Pro, Some(Utc::now() + Duration::days(1)));
        assert_eq!(current.effective_tier(), SubscriptionTier::Pro);
    }

    #[test]
    fn banned_user_cannot_trade() {
        let mut u = user(SubscriptionTier::Free, None);
        u.is_banned = true;
        assert!(!u.can_trade());
    }
}
