//! Subscription-tier limit table.

use copytrade_core::types::SubscriptionTier;
use rust_decimal::Decimal;

/// What a subscription tier is allowed to do.
#[derive(Debug, Clone)]
pub struct TierLimits {
    pub max_followed_whales: u32,
    /// `None` means unlimited (ELITE).
    pub max_open_positions: Option<u32>,
    pub max_leverage: u32,
    pub futures_allowed: bool,
    /// Platform commission on copied trades.
    pub commission_rate: Decimal,
}

impl TierLimits {
    pub fn for_tier(tier: SubscriptionTier) -> Self {
        match tier {
            SubscriptionTier::Free => Self {
                max_followed_whales: 1,
                max_open_positions: Some(3),
                max_leverage: 5,
                futures_allowed: false,
                commission_rate: Decimal::new(10, 3), // 1.0%
            },
            SubscriptionTier::Pro => Self {
                max_followed_whales: 5,
                max_open_positions: Some(10),
                max_leverage: 20,
                futures_allowed: true,
                commission_rate: Decimal::new(5, 3), // 0.5%
            },
            SubscriptionTier::Elite => Self {
                max_followed_whales: 20,
                max_open_positions: None,
                max_leverage: 50,
                futures_allowed: true,
                commission_rate: Decimal::new(25, 4), // 0.25%
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_has_no_futures() {
        let limits = TierLimits::for_tier(SubscriptionTier::Free);
        assert!(!limits.futures_allowed);
        assert_eq!(limits.max_open_positions, Some(3));
    }

    #[test]
    fn elite_tier_is_unlimited_on_positions() {
        let limits = TierLimits::for_tier(SubscriptionTier::Elite);
        assert!(limits.futures_allowed);
        assert_eq!(limits.max_open_positions, None);
        assert!(
            limits.commission_rate < TierLimits::for_tier(SubscriptionTier::Pro).commission_rate
        );
    }
}
