//! Signal confidence scoring and dispatch priority.

use copytrade_core::types::{Confidence, SignalPriority};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Score a detection from the whale's historical quality, the position's
/// reported ROE, and a leverage penalty:
///
/// `clamp(10, 100, 0.5·whale_score + min(30, |roe|·3) − min(20, leverage·1.5))`
pub fn confidence_score(
    whale_score: u32,
    roe: Option<Decimal>,
    leverage: Option<u32>,
) -> u32 {
    let base = 0.5 * whale_score as f64;
    let roe_bonus = roe
        .and_then(|r| r.abs().to_f64())
        .map(|r| (r * 3.0).min(30.0))
        .unwrap_or(0.0);
    let leverage_penalty = leverage
        .map(|l| (l as f64 * 1.5).min(20.0))
        .unwrap_or(0.0);

    (base + roe_bonus - leverage_penalty).clamp(10.0, 100.0).round() as u32
}

/// Priority comes from the whale's follower context, not the signal itself:
/// HIGH when anyone will auto-copy it (or confidence is VERY_HIGH), LOW when
/// nobody follows the whale at all, MEDIUM otherwise.
pub fn derive_priority(
    auto_copy_followers: i64,
    active_followers: i64,
    confidence: Confidence,
) -> SignalPriority {
    if auto_copy_followers > 0 || confidence == Confidence::VeryHigh {
        SignalPriority::High
    } else if active_followers == 0 {
        SignalPriority::Low
    } else {
        SignalPriority::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_floors_at_ten() {
        // Worthless whale with heavy leverage still scores 10.
        assert_eq!(confidence_score(1, None, Some(100)), 10);
    }

    #[test]
    fn score_caps_at_one_hundred() {
        assert_eq!(confidence_score(100, Some(Decimal::new(1_000, 0)), None), 80);
        // Bonus is capped at 30, so even an absurd ROE cannot exceed 100.
        assert!(confidence_score(100, Some(Decimal::new(1_000_000, 0)), None) <= 100);
    }

    #[test]
    fn roe_bonus_is_capped_at_thirty() {
        let capped = confidence_score(50, Some(Decimal::new(10, 0)), None);
        let beyond = confidence_score(50, Some(Decimal::new(500, 0)), None);
        assert_eq!(capped, beyond);
        assert_eq!(capped, 55);
    }

    #[test]
    fn negative_roe_counts_by_magnitude() {
        assert_eq!(
            confidence_score(50, Some(Decimal::new(-5, 0)), None),
            confidence_score(50, Some(Decimal::new(5, 0)), None)
        );
    }

    #[test]
    fn leverage_penalty_is_capped_at_twenty() {
        let at_cap = confidence_score(80, None, Some(14));
        let beyond = confidence_score(80, None, Some(125));
        assert_eq!(at_cap, beyond);
        assert_eq!(beyond, 20);
    }

    #[test]
    fn s1_style_detection_scores_high() {
        // whale_score 90, roe unreported, leverage 10:
        // 45 + 0 - 15 = 30 → LOW bucket... with roe 15%: 45 + 30 - 15 = 60.
        let score = confidence_score(90, Some(Decimal::new(15, 0)), Some(10));
        assert_eq!(score, 60);
        assert_eq!(Confidence::from_score(score), Confidence::High);
    }

    #[test]
    fn priority_prefers_auto_copiers() {
        assert_eq!(
            derive_priority(2, 5, Confidence::Low),
            SignalPriority::High
        );
        assert_eq!(
            derive_priority(0, 5, Confidence::Medium),
            SignalPriority::Medium
        );
        assert_eq!(
            derive_priority(0, 0, Confidence::Medium),
            SignalPriority::Low
        );
        // VERY_HIGH confidence promotes even without copiers.
        assert_eq!(
            derive_priority(0, 0, Confidence::VeryHigh),
            SignalPriority::High
        );
    }
}
