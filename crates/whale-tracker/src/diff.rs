//! Snapshot diffing: turn two observations of a whale's book into signal
//! intents.

use copytrade_core::types::{Market, PositionSample};
use std::collections::HashMap;

/// Result of diffing the cached snapshot against a fresh observation.
///
/// `opened` holds samples present now but not before; `closed` holds the
/// PREVIOUS samples of symbols that disappeared (the recorded side is what
/// the closing signal must invert).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDiff {
    pub opened: Vec<PositionSample>,
    pub closed: Vec<PositionSample>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty()
    }
}

/// Compute the position diff keyed by (symbol, market).
///
/// A symbol present on both sides with a flipped side coalesces into a
/// single close of the previous exposure: the cache only sees the net
/// difference between polls, and followers holding the old position must
/// exit either way. Quantity-only changes emit nothing.
pub fn diff_positions(previous: &[PositionSample], current: &[PositionSample]) -> SnapshotDiff {
    let prev_by_key: HashMap<(&str, Market), &PositionSample> = previous
        .iter()
        .map(|p| ((p.symbol.as_str(), p.market), p))
        .collect();
    let curr_by_key: HashMap<(&str, Market), &PositionSample> = current
        .iter()
        .map(|p| ((p.symbol.as_str(), p.market), p))
        .collect();

    let mut diff = SnapshotDiff::default();

    for (key, sample) in &curr_by_key {
        if !prev_by_key.contains_key(key) {
            diff.opened.push((*sample).clone());
        }
    }

    for (key, sample) in &prev_by_key {
        match curr_by_key.get(key) {
            None => diff.closed.push((*sample).clone()),
            Some(now) if now.side != sample.side => diff.closed.push((*sample).clone()),
            Some(_) => {}
        }
    }

    // Deterministic output order for stable fingerprints and tests.
    diff.opened.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    diff.closed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytrade_core::types::PositionSide;
    use rust_decimal::Decimal;

    fn sample(symbol: &str, side: PositionSide, qty: i64) -> PositionSample {
        PositionSample {
            symbol: symbol.to_string(),
            market: Market::UsdmFutures,
            side,
            quantity: Decimal::new(qty, 0),
            entry_price: Decimal::new(50_000, 0),
            leverage: Some(10),
            roe: None,
        }
    }

    #[test]
    fn empty_to_one_position_opens() {
        let diff = diff_positions(&[], &[sample("BTCUSDT", PositionSide::Long, 1)]);
        assert_eq!(diff.opened.len(), 1);
        assert_eq!(diff.opened[0].symbol, "BTCUSDT");
        assert!(diff.closed.is_empty());
    }

    #[test]
    fn one_position_to_empty_closes_with_previous_side() {
        let diff = diff_positions(&[sample("BTCUSDT", PositionSide::Short, 1)], &[]);
        assert!(diff.opened.is_empty());
        assert_eq!(diff.closed.len(), 1);
        assert_eq!(diff.closed[0].side, PositionSide::Short);
    }

    #[test]
    fn unchanged_book_emits_nothing() {
        let book = vec![
            sample("BTCUSDT", PositionSide::Long, 1),
            sample("ETHUSDT", PositionSide::Short, 5),
        ];
        assert!(diff_positions(&book, &book).is_empty());
    }

    #[test]
    fn quantity_change_alone_emits_nothing() {
        let before = vec![sample("BTCUSDT", PositionSide::Long, 1)];
        let after = vec![sample("BTCUSDT", PositionSide::Long, 3)];
        assert!(diff_positions(&before, &after).is_empty());
    }

    #[test]
    fn side_flip_coalesces_into_close_of_previous_side() {
        let before = vec![sample("BTCUSDT", PositionSide::Long, 1)];
        let after = vec![sample("BTCUSDT", PositionSide::Short, 1)];
        let diff = diff_positions(&before, &after);
        assert!(diff.opened.is_empty());
        assert_eq!(diff.closed.len(), 1);
        assert_eq!(diff.closed[0].side, PositionSide::Long);
    }

    #[test]
    fn mixed_open_and_close() {
        let before = vec![
            sample("BTCUSDT", PositionSide::Long, 1),
            sample("ETHUSDT", PositionSide::Long, 2),
        ];
        let after = vec![
            sample("ETHUSDT", PositionSide::Long, 2),
            sample("SOLUSDT", PositionSide::Short, 100),
        ];
        let diff = diff_positions(&before, &after);
        assert_eq!(diff.opened.len(), 1);
        assert_eq!(diff.opened[0].symbol, "SOLUSDT");
        assert_eq!(diff.closed.len(), 1);
        assert_eq!(diff.closed[0].symbol, "BTCUSDT");
    }

    #[test]
    fn same_symbol_on_different_markets_is_distinct() {
        let mut spot = sample("BTCUSDT", PositionSide::Long, 1);
        spot.market = Market::Spot;
        let futures = sample("BTCUSDT", PositionSide::Long, 1);

        let diff = diff_positions(&[spot], &[futures]);
        assert_eq!(diff.opened.len(), 1);
        assert_eq!(diff.opened[0].market, Market::UsdmFutures);
        assert_eq!(diff.closed.len(), 1);
        assert_eq!(diff.closed[0].market, Market::Spot);
    }
}
