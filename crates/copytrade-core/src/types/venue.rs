//! Venue and market identifiers plus the venue-neutral wire types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::position::PositionSide;

/// A supported centralized exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Bybit,
    Okx,
    Bitget,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Bybit => "bybit",
            Venue::Okx => "okx",
            Venue::Bitget => "bitget",
        }
    }

    pub fn code(&self) -> i16 {
        match self {
            Venue::Binance => 0,
            Venue::Bybit => 1,
            Venue::Okx => 2,
            Venue::Bitget => 3,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => Venue::Bybit,
            2 => Venue::Okx,
            3 => Venue::Bitget,
            _ => Venue::Binance,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Some(Venue::Binance),
            "bybit" => Some(Venue::Bybit),
            "okx" => Some(Venue::Okx),
            "bitget" => Some(Venue::Bitget),
            _ => None,
        }
    }

    /// Whether the venue's copy-trading leaderboard is public without auth.
    pub fn leaderboard_is_public(&self) -> bool {
        matches!(self, Venue::Binance | Venue::Bitget)
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market segment an order targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Spot,
    /// USD(T)-margined futures.
    UsdmFutures,
    /// Coin-margined futures. Contract-quantity conversion is adapter-owned.
    CoinmFutures,
}

impl Market {
    pub fn code(&self) -> i16 {
        match self {
            Market::Spot => 0,
            Market::UsdmFutures => 1,
            Market::CoinmFutures => 2,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => Market::UsdmFutures,
            2 => Market::CoinmFutures,
            _ => Market::Spot,
        }
    }

    pub fn is_futures(&self) -> bool {
        matches!(self, Market::UsdmFutures | Market::CoinmFutures)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Spot => "spot",
            Market::UsdmFutures => "usdm_futures",
            Market::CoinmFutures => "coinm_futures",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized fill report returned by every order-placing adapter call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub venue_order_id: String,
    pub filled_price: Decimal,
    pub filled_quantity: Decimal,
    pub fee: Option<Decimal>,
    pub raw_timestamp: DateTime<Utc>,
}

/// One asset's balance on a venue account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// A single open position observed on a trader's public profile
/// or on a follower's own account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub symbol: String,
    pub market: Market,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: Option<u32>,
    /// Return on equity as a percentage, when the leaderboard reports it.
    pub roe: Option<Decimal>,
}

/// Outcome of sampling a trader's public positions.
///
/// `Empty` means the venue answered and the trader shares nothing right now;
/// auth rejections and throttling surface as errors, never as `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub enum TraderScan {
    Samples(Vec<PositionSample>),
    Empty,
}

/// One leaderboard row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderSummary {
    pub venue: Venue,
    pub venue_uid: String,
    pub display_name: Option<String>,
    pub roi: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub follower_count: Option<u32>,
}

/// Venue-side state of an order looked up during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueOrderState {
    Filled,
    PartiallyFilled,
    Open,
    Cancelled,
    Rejected,
}

/// Order status looked up by client order id during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub venue_order_id: String,
    pub state: VenueOrderState,
    pub filled_price: Option<Decimal>,
    pub filled_quantity: Option<Decimal>,
    pub fee: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_code_round_trip() {
        for venue in [Venue::Binance, Venue::Bybit, Venue::Okx, Venue::Bitget] {
            assert_eq!(Venue::from_code(venue.code()), venue);
            assert_eq!(Venue::parse(venue.as_str()), Some(venue));
        }
    }

    #[test]
    fn market_code_round_trip() {
        for market in [Market::Spot, Market::UsdmFutures, Market::CoinmFutures] {
            assert_eq!(Market::from_code(market.code()), market);
        }
        assert!(Market::UsdmFutures.is_futures());
        assert!(!Market::Spot.is_futures());
    }
}
