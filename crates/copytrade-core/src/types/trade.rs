//! Trade types: the aggregate root of one copy execution.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::position::PositionSide;
use crate::types::venue::{Market, Venue};

/// Direction of a trade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
    Long,
    Short,
}

impl TradeSide {
    pub fn code(&self) -> i16 {
        match self {
            TradeSide::Buy => 0,
            TradeSide::Sell => 1,
            TradeSide::Long => 2,
            TradeSide::Short => 3,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => TradeSide::Sell,
            2 => TradeSide::Long,
            3 => TradeSide::Short,
            _ => TradeSide::Buy,
        }
    }

    /// Position side this trade opens, if it is an opening trade.
    pub fn position_side(&self) -> PositionSide {
        match self {
            TradeSide::Buy | TradeSide::Long => PositionSide::Long,
            TradeSide::Sell | TradeSide::Short => PositionSide::Short,
        }
    }
}

/// Order type used to execute a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn code(&self) -> i16 {
        match self {
            OrderType::Market => 0,
            OrderType::Limit => 1,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => OrderType::Limit,
            _ => OrderType::Market,
        }
    }
}

/// Trade lifecycle.
///
/// `PENDING → EXECUTING → {FILLED, FAILED, NEEDS_RECONCILIATION}`;
/// `NEEDS_RECONCILIATION → {FILLED, FAILED}` once the reconciler resolves
/// the venue-side outcome. Transitions are monotonic and version-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Executing,
    Filled,
    Failed,
    NeedsReconciliation,
}

impl TradeStatus {
    pub fn code(&self) -> i16 {
        match self {
            TradeStatus::Pending => 0,
            TradeStatus::Executing => 1,
            TradeStatus::Filled => 2,
            TradeStatus::Failed => 3,
            TradeStatus::NeedsReconciliation => 4,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => TradeStatus::Executing,
            2 => TradeStatus::Filled,
            3 => TradeStatus::Failed,
            4 => TradeStatus::NeedsReconciliation,
            _ => TradeStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Filled | TradeStatus::Failed)
    }
}

/// One copy execution for one follower.
///
/// Carries the Phase-1 reservation (`trade_value_usdt`); Phase 2 either
/// converts it into a position or refunds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub user_id: Uuid,
    pub signal_id: Option<Uuid>,
    pub whale_id: Option<Uuid>,
    pub venue: Venue,
    pub market: Market,
    pub symbol: String,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub requested_quantity: Decimal,
    /// USDT reserved from the user's available balance in Phase 1.
    pub trade_value_usdt: Decimal,
    pub leverage: Option<u32>,
    pub status: TradeStatus,
    pub venue_order_id: Option<String>,
    pub executed_price: Option<Decimal>,
    pub executed_quantity: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trade {
    /// Deterministic client order id sent with every place-order call.
    ///
    /// Lets the reconciler recover the outcome of an orphaned Phase 2 by
    /// venue-side lookup. Kept under the strictest venue length cap (32).
    pub fn client_order_id(&self) -> String {
        client_order_id(self.id, self.venue)
    }
}

/// See [`Trade::client_order_id`].
pub fn client_order_id(trade_id: Uuid, venue: Venue) -> String {
    let simple = trade_id.simple().to_string();
    format!("wc{}{}", venue.code(), &simple[..29])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_order_id_is_deterministic_and_bounded() {
        let id = Uuid::new_v4();
        let a = client_order_id(id, Venue::Binance);
        let b = client_order_id(id, Venue::Binance);
        assert_eq!(a, b);
        assert!(a.len() <= 32);
        assert_ne!(a, client_order_id(id, Venue::Okx));
        assert_ne!(a, client_order_id(Uuid::new_v4(), Venue::Binance));
    }

    #[test]
    fn side_maps_to_position_side() {
        assert_eq!(TradeSide::Buy.position_side(), PositionSide::Long);
        assert_eq!(TradeSide::Long.position_side(), PositionSide::Long);
        assert_eq!(TradeSide::Sell.position_side(), PositionSide::Short);
        assert_eq!(TradeSide::Short.position_side(), PositionSide::Short);
    }
}
