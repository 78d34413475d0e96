//! Position types for open copy-trading exposure.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::venue::{Market, Venue};

/// Direction of an open position. SPOT holdings use LONG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn code(&self) -> i16 {
        match self {
            PositionSide::Long => 0,
            PositionSide::Short => 1,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => PositionSide::Short,
            _ => PositionSide::Long,
        }
    }

    /// +1 for LONG, -1 for SHORT; the PnL direction multiplier.
    pub fn direction(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Position lifecycle. `LIQUIDATED` is only ever set by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

impl PositionStatus {
    pub fn code(&self) -> i16 {
        match self {
            PositionStatus::Open => 0,
            PositionStatus::Closed => 1,
            PositionStatus::Liquidated => 2,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => PositionStatus::Closed,
            2 => PositionStatus::Liquidated,
            _ => PositionStatus::Open,
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Manual,
    StopLoss,
    TakeProfit,
    WhaleExit,
    Liquidation,
    /// The reconciler found the position gone from the venue.
    ReconciliationExternalClose,
}

impl CloseReason {
    pub fn code(&self) -> i16 {
        match self {
            CloseReason::Manual => 0,
            CloseReason::StopLoss => 1,
            CloseReason::TakeProfit => 2,
            CloseReason::WhaleExit => 3,
            CloseReason::Liquidation => 4,
            CloseReason::ReconciliationExternalClose => 5,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => CloseReason::StopLoss,
            2 => CloseReason::TakeProfit,
            3 => CloseReason::WhaleExit,
            4 => CloseReason::Liquidation,
            5 => CloseReason::ReconciliationExternalClose,
            _ => CloseReason::Manual,
        }
    }
}

/// An open or settled copy-trading position.
///
/// References the trade that opened it and, once closed, the trade that
/// closed it: numeric ids with lookup, never an object graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub user_id: Uuid,
    pub whale_id: Option<Uuid>,
    pub entry_trade_id: Uuid,
    pub exit_trade_id: Option<Uuid>,
    pub venue: Venue,
    pub market: Market,
    pub symbol: String,
    pub side: PositionSide,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub current_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub quantity: Decimal,
    pub stop_loss_price: Option<Decimal>,
    /// Set when the venue accepted a remote stop order.
    pub stop_loss_order_id: Option<String>,
    pub take_profit_price: Option<Decimal>,
    pub take_profit_order_id: Option<String>,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    pub version: i64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Leveraged PnL against a mark price.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price)
            * self.quantity
            * self.side.direction()
            * Decimal::from(self.leverage)
    }

    /// Whether the given mark price triggers the local stop-loss.
    pub fn stop_loss_hit(&self, price: Decimal) -> bool {
        match (self.stop_loss_price, self.side) {
            (Some(stop), PositionSide::Long) => price <= stop,
            (Some(stop), PositionSide::Short) => price >= stop,
            (None, _) => false,
        }
    }

    /// Whether the given mark price triggers the local take-profit.
    pub fn take_profit_hit(&self, price: Decimal) -> bool {
        match (self.take_profit_price, self.side) {
            (Some(tp), PositionSide::Long) => price >= tp,
            (Some(tp), PositionSide::Short) => price <= tp,
            (None, _) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(side: PositionSide) -> Position {
        Position {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            whale_id: None,
            entry_trade_id: Uuid::new_v4(),
            exit_trade_id: None,
            venue: Venue::Binance,
            market: Market::UsdmFutures,
            symbol: "BTCUSDT".into(),
            side,
            leverage: 10,
            entry_price: Decimal::new(50_000, 0),
            current_price: None,
            exit_price: None,
            quantity: Decimal::new(2, 2), // 0.02
            stop_loss_price: None,
            stop_loss_order_id: None,
            take_profit_price: None,
            take_profit_order_id: None,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            close_reason: None,
            version: 0,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn leveraged_pnl_long() {
        let p = position(PositionSide::Long);
        // (51000 - 50000) * 0.02 * 10 = 200
        assert_eq!(p.pnl_at(Decimal::new(51_000, 0)), Decimal::new(200, 0));
    }

    #[test]
    fn leveraged_pnl_short() {
        let p = position(PositionSide::Short);
        assert_eq!(p.pnl_at(Decimal::new(51_000, 0)), Decimal::new(-200, 0));
        assert_eq!(p.pnl_at(Decimal::new(49_000, 0)), Decimal::new(200, 0));
    }

    #[test]
    fn stop_loss_trigger_respects_side() {
        let mut long = position(PositionSide::Long);
        long.stop_loss_price = Some(Decimal::new(47_500, 0));
        assert!(!long.stop_loss_hit(Decimal::new(48_000, 0)));
        assert!(long.stop_loss_hit(Decimal::new(47_500, 0)));
        assert!(long.stop_loss_hit(Decimal::new(47_000, 0)));

        let mut short = position(PositionSide::Short);
        short.stop_loss_price = Some(Decimal::new(52_500, 0));
        assert!(!short.stop_loss_hit(Decimal::new(52_000, 0)));
        assert!(short.stop_loss_hit(Decimal::new(52_500, 0)));
    }

    #[test]
    fn take_profit_trigger_respects_side() {
        let mut long = position(PositionSide::Long);
        long.take_profit_price = Some(Decimal::new(55_000, 0));
        assert!(!long.take_profit_hit(Decimal::new(54_999, 0)));
        assert!(long.take_profit_hit(Decimal::new(55_000, 0)));
    }
}
