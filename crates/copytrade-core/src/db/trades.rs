//! Database operations for trades.

use crate::types::{Market, OrderType, Trade, TradeSide, TradeStatus, Venue};
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

const TRADE_COLUMNS: &str = r#"
    id, user_id, signal_id, whale_id, venue, market, symbol, side, order_type,
    requested_quantity, trade_value_usdt, leverage, status, venue_order_id,
    executed_price, executed_quantity, fee, realized_pnl, version, created_at,
    executed_at, error
"#;

/// Repository for trade aggregates.
pub struct TradeRepository {
    pool: PgPool,
}

impl TradeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert inside the Phase-1 transaction that holds the user row lock.
    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        trade: &Trade,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, user_id, signal_id, whale_id, venue, market, symbol, side,
                order_type, requested_quantity, trade_value_usdt, leverage,
                status, version, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0, $14)
            "#,
        )
        .bind(trade.id)
        .bind(trade.user_id)
        .bind(trade.signal_id)
        .bind(trade.whale_id)
        .bind(trade.venue.code())
        .bind(trade.market.code())
        .bind(&trade.symbol)
        .bind(trade.side.code())
        .bind(trade.order_type.code())
        .bind(trade.requested_quantity)
        .bind(trade.trade_value_usdt)
        .bind(trade.leverage.map(|l| l as i32))
        .bind(trade.status.code())
        .bind(trade.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Insert a trade that is already settled, inside a reconciliation
    /// transaction. External closes have no live order to walk through the
    /// PENDING/EXECUTING states; the row lands FILLED with its fill data.
    pub async fn insert_filled_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        trade: &Trade,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, user_id, signal_id, whale_id, venue, market, symbol, side,
                order_type, requested_quantity, trade_value_usdt, leverage,
                status, venue_order_id, executed_price, executed_quantity,
                fee, realized_pnl, version, created_at, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, 0, $19, $20)
            "#,
        )
        .bind(trade.id)
        .bind(trade.user_id)
        .bind(trade.signal_id)
        .bind(trade.whale_id)
        .bind(trade.venue.code())
        .bind(trade.market.code())
        .bind(&trade.symbol)
        .bind(trade.side.code())
        .bind(trade.order_type.code())
        .bind(trade.requested_quantity)
        .bind(trade.trade_value_usdt)
        .bind(trade.leverage.map(|l| l as i32))
        .bind(trade.status.code())
        .bind(&trade.venue_order_id)
        .bind(trade.executed_price)
        .bind(trade.executed_quantity)
        .bind(trade.fee)
        .bind(trade.realized_pnl)
        .bind(trade.created_at)
        .bind(trade.executed_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Trade>> {
        let row = sqlx::query(&format!("SELECT {} FROM trades WHERE id = $1", TRADE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Self::row_to_trade(&r)))
    }

    /// Version-checked status transition. Returns false on a stale version
    /// or wrong current status; the caller lost the race.
    pub async fn try_transition(
        &self,
        id: Uuid,
        from: TradeStatus,
        to: TradeStatus,
        version: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trades
            SET status = $3, version = version + 1
            WHERE id = $1 AND status = $2 AND version = $4
            "#,
        )
        .bind(id)
        .bind(from.code())
        .bind(to.code())
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Phase-2 success: attach the fill, inside the settlement transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_filled_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        version: i64,
        venue_order_id: &str,
        executed_price: Decimal,
        executed_quantity: Decimal,
        fee: Option<Decimal>,
        realized_pnl: Option<Decimal>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trades
            SET status = 2, venue_order_id = $2, executed_price = $3,
                executed_quantity = $4, fee = $5, realized_pnl = $6,
                executed_at = $7, version = version + 1
            WHERE id = $1 AND status IN (1, 4) AND version = $8
            "#,
        )
        .bind(id)
        .bind(venue_order_id)
        .bind(executed_price)
        .bind(executed_quantity)
        .bind(fee)
        .bind(realized_pnl)
        .bind(Utc::now())
        .bind(version)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Phase-2 rollback: terminal failure, inside the refund transaction.
    pub async fn mark_failed_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        version: i64,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trades
            SET status = 3, error = $2, version = version + 1
            WHERE id = $1 AND status IN (0, 1, 4) AND version = $3
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(version)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Unknown venue outcome: park the trade for the reconciler. No refund.
    pub async fn mark_needs_reconciliation(
        &self,
        id: Uuid,
        version: i64,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trades
            SET status = 4, error = $2, version = version + 1
            WHERE id = $1 AND status IN (0, 1) AND version = $3
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM trades
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            TRADE_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_trade).collect())
    }

    /// Trades awaiting reconciliation, oldest first.
    pub async fn needing_reconciliation(&self) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM trades
            WHERE status = 4
            ORDER BY created_at ASC
            "#,
            TRADE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_trade).collect())
    }

    /// EXECUTING trades older than the hard limit: an orphaned Phase 2.
    pub async fn stuck_executing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM trades
            WHERE status = 1 AND created_at < $1
            ORDER BY created_at ASC
            "#,
            TRADE_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_trade).collect())
    }

    /// PENDING trades past the grace period: a crash between Phase 1 and
    /// the venue call.
    pub async fn orphaned_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM trades
            WHERE status = 0 AND created_at < $1
            ORDER BY created_at ASC
            "#,
            TRADE_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_trade).collect())
    }

    /// Net realized PnL on fills since `since` (the UTC day start for the
    /// daily-loss check).
    pub async fn realized_pnl_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(realized_pnl), 0) AS pnl
            FROM trades
            WHERE user_id = $1 AND status = 2 AND realized_pnl IS NOT NULL
              AND executed_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Decimal, _>("pnl"))
    }

    fn row_to_trade(r: &sqlx::postgres::PgRow) -> Trade {
        Trade {
            id: r.get("id"),
            user_id: r.get("user_id"),
            signal_id: r.get("signal_id"),
            whale_id: r.get("whale_id"),
            venue: Venue::from_code(r.get::<i16, _>("venue")),
            market: Market::from_code(r.get::<i16, _>("market")),
            symbol: r.get("symbol"),
            side: TradeSide::from_code(r.get::<i16, _>("side")),
            order_type: OrderType::from_code(r.get::<i16, _>("order_type")),
            requested_quantity: r.get("requested_quantity"),
            trade_value_usdt: r.get("trade_value_usdt"),
            leverage: r.get::<Option<i32>, _>("leverage").map(|l| l as u32),
            status: TradeStatus::from_code(r.get::<i16, _>("status")),
            venue_order_id: r.get("venue_order_id"),
            executed_price: r.get("executed_price"),
            executed_quantity: r.get("executed_quantity"),
            fee: r.get("fee"),
            realized_pnl: r.get("realized_pnl"),
            version: r.get("version"),
            created_at: r.get("created_at"),
            executed_at: r.get("executed_at"),
            error: r.get("error"),
        }
    }
}
