//! Database operations for positions.

use crate::types::{CloseReason, Market, Position, PositionSide, PositionStatus, Venue};
use crate::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

const POSITION_COLUMNS: &str = r#"
    id, user_id, whale_id, entry_trade_id, exit_trade_id, venue, market,
    symbol, side, leverage, entry_price, current_price, exit_price, quantity,
    stop_loss_price, stop_loss_order_id, take_profit_price,
    take_profit_order_id, unrealized_pnl, realized_pnl, status, close_reason,
    version, opened_at, closed_at
"#;

/// Read-only per-user aggregate for the query API.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub open_positions: u64,
    pub closed_positions: u64,
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub win_count: u64,
    pub loss_count: u64,
}

/// Repository for position aggregates.
pub struct PositionRepository {
    pool: PgPool,
}

impl PositionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert inside the Phase-2 settlement transaction.
    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        position: &Position,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, user_id, whale_id, entry_trade_id, venue, market, symbol,
                side, leverage, entry_price, quantity, stop_loss_price,
                stop_loss_order_id, take_profit_price, take_profit_order_id,
                unrealized_pnl, realized_pnl, status, version, opened_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, 0, $19)
            "#,
        )
        .bind(position.id)
        .bind(position.user_id)
        .bind(position.whale_id)
        .bind(position.entry_trade_id)
        .bind(position.venue.code())
        .bind(position.market.code())
        .bind(&position.symbol)
        .bind(position.side.code())
        .bind(position.leverage as i32)
        .bind(position.entry_price)
        .bind(position.quantity)
        .bind(position.stop_loss_price)
        .bind(&position.stop_loss_order_id)
        .bind(position.take_profit_price)
        .bind(&position.take_profit_order_id)
        .bind(position.unrealized_pnl)
        .bind(position.realized_pnl)
        .bind(position.status.code())
        .bind(position.opened_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Position>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE id = $1",
            POSITION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_position(&r)))
    }

    /// The at-most-one OPEN position for a (user, venue, symbol, market) key.
    pub async fn get_open_for_key(
        &self,
        user_id: Uuid,
        venue: Venue,
        symbol: &str,
        market: Market,
    ) -> Result<Option<Position>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM positions
            WHERE user_id = $1 AND venue = $2 AND symbol = $3 AND market = $4
              AND status = 0
            "#,
            POSITION_COLUMNS
        ))
        .bind(user_id)
        .bind(venue.code())
        .bind(symbol)
        .bind(market.code())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_position(&r)))
    }

    /// Open position a whale-exit signal should close for this user.
    pub async fn get_open_by_whale_symbol(
        &self,
        user_id: Uuid,
        whale_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Position>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM positions
            WHERE user_id = $1 AND whale_id = $2 AND symbol = $3 AND status = 0
            ORDER BY opened_at
            LIMIT 1
            "#,
            POSITION_COLUMNS
        ))
        .bind(user_id)
        .bind(whale_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_position(&r)))
    }

    pub async fn list_open(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE status = 0 ORDER BY opened_at",
            POSITION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_position).collect())
    }

    pub async fn list_open_by_user(&self, user_id: Uuid) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM positions
            WHERE user_id = $1 AND status = 0
            ORDER BY opened_at
            "#,
            POSITION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_position).collect())
    }

    pub async fn count_open_by_user(&self, user_id: Uuid) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM positions WHERE user_id = $1 AND status = 0")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(row.get::<i64, _>("n"))
    }

    /// Monitor re-pricing; not version-bumped, the mark is advisory data.
    pub async fn update_mark(
        &self,
        id: Uuid,
        current_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions
            SET current_price = $2, unrealized_pnl = $3
            WHERE id = $1 AND status = 0
            "#,
        )
        .bind(id)
        .bind(current_price)
        .bind(unrealized_pnl)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a venue-accepted stop order on an open position.
    pub async fn set_stop_order(
        &self,
        id: Uuid,
        stop_loss_price: Decimal,
        stop_loss_order_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions
            SET stop_loss_price = $2, stop_loss_order_id = $3
            WHERE id = $1 AND status = 0
            "#,
        )
        .bind(id)
        .bind(stop_loss_price)
        .bind(stop_loss_order_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Version-checked `OPEN → CLOSED/LIQUIDATED` inside the settlement
    /// transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn close_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        version: i64,
        status: PositionStatus,
        exit_trade_id: Option<Uuid>,
        exit_price: Decimal,
        realized_pnl: Decimal,
        close_reason: CloseReason,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = $2, exit_trade_id = $3, exit_price = $4,
                realized_pnl = $5, close_reason = $6, unrealized_pnl = 0,
                closed_at = $7, version = version + 1
            WHERE id = $1 AND status = 0 AND version = $8
            "#,
        )
        .bind(id)
        .bind(status.code())
        .bind(exit_trade_id)
        .bind(exit_price)
        .bind(realized_pnl)
        .bind(close_reason.code())
        .bind(Utc::now())
        .bind(version)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn summary_for_user(&self, user_id: Uuid) -> Result<PortfolioSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 0) AS open,
                COUNT(*) FILTER (WHERE status <> 0) AS closed,
                COALESCE(SUM(unrealized_pnl) FILTER (WHERE status = 0), 0) AS unrealized,
                COALESCE(SUM(realized_pnl) FILTER (WHERE status <> 0), 0) AS realized,
                COUNT(*) FILTER (WHERE status <> 0 AND realized_pnl > 0) AS wins,
                COUNT(*) FILTER (WHERE status <> 0 AND realized_pnl <= 0) AS losses
            FROM positions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(PortfolioSummary {
            open_positions: row.get::<Option<i64>, _>("open").unwrap_or(0) as u64,
            closed_positions: row.get::<Option<i64>, _>("closed").unwrap_or(0) as u64,
            total_unrealized_pnl: row
                .get::<Option<Decimal>, _>("unrealized")
                .unwrap_or_default(),
            total_realized_pnl: row
                .get::<Option<Decimal>, _>("realized")
                .unwrap_or_default(),
            win_count: row.get::<Option<i64>, _>("wins").unwrap_or(0) as u64,
            loss_count: row.get::<Option<i64>, _>("losses").unwrap_or(0) as u64,
        })
    }

    fn row_to_position(r: &sqlx::postgres::PgRow) -> Position {
        Position {
            id: r.get("id"),
            user_id: r.get("user_id"),
            whale_id: r.get("whale_id"),
            entry_trade_id: r.get("entry_trade_id"),
            exit_trade_id: r.get("exit_trade_id"),
            venue: Venue::from_code(r.get::<i16, _>("venue")),
            market: Market::from_code(r.get::<i16, _>("market")),
            symbol: r.get("symbol"),
            side: PositionSide::from_code(r.get::<i16, _>("side")),
            leverage: r.get::<i32, _>("leverage") as u32,
            entry_price: r.get("entry_price"),
            current_price: r.get("current_price"),
            exit_price: r.get("exit_price"),
            quantity: r.get("quantity"),
            stop_loss_price: r.get("stop_loss_price"),
            stop_loss_order_id: r.get("stop_loss_order_id"),
            take_profit_price: r.get("take_profit_price"),
            take_profit_order_id: r.get("take_profit_order_id"),
            unrealized_pnl: r.get("unrealized_pnl"),
            realized_pnl: r.get("realized_pnl"),
            status: PositionStatus::from_code(r.get::<i16, _>("status")),
            close_reason: r
                .get::<Option<i16>, _>("close_reason")
                .map(CloseReason::from_code),
            version: r.get("version"),
            opened_at: r.get("opened_at"),
            closed_at: r.get("closed_at"),
        }
    }
}
