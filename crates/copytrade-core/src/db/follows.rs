//! Database operations for whale follows.

use crate::types::WhaleFollow;
use crate::Result;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const FOLLOW_COLUMNS: &str = r#"
    f.user_id, f.whale_id, f.auto_copy_enabled, f.trade_size_usdt,
    f.trade_size_percent, f.leverage_override, f.copy_whale_leverage,
    f.stop_loss_percent, f.take_profit_percent, f.active, f.created_at
"#;

/// Repository for (user, whale) follow rows.
pub struct FollowRepository {
    pool: PgPool,
}

impl FollowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, follow: &WhaleFollow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO whale_follows (
                user_id, whale_id, auto_copy_enabled, trade_size_usdt,
                trade_size_percent, leverage_override, copy_whale_leverage,
                stop_loss_percent, take_profit_percent, active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id, whale_id) DO UPDATE SET
                auto_copy_enabled = EXCLUDED.auto_copy_enabled,
                trade_size_usdt = EXCLUDED.trade_size_usdt,
                trade_size_percent = EXCLUDED.trade_size_percent,
                leverage_override = EXCLUDED.leverage_override,
                copy_whale_leverage = EXCLUDED.copy_whale_leverage,
                stop_loss_percent = EXCLUDED.stop_loss_percent,
                take_profit_percent = EXCLUDED.take_profit_percent,
                active = EXCLUDED.active
            "#,
        )
        .bind(follow.user_id)
        .bind(follow.whale_id)
        .bind(follow.auto_copy_enabled)
        .bind(follow.trade_size_usdt)
        .bind(follow.trade_size_percent)
        .bind(follow.leverage_override.map(|l| l as i32))
        .bind(follow.copy_whale_leverage)
        .bind(follow.stop_loss_percent)
        .bind(follow.take_profit_percent)
        .bind(follow.active)
        .bind(follow.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn deactivate(&self, user_id: Uuid, whale_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE whale_follows SET active = FALSE WHERE user_id = $1 AND whale_id = $2",
        )
        .bind(user_id)
        .bind(whale_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, user_id: Uuid, whale_id: Uuid) -> Result<Option<WhaleFollow>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM whale_follows f WHERE f.user_id = $1 AND f.whale_id = $2",
            FOLLOW_COLUMNS
        ))
        .bind(user_id)
        .bind(whale_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_follow(&r)))
    }

    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<WhaleFollow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM whale_follows f WHERE f.user_id = $1 ORDER BY f.created_at",
            FOLLOW_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_follow).collect())
    }

    /// Followers eligible for an opening signal: active follow with
    /// auto-copy, tradeable user account.
    pub async fn followers_for_open(&self, whale_id: Uuid) -> Result<Vec<WhaleFollow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM whale_follows f
            JOIN users u ON u.id = f.user_id
            WHERE f.whale_id = $1 AND f.active AND f.auto_copy_enabled
              AND u.is_active AND NOT u.is_banned
            ORDER BY f.created_at
            "#,
            FOLLOW_COLUMNS
        ))
        .bind(whale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_follow).collect())
    }

    /// Followers eligible for a closing signal: follow-on-whale-exit users
    /// currently holding an open position from this whale on this symbol.
    pub async fn followers_for_close(
        &self,
        whale_id: Uuid,
        symbol: &str,
    ) -> Result<Vec<WhaleFollow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM whale_follows f
            JOIN users u ON u.id = f.user_id
            JOIN user_settings s ON s.user_id = f.user_id
            WHERE f.whale_id = $1 AND f.active
              AND s.auto_close_on_whale_exit
              AND u.is_active AND NOT u.is_banned
              AND EXISTS (
                  SELECT 1 FROM positions p
                  WHERE p.user_id = f.user_id AND p.whale_id = f.whale_id
                    AND p.symbol = $2 AND p.status = 0
              )
            ORDER BY f.created_at
            "#,
            FOLLOW_COLUMNS
        ))
        .bind(whale_id)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_follow).collect())
    }

    /// Follows counted against a tier's max-followed-whales limit.
    pub async fn count_active_by_user(&self, user_id: Uuid) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM whale_follows WHERE user_id = $1 AND active")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(row.get::<i64, _>("n"))
    }

    fn row_to_follow(r: &sqlx::postgres::PgRow) -> WhaleFollow {
        WhaleFollow {
            user_id: r.get("user_id"),
            whale_id: r.get("whale_id"),
            auto_copy_enabled: r.get("auto_copy_enabled"),
            trade_size_usdt: r.get("trade_size_usdt"),
            trade_size_percent: r.get("trade_size_percent"),
            leverage_override: r
                .get::<Option<i32>, _>("leverage_override")
                .map(|l| l as u32),
            copy_whale_leverage: r.get("copy_whale_leverage"),
            stop_loss_percent: r.get("stop_loss_percent"),
            take_profit_percent: r.get("take_profit_percent"),
            active: r.get("active"),
            created_at: r.get("created_at"),
        }
    }
}
