//! Database operations for users and their settings.

use crate::types::{SubscriptionTier, TradingMode, User, UserSettings, Venue};
use crate::{Error, Result};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// Repository for user accounts.
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT
                id, external_id, subscription_tier, subscription_expires_at,
                is_active, is_banned, total_balance, available_balance,
                two_factor_enabled, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_user(&r)))
    }

    /// Lock the user row for the duration of the enclosing transaction.
    ///
    /// Both phases of an execution mutate the balance only under this lock.
    pub async fn lock_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<User> {
        let row = sqlx::query(
            r#"
            SELECT
                id, external_id, subscription_tier, subscription_expires_at,
                is_active, is_banned, total_balance, available_balance,
                two_factor_enabled, created_at
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::NotFound {
            entity: "user",
            id: id.to_string(),
        })?;

        Ok(Self::row_to_user(&row))
    }

    /// Adjust balances inside a transaction that already holds the row lock.
    ///
    /// `available_delta` moves the reservation pool; `total_delta` applies
    /// realized PnL. Negative available balance is a bug upstream, so the
    /// update is guarded and surfaces as a constraint violation.
    pub async fn adjust_balances(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        available_delta: Decimal,
        total_delta: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET available_balance = available_balance + $2,
                total_balance = total_balance + $3
            WHERE id = $1 AND available_balance + $2 >= 0
            "#,
        )
        .bind(id)
        .bind(available_delta)
        .bind(total_delta)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                entity: "user (or balance would go negative)",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub async fn get_settings(&self, user_id: Uuid) -> Result<Option<UserSettings>> {
        let row = sqlx::query(
            r#"
            SELECT
                user_id, trading_mode, preferred_venue, auto_copy_enabled,
                default_trade_size_usdt, max_trade_size_usdt, stop_loss_percent,
                take_profit_percent, daily_loss_limit_usdt, max_open_positions,
                default_leverage, max_leverage, auto_close_on_tp,
                auto_close_on_whale_exit, notify_on_trade, notify_on_close
            FROM user_settings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_settings(&r)))
    }

    pub async fn upsert_settings(&self, settings: &UserSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (
                user_id, trading_mode, preferred_venue, auto_copy_enabled,
                default_trade_size_usdt, max_trade_size_usdt, stop_loss_percent,
                take_profit_percent, daily_loss_limit_usdt, max_open_positions,
                default_leverage, max_leverage, auto_close_on_tp,
                auto_close_on_whale_exit, notify_on_trade, notify_on_close
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (user_id) DO UPDATE SET
                trading_mode = EXCLUDED.trading_mode,
                preferred_venue = EXCLUDED.preferred_venue,
                auto_copy_enabled = EXCLUDED.auto_copy_enabled,
                default_trade_size_usdt = EXCLUDED.default_trade_size_usdt,
                max_trade_size_usdt = EXCLUDED.max_trade_size_usdt,
                stop_loss_percent = EXCLUDED.stop_loss_percent,
                take_profit_percent = EXCLUDED.take_profit_percent,
                daily_loss_limit_usdt = EXCLUDED.daily_loss_limit_usdt,
                max_open_positions = EXCLUDED.max_open_positions,
                default_leverage = EXCLUDED.default_leverage,
                max_leverage = EXCLUDED.max_leverage,
                auto_close_on_tp = EXCLUDED.auto_close_on_tp,
                auto_close_on_whale_exit = EXCLUDED.auto_close_on_whale_exit,
                notify_on_trade = EXCLUDED.notify_on_trade,
                notify_on_close = EXCLUDED.notify_on_close
            "#,
        )
        .bind(settings.user_id)
        .bind(settings.trading_mode.code())
        .bind(settings.preferred_venue.code())
        .bind(settings.auto_copy_enabled)
        .bind(settings.default_trade_size_usdt)
        .bind(settings.max_trade_size_usdt)
        .bind(settings.stop_loss_percent)
        .bind(settings.take_profit_percent)
        .bind(settings.daily_loss_limit_usdt)
        .bind(settings.max_open_positions as i32)
        .bind(settings.default_leverage as i32)
        .bind(settings.max_leverage as i32)
        .bind(settings.auto_close_on_tp)
        .bind(settings.auto_close_on_whale_exit)
        .bind(settings.notify_on_trade)
        .bind(settings.notify_on_close)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_user(r: &sqlx::postgres::PgRow) -> User {
        User {
            id: r.get("id"),
            external_id: r.get("external_id"),
            subscription_tier: SubscriptionTier::from_code(r.get::<i16, _>("subscription_tier")),
            subscription_expires_at: r.get("subscription_expires_at"),
            is_active: r.get("is_active"),
            is_banned: r.get("is_banned"),
            total_balance: r.get("total_balance"),
            available_balance: r.get("available_balance"),
            two_factor_enabled: r.get("two_factor_enabled"),
            created_at: r.get("created_at"),
        }
    }

    fn row_to_settings(r: &sqlx::postgres::PgRow) -> UserSettings {
        UserSettings {
            user_id: r.get("user_id"),
            trading_mode: TradingMode::from_code(r.get::<i16, _>("trading_mode")),
            preferred_venue: Venue::from_code(r.get::<i16, _>("preferred_venue")),
            auto_copy_enabled: r.get("auto_copy_enabled"),
            default_trade_size_usdt: r.get("default_trade_size_usdt"),
            max_trade_size_usdt: r.get("max_trade_size_usdt"),
            stop_loss_percent: r.get("stop_loss_percent"),
            take_profit_percent: r.get("take_profit_percent"),
            daily_loss_limit_usdt: r.get("daily_loss_limit_usdt"),
            max_open_positions: r.get::<i32, _>("max_open_positions") as u32,
            default_leverage: r.get::<i32, _>("default_leverage") as u32,
            max_leverage: r.get::<i32, _>("max_leverage") as u32,
            auto_close_on_tp: r.get("auto_close_on_tp"),
            auto_close_on_whale_exit: r.get("auto_close_on_whale_exit"),
            notify_on_trade: r.get("notify_on_trade"),
            notify_on_close: r.get("notify_on_close"),
        }
    }
}
