//! Database operations for whales.

use crate::types::{DataStatus, Venue, Whale, WhaleKind};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Polling tier of the scheduler. Selection rules live in the SQL below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTier {
    Critical,
    High,
    Normal,
    Low,
}

const WHALE_COLUMNS: &str = r#"
    id, venue, venue_uid, chain, wallet_address, display_name, kind,
    data_status, consecutive_empty_checks, sharing_disabled_at,
    sharing_recheck_at, priority_score, polling_interval_seconds,
    last_checked_at, last_position_found, created_at
"#;

/// Repository for observed traders.
pub struct WhaleRepository {
    pool: PgPool,
}

impl WhaleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Whale>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM whales WHERE id = $1",
            WHALE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_whale(&r)))
    }

    /// Insert a whale, or return the existing id for the same identity.
    pub async fn upsert(&self, whale: &Whale) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO whales (
                id, venue, venue_uid, chain, wallet_address, display_name, kind,
                data_status, consecutive_empty_checks, sharing_disabled_at,
                sharing_recheck_at, priority_score, polling_interval_seconds,
                last_checked_at, last_position_found, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (venue, venue_uid) DO UPDATE SET
                display_name = COALESCE(EXCLUDED.display_name, whales.display_name)
            RETURNING id
            "#,
        )
        .bind(whale.id)
        .bind(whale.venue.map(|v| v.code()))
        .bind(&whale.venue_uid)
        .bind(&whale.chain)
        .bind(&whale.wallet_address)
        .bind(&whale.display_name)
        .bind(whale.kind.code())
        .bind(whale.data_status.code())
        .bind(whale.consecutive_empty_checks as i32)
        .bind(whale.sharing_disabled_at)
        .bind(whale.sharing_recheck_at)
        .bind(whale.priority_score as i32)
        .bind(whale.polling_interval_seconds as i32)
        .bind(whale.last_checked_at)
        .bind(whale.last_position_found)
        .bind(whale.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    /// Select eligible whales for one tier's tick.
    ///
    /// All tiers exclude whales whose sharing/rate-limit rest period has not
    /// elapsed and order by `priority_score DESC, last_checked_at ASC` so
    /// stale high-value whales go first.
    pub async fn select_candidates(&self, tier: PollTier, limit: u32) -> Result<Vec<Whale>> {
        let now = Utc::now();
        let pollable = r#"
            (data_status = 0 OR sharing_recheck_at IS NULL OR sharing_recheck_at <= $1)
        "#;
        let sql = match tier {
            PollTier::Critical => format!(
                r#"
                SELECT {cols} FROM whales w
                WHERE {pollable}
                  AND w.last_position_found >= $1 - INTERVAL '24 hours'
                  AND EXISTS (
                      SELECT 1 FROM whale_follows f
                      WHERE f.whale_id = w.id AND f.active
                  )
                ORDER BY priority_score DESC, last_checked_at ASC NULLS FIRST
                LIMIT $2
                "#,
                cols = WHALE_COLUMNS,
                pollable = pollable
            ),
            PollTier::High => format!(
                r#"
                SELECT {cols} FROM whales w
                WHERE {pollable}
                  AND (w.venue IN ({public}) OR w.priority_score >= 70)
                ORDER BY priority_score DESC, last_checked_at ASC NULLS FIRST
                LIMIT $2
                "#,
                cols = WHALE_COLUMNS,
                pollable = pollable,
                public = public_leaderboard_codes()
            ),
            PollTier::Normal => format!(
                r#"
                SELECT {cols} FROM whales w
                WHERE data_status = 0
                ORDER BY priority_score DESC, last_checked_at ASC NULLS FIRST
                LIMIT $1
                "#,
                cols = WHALE_COLUMNS
            ),
            PollTier::Low => format!(
                r#"
                SELECT {cols} FROM whales w
                WHERE data_status = 0 AND priority_score < 30
                ORDER BY priority_score DESC, last_checked_at ASC NULLS FIRST
                LIMIT $1
                "#,
                cols = WHALE_COLUMNS
            ),
        };

        let query = match tier {
            PollTier::Critical | PollTier::High => {
                sqlx::query(&sql).bind(now).bind(limit as i64)
            }
            PollTier::Normal | PollTier::Low => sqlx::query(&sql).bind(limit as i64),
        };
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows.iter().map(Self::row_to_whale).collect())
    }

    /// Persist the sharing-tracker outcome of one poll.
    pub async fn update_sharing(&self, whale: &Whale) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE whales SET
                data_status = $2,
                consecutive_empty_checks = $3,
                sharing_disabled_at = $4,
                sharing_recheck_at = $5,
                last_checked_at = $6,
                last_position_found = $7
            WHERE id = $1
            "#,
        )
        .bind(whale.id)
        .bind(whale.data_status.code())
        .bind(whale.consecutive_empty_checks as i32)
        .bind(whale.sharing_disabled_at)
        .bind(whale.sharing_recheck_at)
        .bind(whale.last_checked_at)
        .bind(whale.last_position_found)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn bump_priority_score(&self, id: Uuid, delta: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE whales
            SET priority_score = LEAST(100, GREATEST(1, priority_score + $2))
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Active followers with auto-copy on; drives signal priority.
    pub async fn count_auto_copy_followers(&self, whale_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM whale_follows f
            JOIN users u ON u.id = f.user_id
            WHERE f.whale_id = $1 AND f.active AND f.auto_copy_enabled
              AND u.is_active AND NOT u.is_banned
            "#,
        )
        .bind(whale_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("n"))
    }

    pub async fn count_active_followers(&self, whale_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM whale_follows WHERE whale_id = $1 AND active",
        )
        .bind(whale_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("n"))
    }

    fn row_to_whale(r: &sqlx::postgres::PgRow) -> Whale {
        Whale {
            id: r.get("id"),
            venue: r
                .get::<Option<i16>, _>("venue")
                .map(Venue::from_code),
            venue_uid: r.get("venue_uid"),
            chain: r.get("chain"),
            wallet_address: r.get("wallet_address"),
            display_name: r.get("display_name"),
            kind: WhaleKind::from_code(r.get::<i16, _>("kind")),
            data_status: DataStatus::from_code(r.get::<i16, _>("data_status")),
            consecutive_empty_checks: r.get::<i32, _>("consecutive_empty_checks") as u32,
            sharing_disabled_at: r.get("sharing_disabled_at"),
            sharing_recheck_at: r.get("sharing_recheck_at"),
            priority_score: r.get::<i32, _>("priority_score") as u32,
            polling_interval_seconds: r.get::<i32, _>("polling_interval_seconds") as u32,
            last_checked_at: r.get::<Option<DateTime<Utc>>, _>("last_checked_at"),
            last_position_found: r.get::<Option<DateTime<Utc>>, _>("last_position_found"),
            created_at: r.get("created_at"),
        }
    }
}

fn public_leaderboard_codes() -> String {
    [Venue::Binance, Venue::Bybit, Venue::Okx, Venue::Bitget]
        .iter()
        .filter(|v| v.leaderboard_is_public())
        .map(|v| v.code().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_leaderboard_codes_are_stable() {
        // Binance (0) and Bitget (3) expose their leaderboards without auth.
        assert_eq!(public_leaderboard_codes(), "0, 3");
    }
}
