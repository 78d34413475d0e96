//! Database operations for signals.

use crate::types::{
    Confidence, Market, Signal, SignalAction, SignalPriority, SignalSource, SignalStatus,
};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

const SIGNAL_COLUMNS: &str = r#"
    id, whale_id, source, fingerprint, action, symbol, market, is_close,
    whale_leverage, amount_hint_usd, price_at_signal, confidence,
    confidence_score, priority, status, created_at, processing_started_at,
    processed_at, trades_executed, error, version
"#;

/// Repository for the signal store.
pub struct SignalRepository {
    pool: PgPool,
}

impl SignalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a signal; returns false when its fingerprint was already seen.
    pub async fn insert(&self, signal: &Signal) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO signals (
                id, whale_id, source, fingerprint, action, symbol, market,
                is_close, whale_leverage, amount_hint_usd, price_at_signal,
                confidence, confidence_score, priority, status, created_at,
                trades_executed, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, 0, 0)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(signal.id)
        .bind(signal.whale_id)
        .bind(signal.source.code())
        .bind(&signal.fingerprint)
        .bind(signal.action.code())
        .bind(&signal.symbol)
        .bind(signal.market.code())
        .bind(signal.is_close)
        .bind(signal.whale_leverage.map(|l| l as i32))
        .bind(signal.amount_hint_usd)
        .bind(signal.price_at_signal)
        .bind(signal.confidence.code())
        .bind(signal.confidence_score as i32)
        .bind(signal.priority.code())
        .bind(signal.status.code())
        .bind(signal.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Signal>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM signals WHERE id = $1",
            SIGNAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_signal(&r)))
    }

    /// Highest-priority PENDING signal, oldest first within a priority.
    pub async fn next_pending(&self) -> Result<Option<Signal>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM signals
            WHERE status = 0
            ORDER BY priority ASC, created_at ASC
            LIMIT 1
            "#,
            SIGNAL_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_signal(&r)))
    }

    /// Atomically claim `PENDING → PROCESSING`. Returns false when another
    /// worker won the row.
    pub async fn try_claim(&self, id: Uuid, version: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE signals
            SET status = 1, processing_started_at = $2, version = version + 1
            WHERE id = $1 AND status = 0 AND version = $3
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal transition out of PROCESSING.
    pub async fn finish(
        &self,
        id: Uuid,
        status: SignalStatus,
        trades_executed: u32,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE signals
            SET status = $2, processed_at = $3, trades_executed = $4,
                error = $5, version = version + 1
            WHERE id = $1 AND status = 1
            "#,
        )
        .bind(id)
        .bind(status.code())
        .bind(Utc::now())
        .bind(trades_executed as i32)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// `PENDING → SKIPPED` for signals that will never be dispatched.
    pub async fn skip(&self, id: Uuid, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE signals
            SET status = 3, processed_at = $2, error = $3, version = version + 1
            WHERE id = $1 AND status = 0
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Sweep stale PENDING signals to EXPIRED; returns how many moved.
    pub async fn expire_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE signals
            SET status = 5, processed_at = $1, version = version + 1
            WHERE status = 0 AND created_at < $2
            "#,
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Queue depth used for scheduler backpressure.
    pub async fn count_pending(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM signals WHERE status = 0")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<i64, _>("n"))
    }

    fn row_to_signal(r: &sqlx::postgres::PgRow) -> Signal {
        Signal {
            id: r.get("id"),
            whale_id: r.get("whale_id"),
            source: SignalSource::from_code(r.get::<i16, _>("source")),
            fingerprint: r.get("fingerprint"),
            action: SignalAction::from_code(r.get::<i16, _>("action")),
            symbol: r.get("symbol"),
            market: Market::from_code(r.get::<i16, _>("market")),
            is_close: r.get("is_close"),
            whale_leverage: r
                .get::<Option<i32>, _>("whale_leverage")
                .map(|l| l as u32),
            amount_hint_usd: r.get("amount_hint_usd"),
            price_at_signal: r.get("price_at_signal"),
            confidence: Confidence::from_code(r.get::<i16, _>("confidence")),
            confidence_score: r.get::<i32, _>("confidence_score") as u32,
            priority: SignalPriority::from_code(r.get::<i16, _>("priority")),
            status: SignalStatus::from_code(r.get::<i16, _>("status")),
            created_at: r.get("created_at"),
            processing_started_at: r.get("processing_started_at"),
            processed_at: r.get("processed_at"),
            trades_executed: r.get::<i32, _>("trades_executed") as u32,
            error: r.get("error"),
            version: r.get("version"),
        }
    }
}
