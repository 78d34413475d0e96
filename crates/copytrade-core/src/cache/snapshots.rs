//! Per-whale position snapshot cache.
//!
//! Keyed by whale id with a TTL of twice the whale's polling interval, so a
//! whale that stops being polled ages out instead of producing stale diffs.
//! A missing entry is indistinguishable from "first observation"; the
//! scheduler handles that case explicitly by storing without emitting.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::PositionSample;
use crate::Result;

/// The last observed set of open positions for one whale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub whale_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub positions: Vec<PositionSample>,
}

impl PositionSnapshot {
    pub fn new(whale_id: Uuid, positions: Vec<PositionSample>) -> Self {
        Self {
            whale_id,
            captured_at: Utc::now(),
            positions,
        }
    }
}

/// Redis-backed snapshot store.
#[derive(Clone)]
pub struct SnapshotCache {
    conn: ConnectionManager,
}

impl SnapshotCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(whale_id: Uuid) -> String {
        format!("whale:snapshot:{}", whale_id.simple())
    }

    pub async fn get(&self, whale_id: Uuid) -> Result<Option<PositionSnapshot>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(whale_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, snapshot: &PositionSnapshot, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(snapshot)?;
        let _: () = conn.set_ex(Self::key(snapshot.whale_id), json, ttl_secs).await?;
        Ok(())
    }

    pub async fn remove(&self, whale_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::key(whale_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Market, PositionSide};
    use rust_decimal::Decimal;

    #[test]
    fn snapshot_round_trips_through_json() {
        let snapshot = PositionSnapshot::new(
            Uuid::new_v4(),
            vec![PositionSample {
                symbol: "BTCUSDT".into(),
                market: Market::UsdmFutures,
                side: PositionSide::Long,
                quantity: Decimal::new(1, 0),
                entry_price: Decimal::new(50_000, 0),
                leverage: Some(10),
                roe: None,
            }],
        );
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: PositionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.whale_id, snapshot.whale_id);
        assert_eq!(back.positions, snapshot.positions);
    }
}
