//! Short-lived distributed locks keyed by (operation, entity, actor).
//!
//! Backed by the same redis instance as the snapshot cache. Locks carry a
//! TTL so a crashed worker's claim releases by itself; completion markers
//! outlive the lock so a replayed worker can tell "in progress elsewhere"
//! from "already done".

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::Result;

/// The operations that must run at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyKey {
    /// One dispatch of one signal.
    ProcessSignal { signal_id: Uuid },
    /// One trade per (signal, follower).
    Trade { signal_id: Uuid, user_id: Uuid },
    /// One close per position.
    ClosePosition { position_id: Uuid },
}

impl IdempotencyKey {
    fn lock_key(&self) -> String {
        match self {
            IdempotencyKey::ProcessSignal { signal_id } => {
                format!("idem:process_signal:{}", signal_id.simple())
            }
            IdempotencyKey::Trade { signal_id, user_id } => {
                format!("idem:trade:{}:{}", signal_id.simple(), user_id.simple())
            }
            IdempotencyKey::ClosePosition { position_id } => {
                format!("idem:close_position:{}", position_id.simple())
            }
        }
    }

    fn completion_key(&self) -> String {
        format!("{}:done", self.lock_key())
    }
}

/// Result of an acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOutcome {
    /// This worker now holds the lock.
    pub acquired: bool,
    /// The operation already ran to completion; skip it.
    pub already_completed: bool,
}

/// Redis-backed idempotency keyspace.
#[derive(Clone)]
pub struct IdempotencyStore {
    conn: ConnectionManager,
    completion_ttl_secs: u64,
}

impl IdempotencyStore {
    pub fn new(conn: ConnectionManager, completion_ttl_secs: u64) -> Self {
        Self {
            conn,
            completion_ttl_secs,
        }
    }

    /// Try to take the lock. Checks the completion marker first so retried
    /// work short-circuits instead of re-running.
    pub async fn acquire(&self, key: &IdempotencyKey, ttl_secs: u64) -> Result<AcquireOutcome> {
        let mut conn = self.conn.clone();

        let done: Option<String> = conn.get(key.completion_key()).await?;
        if done.is_some() {
            return Ok(AcquireOutcome {
                acquired: false,
                already_completed: true,
            });
        }

        let acquired: Option<String> = redis::cmd("SET")
            .arg(key.lock_key())
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;

        Ok(AcquireOutcome {
            acquired: acquired.is_some(),
            already_completed: false,
        })
    }

    /// Record completion. The payload is a small JSON summary for replayed
    /// workers and operators; it is never authoritative state.
    pub async fn mark_completed(&self, key: &IdempotencyKey, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key.completion_key(), payload, self.completion_ttl_secs)
            .await?;
        Ok(())
    }

    pub async fn release(&self, key: &IdempotencyKey) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key.lock_key()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct_per_operation_and_entity() {
        let signal = Uuid::new_v4();
        let user = Uuid::new_v4();
        let process = IdempotencyKey::ProcessSignal { signal_id: signal };
        let trade = IdempotencyKey::Trade { signal_id: signal, user_id: user };
        let close = IdempotencyKey::ClosePosition { position_id: signal };

        assert_ne!(process.lock_key(), trade.lock_key());
        assert_ne!(process.lock_key(), close.lock_key());
        assert_ne!(trade.lock_key(), close.lock_key());
        assert_eq!(process.completion_key(), format!("{}:done", process.lock_key()));
    }

    #[test]
    fn trade_key_is_scoped_per_actor() {
        let signal = Uuid::new_v4();
        let a = IdempotencyKey::Trade { signal_id: signal, user_id: Uuid::new_v4() };
        let b = IdempotencyKey::Trade { signal_id: signal, user_id: Uuid::new_v4() };
        assert_ne!(a.lock_key(), b.lock_key());
    }
}
