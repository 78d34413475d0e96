//! Redis-backed keyspaces: position snapshots and idempotency locks.

pub mod idempotency;
pub mod snapshots;

pub use idempotency::{AcquireOutcome, IdempotencyKey, IdempotencyStore};
pub use snapshots::{PositionSnapshot, SnapshotCache};

use crate::config::RedisConfig;
use crate::Result;
use redis::aio::ConnectionManager;

/// Create the shared redis connection manager.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.url.as_str())?;
    let manager = client.get_connection_manager().await?;
    Ok(manager)
}
