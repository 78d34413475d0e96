//! Database repositories.
//!
//! Each repository owns the SQL for one aggregate. Enums are stored as i16
//! codes (the `code()`/`from_code()` pairs on each type); every mutation of
//! a versioned row is a conditional `… AND version = $n` update.

pub mod follows;
pub mod positions;
pub mod signals;
pub mod trades;
pub mod users;
pub mod whales;

pub use follows::FollowRepository;
pub use positions::{PortfolioSummary, PositionRepository};
pub use signals::SignalRepository;
pub use trades::TradeRepository;
pub use users::UserRepository;
pub use whales::{PollTier, WhaleRepository};

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create the shared connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}
