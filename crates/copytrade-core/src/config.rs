//! Configuration for the copy-trading platform.
//!
//! Read once on startup from environment variables, every value with a
//! default. Grouped by subsystem so each component borrows only its slice.

use crate::error::{Error, Result};
use crate::types::{Market, Venue};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub polling: PollingConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub idempotency: IdempotencyConfig,
    pub engine: EngineConfig,
    pub monitor: MonitorConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// One polling tier of the whale scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    pub period_secs: u64,
    /// Max whales touched per tick.
    pub batch_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub critical: TierConfig,
    pub high: TierConfig,
    pub normal: TierConfig,
    pub low: TierConfig,
    /// Pending-signal depth above which normal/low tiers skip ticks.
    pub backpressure_threshold: u32,
    /// Empty polls in a row before a whale is marked SHARING_DISABLED.
    pub sharing_disabled_after: u32,
    /// How long a SHARING_DISABLED whale rests before a re-check.
    pub sharing_recheck_hours: i64,
    /// Cooldown applied when a venue rate-limits a poll.
    pub rate_limit_cooldown_secs: i64,
    /// Leaderboard discovery sweep period (0 disables the sweep).
    pub discovery_period_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Exponential backoff delay before attempt `k` (1-based), capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds the circuit stays OPEN before probing.
    pub cooldown_secs: u64,
    /// Probe calls admitted while HALF_OPEN.
    pub half_open_probes: u32,
    /// Probe successes required to close.
    pub success_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// TTL for a signal-processing lock.
    pub process_signal_ttl_secs: u64,
    /// TTL for per-follower trade locks.
    pub trade_ttl_secs: u64,
    /// TTL for close-position locks.
    pub close_position_ttl_secs: u64,
    /// How long a completion marker outlives its lock.
    pub completion_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// PENDING signals older than this are swept to EXPIRED.
    pub signal_expiry_secs: i64,
    /// Stop enrolling new followers past this point.
    pub soft_limit_secs: u64,
    /// EXECUTING trades older than this go to NEEDS_RECONCILIATION.
    pub hard_limit_secs: i64,
    /// Grace before an orphaned PENDING trade is rolled back.
    pub pending_trade_grace_secs: i64,
    /// Worker pop interval when the queue is empty.
    pub poll_interval_ms: u64,
    /// Sweeper period for expired signals.
    pub sweep_interval_secs: u64,
    pub min_trading_balance: Decimal,
    pub min_trade_size: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub reprice_period_secs: u64,
    pub sl_tp_period_secs: u64,
    pub reconcile_period_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| Error::Config {
                    message: "DATABASE_URL environment variable not set".to_string(),
                })?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            polling: PollingConfig {
                critical: TierConfig {
                    period_secs: env_parse("POLL_CRITICAL_PERIOD_SECS", 12),
                    batch_size: env_parse("POLL_CRITICAL_BATCH", 20),
                },
                high: TierConfig {
                    period_secs: env_parse("POLL_HIGH_PERIOD_SECS", 30),
                    batch_size: env_parse("POLL_HIGH_BATCH", 30),
                },
                normal: TierConfig {
                    period_secs: env_parse("POLL_NORMAL_PERIOD_SECS", 45),
                    batch_size: env_parse("POLL_NORMAL_BATCH", 40),
                },
                low: TierConfig {
                    period_secs: env_parse("POLL_LOW_PERIOD_SECS", 120),
                    batch_size: env_parse("POLL_LOW_BATCH", 50),
                },
                backpressure_threshold: env_parse("POLL_BACKPRESSURE_THRESHOLD", 500),
                sharing_disabled_after: env_parse("SHARING_DISABLED_AFTER", 5),
                sharing_recheck_hours: env_parse("SHARING_RECHECK_HOURS", 24),
                rate_limit_cooldown_secs: env_parse("RATE_LIMIT_COOLDOWN_SECS", 300),
                discovery_period_secs: env_parse("DISCOVERY_PERIOD_SECS", 3600),
            },
            retry: RetryConfig {
                max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3),
                base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", 500),
                max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", 10_000),
            },
            breaker: BreakerConfig {
                failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", 5),
                cooldown_secs: env_parse("BREAKER_COOLDOWN_SECS", 60),
                half_open_probes: env_parse("BREAKER_HALF_OPEN_PROBES", 2),
                success_threshold: env_parse("BREAKER_SUCCESS_THRESHOLD", 2),
            },
            idempotency: IdempotencyConfig {
                process_signal_ttl_secs: env_parse("IDEM_PROCESS_SIGNAL_TTL_SECS", 300),
                trade_ttl_secs: env_parse("IDEM_TRADE_TTL_SECS", 300),
                close_position_ttl_secs: env_parse("IDEM_CLOSE_POSITION_TTL_SECS", 120),
                completion_ttl_secs: env_parse("IDEM_COMPLETION_TTL_SECS", 3600),
            },
            engine: EngineConfig {
                signal_expiry_secs: env_parse("SIGNAL_EXPIRY_SECS", 60),
                soft_limit_secs: env_parse("ENGINE_SOFT_LIMIT_SECS", 540),
                hard_limit_secs: env_parse("ENGINE_HARD_LIMIT_SECS", 600),
                pending_trade_grace_secs: env_parse("PENDING_TRADE_GRACE_SECS", 120),
                poll_interval_ms: env_parse("WORKER_POLL_INTERVAL_MS", 500),
                sweep_interval_secs: env_parse("SIGNAL_SWEEP_INTERVAL_SECS", 15),
                min_trading_balance: env_parse_decimal("MIN_TRADING_BALANCE", Decimal::new(5, 0)),
                min_trade_size: env_parse_decimal("MIN_TRADE_SIZE", Decimal::new(5, 0)),
            },
            monitor: MonitorConfig {
                reprice_period_secs: env_parse("MONITOR_REPRICE_PERIOD_SECS", 10),
                sl_tp_period_secs: env_parse("MONITOR_SL_TP_PERIOD_SECS", 10),
                reconcile_period_secs: env_parse("MONITOR_RECONCILE_PERIOD_SECS", 30),
            },
            api: ApiConfig {
                bind_addr: env::var("API_BIND_ADDR")
                    .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            },
        })
    }

    /// Minimum order notional per (venue, market) in USDT.
    pub fn min_notional(venue: Venue, market: Market) -> Decimal {
        match (venue, market) {
            (Venue::Binance, Market::Spot) => Decimal::new(5, 0),
            (Venue::Binance, _) => Decimal::new(5, 0),
            (Venue::Bybit, Market::Spot) => Decimal::new(1, 0),
            (Venue::Bybit, _) => Decimal::new(5, 0),
            (Venue::Okx, _) => Decimal::new(5, 0),
            (Venue::Bitget, _) => Decimal::new(5, 0),
        }
    }

    /// Venue-side leverage cap per market.
    pub fn venue_leverage_cap(venue: Venue, market: Market) -> u32 {
        match market {
            Market::Spot => 1,
            _ => match venue {
                Venue::Binance => 125,
                Venue::Bybit => 100,
                Venue::Okx => 100,
                Venue::Bitget => 125,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_parse_decimal(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
            half_open_probes: 2,
            success_threshold: 2,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signal_expiry_secs: 60,
            soft_limit_secs: 540,
            hard_limit_secs: 600,
            pending_trade_grace_secs: 120,
            poll_interval_ms: 500,
            sweep_interval_secs: 15,
            min_trading_balance: Decimal::new(5, 0),
            min_trade_size: Decimal::new(5, 0),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reprice_period_secs: 10,
            sl_tp_period_secs: 10,
            reconcile_period_secs: 30,
        }
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            process_signal_ttl_secs: 300,
            trade_ttl_secs: 300,
            close_position_ttl_secs: 120,
            completion_ttl_secs: 3600,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            critical: TierConfig { period_secs: 12, batch_size: 20 },
            high: TierConfig { period_secs: 30, batch_size: 30 },
            normal: TierConfig { period_secs: 45, batch_size: 40 },
            low: TierConfig { period_secs: 120, batch_size: 50 },
            backpressure_threshold: 500,
            sharing_disabled_after: 5,
            sharing_recheck_hours: 24,
            rate_limit_cooldown_secs: 300,
            discovery_period_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 4_000,
        };
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(1_000));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(2_000));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_millis(4_000));
        // Capped from here on.
        assert_eq!(retry.delay_for_attempt(5), Duration::from_millis(4_000));
    }

    #[test]
    fn spot_leverage_cap_is_one() {
        for venue in [Venue::Binance, Venue::Bybit, Venue::Okx, Venue::Bitget] {
            assert_eq!(AppConfig::venue_leverage_cap(venue, Market::Spot), 1);
            assert!(AppConfig::venue_leverage_cap(venue, Market::UsdmFutures) >= 100);
        }
    }
}
