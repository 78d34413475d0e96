//! Retry and circuit-breaker wrapper around every adapter call.
//!
//! The wrapper is the only component that records venue success/failure
//! counters. Breakers are keyed by (venue, credential scope) so one user's
//! broken key cannot blacklist a venue for everyone, while venue-wide
//! outages (shared public scopes) still fail fast for all callers.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{BreakerConfig, RetryConfig};
use crate::error::{VenueError, VenueResult};
use crate::types::Venue;

/// Circuit state machine: `CLOSED → OPEN → HALF_OPEN → CLOSED/OPEN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    half_open_inflight: u32,
}

/// Per-scope three-state circuit breaker.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_successes: 0,
                half_open_inflight: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Admit a call, or fail fast with the current state.
    ///
    /// OPEN circuits transition to HALF_OPEN once the cooldown elapses;
    /// HALF_OPEN admits at most `half_open_probes` concurrent probes.
    fn try_acquire(&self, scope: &str) -> VenueResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooldown = Duration::from_secs(self.config.cooldown_secs);
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= cooldown)
                    .unwrap_or(true);
                if elapsed {
                    debug!(scope = %scope, "circuit cooldown elapsed, probing");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_inflight = 1;
                    Ok(())
                } else {
                    Err(VenueError::CircuitOpen { scope: scope.to_string() })
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_inflight < self.config.half_open_probes {
                    inner.half_open_inflight += 1;
                    Ok(())
                } else {
                    Err(VenueError::CircuitOpen { scope: scope.to_string() })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, scope: &str) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        scope = %scope,
                        failures = inner.consecutive_failures,
                        "circuit OPEN"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                // One probe failure reopens.
                warn!(scope = %scope, "probe failed, circuit re-OPEN");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_inflight = 0;
                inner.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }
}

/// Resilience configuration bundle.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
}

/// Wraps adapter calls with bounded retry and per-scope circuit breaking.
pub struct Resilience {
    config: ResilienceConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl Resilience {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.breaker.clone())))
            .clone()
    }

    /// Current circuit state for a scope; CLOSED when never used.
    pub fn circuit_state(&self, venue: Venue, scope: &str) -> CircuitState {
        let key = scope_key(venue, scope);
        self.breakers
            .get(&key)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Run `op` with retry and circuit breaking.
    ///
    /// Retries `RetryableNetwork` and `RateLimited` with exponential backoff
    /// (honoring venue-supplied `retry_after`); terminal errors surface
    /// immediately. Business rejections never count against the breaker.
    pub async fn call<T, F, Fut>(&self, venue: Venue, scope: &str, mut op: F) -> VenueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VenueResult<T>>,
    {
        let key = scope_key(venue, scope);
        let breaker = self.breaker(&key);
        let max_attempts = self.config.retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            breaker.try_acquire(&key)?;

            match op().await {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    if err.counts_against_breaker() {
                        breaker.record_failure(&key);
                    } else {
                        // The venue answered; the scope is healthy.
                        breaker.record_success();
                    }

                    if !err.is_retryable() || attempt >= max_attempts {
                        return Err(err);
                    }

                    let delay = match &err {
                        VenueError::RateLimited { retry_after_secs: Some(secs) } => {
                            Duration::from_secs(*secs)
                        }
                        _ => self.config.retry.delay_for_attempt(attempt),
                    };
                    debug!(
                        scope = %key,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying venue call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Breaker key for a venue plus credential scope.
pub fn scope_key(venue: Venue, scope: &str) -> String {
    format!("{}:{}", venue, scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(failure_threshold: u32, cooldown_secs: u64) -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            breaker: BreakerConfig {
                failure_threshold,
                cooldown_secs,
                half_open_probes: 2,
                success_threshold: 2,
            },
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let resilience = Resilience::new(ResilienceConfig {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            breaker: BreakerConfig::default(),
        });
        let calls = AtomicU32::new(0);

        let result: VenueResult<u32> = resilience
            .call(Venue::Binance, "public", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(VenueError::RetryableNetwork("503".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let resilience = Resilience::new(ResilienceConfig {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            breaker: BreakerConfig::default(),
        });
        let calls = AtomicU32::new(0);

        let result: VenueResult<u32> = resilience
            .call(Venue::Binance, "user-1", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(VenueError::InsufficientBalance) }
            })
            .await;

        assert!(matches!(result, Err(VenueError::InsufficientBalance)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures_and_fails_fast() {
        let resilience = Resilience::new(fast_config(5, 60));
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let _: VenueResult<()> = resilience
                .call(Venue::Bybit, "public", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(VenueError::RetryableNetwork("500".into())) }
                })
                .await;
        }
        assert_eq!(
            resilience.circuit_state(Venue::Bybit, "public"),
            CircuitState::Open
        );

        // Next call must fail fast without reaching the venue.
        let before = calls.load(Ordering::SeqCst);
        let result: VenueResult<()> = resilience
            .call(Venue::Bybit, "public", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(VenueError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn half_open_closes_after_successes() {
        let resilience = Resilience::new(fast_config(2, 0));

        for _ in 0..2 {
            let _: VenueResult<()> = resilience
                .call(Venue::Okx, "public", || async {
                    Err(VenueError::RetryableNetwork("500".into()))
                })
                .await;
        }
        assert_eq!(
            resilience.circuit_state(Venue::Okx, "public"),
            CircuitState::Open
        );

        // Zero cooldown: the next calls are probes.
        let first: VenueResult<()> = resilience
            .call(Venue::Okx, "public", || async { Ok(()) })
            .await;
        assert!(first.is_ok());
        assert_eq!(
            resilience.circuit_state(Venue::Okx, "public"),
            CircuitState::HalfOpen
        );

        let second: VenueResult<()> = resilience
            .call(Venue::Okx, "public", || async { Ok(()) })
            .await;
        assert!(second.is_ok());
        assert_eq!(
            resilience.circuit_state(Venue::Okx, "public"),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let resilience = Resilience::new(fast_config(2, 0));

        for _ in 0..2 {
            let _: VenueResult<()> = resilience
                .call(Venue::Bitget, "public", || async {
                    Err(VenueError::RetryableNetwork("500".into()))
                })
                .await;
        }

        let _: VenueResult<()> = resilience
            .call(Venue::Bitget, "public", || async {
                Err(VenueError::RetryableNetwork("500".into()))
            })
            .await;
        assert_eq!(
            resilience.circuit_state(Venue::Bitget, "public"),
            CircuitState::Open
        );
    }

    #[tokio::test]
    async fn business_rejections_do_not_trip_breaker() {
        let resilience = Resilience::new(fast_config(2, 60));

        for _ in 0..10 {
            let _: VenueResult<()> = resilience
                .call(Venue::Binance, "user-2", || async {
                    Err(VenueError::InvalidOrder("min notional".into()))
                })
                .await;
        }
        assert_eq!(
            resilience.circuit_state(Venue::Binance, "user-2"),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let resilience = Resilience::new(fast_config(1, 60));

        let _: VenueResult<()> = resilience
            .call(Venue::Binance, "user-a", || async {
                Err(VenueError::RetryableNetwork("500".into()))
            })
            .await;
        assert_eq!(
            resilience.circuit_state(Venue::Binance, "user-a"),
            CircuitState::Open
        );
        assert_eq!(
            resilience.circuit_state(Venue::Binance, "user-b"),
            CircuitState::Closed
        );
    }
}
