//! Error types for the copy-trading platform.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Stale version on {entity} {id}")]
    StaleVersion { entity: &'static str, id: uuid::Uuid },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for venue adapter calls.
///
/// The resilience wrapper retries [`VenueError::RetryableNetwork`] and
/// [`VenueError::RateLimited`]; everything else surfaces immediately.
#[derive(Error, Debug, Clone)]
pub enum VenueError {
    #[error("transient network failure: {0}")]
    RetryableNetwork(String),

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("invalid leverage: {0}")]
    InvalidLeverage(String),

    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("authentication rejected: {0}")]
    AuthFailure(String),

    #[error("operation not supported by venue")]
    Unsupported,

    #[error("circuit open for {scope}")]
    CircuitOpen { scope: String },

    #[error("venue error {code}: {message}")]
    Venue { code: String, message: String },
}

impl VenueError {
    /// Whether the resilience wrapper may retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VenueError::RetryableNetwork(_) | VenueError::RateLimited { .. }
        )
    }

    /// Whether this failure indicates auth rejection or venue-wide throttling
    /// rather than a real "no positions shared" response.
    pub fn is_auth_or_rate(&self) -> bool {
        matches!(
            self,
            VenueError::AuthFailure(_) | VenueError::RateLimited { .. }
        )
    }

    /// Whether this failure should count against the circuit breaker.
    ///
    /// Business rejections (bad order, insufficient balance) say nothing
    /// about venue health and must not trip the breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            VenueError::RetryableNetwork(_)
                | VenueError::RateLimited { .. }
                | VenueError::Venue { .. }
        )
    }
}

pub type VenueResult<T> = std::result::Result<T, VenueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(VenueError::RetryableNetwork("timeout".into()).is_retryable());
        assert!(VenueError::RateLimited { retry_after_secs: Some(3) }.is_retryable());
        assert!(!VenueError::InsufficientBalance.is_retryable());
        assert!(!VenueError::AuthFailure("bad key".into()).is_retryable());
        assert!(!VenueError::Unsupported.is_retryable());
    }

    #[test]
    fn breaker_classification_excludes_business_rejections() {
        assert!(!VenueError::InsufficientBalance.counts_against_breaker());
        assert!(!VenueError::InvalidOrder("precision".into()).counts_against_breaker());
        assert!(VenueError::RetryableNetwork("502".into()).counts_against_breaker());
        assert!(VenueError::Venue { code: "-1000".into(), message: "unknown".into() }
            .counts_against_breaker());
    }
}
