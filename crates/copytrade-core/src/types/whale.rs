//! Observed-trader ("whale") types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::venue::Venue;

/// How a whale is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhaleKind {
    /// A trader on a centralized venue's copy-trading leaderboard.
    CexTrader,
    /// An on-chain wallet tracked by address.
    OnchainWallet,
}

impl WhaleKind {
    pub fn code(&self) -> i16 {
        match self {
            WhaleKind::CexTrader => 0,
            WhaleKind::OnchainWallet => 1,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => WhaleKind::OnchainWallet,
            _ => WhaleKind::CexTrader,
        }
    }
}

/// Whether a whale's positions are currently observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStatus {
    Active,
    /// The trader turned off public position sharing; re-checked after a day.
    SharingDisabled,
    /// The venue throttled us; short cooldown before the next poll.
    RateLimited,
}

impl DataStatus {
    pub fn code(&self) -> i16 {
        match self {
            DataStatus::Active => 0,
            DataStatus::SharingDisabled => 1,
            DataStatus::RateLimited => 2,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => DataStatus::SharingDisabled,
            2 => DataStatus::RateLimited,
            _ => DataStatus::Active,
        }
    }
}

/// A publicly observable trader whose position changes produce signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Whale {
    pub id: Uuid,
    /// CEX identity: venue + venue-scoped trader uid.
    pub venue: Option<Venue>,
    pub venue_uid: Option<String>,
    /// On-chain identity: chain tag + wallet address.
    pub chain: Option<String>,
    pub wallet_address: Option<String>,
    pub display_name: Option<String>,
    pub kind: WhaleKind,
    pub data_status: DataStatus,
    pub consecutive_empty_checks: u32,
    pub sharing_disabled_at: Option<DateTime<Utc>>,
    pub sharing_recheck_at: Option<DateTime<Utc>>,
    /// Historical quality score in [1, 100]; drives polling priority and
    /// signal confidence.
    pub priority_score: u32,
    pub polling_interval_seconds: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_position_found: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Whale {
    pub fn cex(venue: Venue, venue_uid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            venue: Some(venue),
            venue_uid: Some(venue_uid.into()),
            chain: None,
            wallet_address: None,
            display_name: None,
            kind: WhaleKind::CexTrader,
            data_status: DataStatus::Active,
            consecutive_empty_checks: 0,
            sharing_disabled_at: None,
            sharing_recheck_at: None,
            priority_score: 50,
            polling_interval_seconds: 45,
            last_checked_at: None,
            last_position_found: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_priority_score(mut self, score: u32) -> Self {
        self.priority_score = score.clamp(1, 100);
        self
    }

    /// Whether this whale is currently eligible for polling.
    pub fn pollable(&self, now: DateTime<Utc>) -> bool {
        match self.data_status {
            DataStatus::Active => true,
            DataStatus::SharingDisabled | DataStatus::RateLimited => self
                .sharing_recheck_at
                .map(|recheck| now >= recheck)
                .unwrap_or(true),
        }
    }

    /// Whether `polling_interval_seconds` has elapsed since the last poll.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked_at {
            Some(last) => {
                (now - last).num_seconds() >= self.polling_interval_seconds as i64
            }
            None => true,
        }
    }
}

/// A user's subscription to one whale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleFollow {
    pub user_id: Uuid,
    pub whale_id: Uuid,
    pub auto_copy_enabled: bool,
    /// Fixed copy size; takes precedence over everything else.
    pub trade_size_usdt: Option<Decimal>,
    /// Percentage of available balance, applied when no fixed size is set.
    pub trade_size_percent: Option<Decimal>,
    pub leverage_override: Option<u32>,
    pub copy_whale_leverage: bool,
    pub stop_loss_percent: Option<Decimal>,
    pub take_profit_percent: Option<Decimal>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl WhaleFollow {
    pub fn new(user_id: Uuid, whale_id: Uuid) -> Self {
        Self {
            user_id,
            whale_id,
            auto_copy_enabled: true,
            trade_size_usdt: None,
            trade_size_percent: None,
            leverage_override: None,
            copy_whale_leverage: false,
            stop_loss_percent: None,
            take_profit_percent: None,
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn sharing_disabled_whale_pollable_only_after_recheck() {
        let now = Utc::now();
        let mut whale = Whale::cex(Venue::Binance, "uid-1");
        whale.data_status = DataStatus::SharingDisabled;
        whale.sharing_recheck_at = Some(now + Duration::hours(24));
        assert!(!whale.pollable(now));
        assert!(whale.pollable(now + Duration::hours(25)));
    }

    #[test]
    fn due_respects_per_whale_interval() {
        let now = Utc::now();
        let mut whale = Whale::cex(Venue::Bybit, "uid-2");
        assert!(whale.due(now), "never-polled whale is always due");

        whale.polling_interval_seconds = 60;
        whale.last_checked_at = Some(now - Duration::seconds(30));
        assert!(!whale.due(now));
        whale.last_checked_at = Some(now - Duration::seconds(61));
        assert!(whale.due(now));
    }
}
