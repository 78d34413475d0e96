//! Signal types: intent records derived from whale position changes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::position::PositionSide;
use crate::types::venue::Market;

/// Where a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Whale,
    Manual,
    Indicator,
}

impl SignalSource {
    pub fn code(&self) -> i16 {
        match self {
            SignalSource::Whale => 0,
            SignalSource::Manual => 1,
            SignalSource::Indicator => 2,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => SignalSource::Manual,
            2 => SignalSource::Indicator,
            _ => SignalSource::Whale,
        }
    }
}

/// Trade direction the signal asks followers to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    pub fn code(&self) -> i16 {
        match self {
            SignalAction::Buy => 0,
            SignalAction::Sell => 1,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => SignalAction::Sell,
            _ => SignalAction::Buy,
        }
    }

    /// Action that opens a position of the given side.
    pub fn opening(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => SignalAction::Buy,
            PositionSide::Short => SignalAction::Sell,
        }
    }

    /// Action that closes a position of the given side.
    pub fn closing(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => SignalAction::Sell,
            PositionSide::Short => SignalAction::Buy,
        }
    }
}

/// Confidence bucket for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    pub fn code(&self) -> i16 {
        match self {
            Confidence::Low => 0,
            Confidence::Medium => 1,
            Confidence::High => 2,
            Confidence::VeryHigh => 3,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => Confidence::Medium,
            2 => Confidence::High,
            3 => Confidence::VeryHigh,
            _ => Confidence::Low,
        }
    }

    /// Bucket a numeric score: `<40 LOW, <60 MEDIUM, <80 HIGH, else VERY_HIGH`.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=39 => Confidence::Low,
            40..=59 => Confidence::Medium,
            60..=79 => Confidence::High,
            _ => Confidence::VeryHigh,
        }
    }
}

/// Dispatch priority. Stored as its code so the priority-ordered pop is a
/// plain `ORDER BY priority ASC, created_at ASC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalPriority {
    High,
    Medium,
    Low,
}

impl SignalPriority {
    pub fn code(&self) -> i16 {
        match self {
            SignalPriority::High => 0,
            SignalPriority::Medium => 1,
            SignalPriority::Low => 2,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            0 => SignalPriority::High,
            2 => SignalPriority::Low,
            _ => SignalPriority::Medium,
        }
    }
}

/// Signal lifecycle.
///
/// `PENDING → PROCESSING → {PROCESSED, FAILED}`; `PENDING → EXPIRED` by the
/// sweeper; `PENDING → SKIPPED` for copier-less low-priority signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Pending,
    Processing,
    Processed,
    Skipped,
    Failed,
    Expired,
}

impl SignalStatus {
    pub fn code(&self) -> i16 {
        match self {
            SignalStatus::Pending => 0,
            SignalStatus::Processing => 1,
            SignalStatus::Processed => 2,
            SignalStatus::Skipped => 3,
            SignalStatus::Failed => 4,
            SignalStatus::Expired => 5,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => SignalStatus::Processing,
            2 => SignalStatus::Processed,
            3 => SignalStatus::Skipped,
            4 => SignalStatus::Failed,
            5 => SignalStatus::Expired,
            _ => SignalStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignalStatus::Processed
                | SignalStatus::Skipped
                | SignalStatus::Failed
                | SignalStatus::Expired
        )
    }
}

/// An intent record derived from a whale's position change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub whale_id: Uuid,
    pub source: SignalSource,
    /// Stable dedup key; unique-indexed in the store.
    pub fingerprint: String,
    pub action: SignalAction,
    pub symbol: String,
    pub market: Market,
    pub is_close: bool,
    pub whale_leverage: Option<u32>,
    pub amount_hint_usd: Option<Decimal>,
    pub price_at_signal: Option<Decimal>,
    pub confidence: Confidence,
    pub confidence_score: u32,
    pub priority: SignalPriority,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub trades_executed: u32,
    pub error: Option<String>,
    /// Optimistic-concurrency counter; bumps on every conditional update.
    pub version: i64,
}

impl Signal {
    pub fn whale_signal(
        whale_id: Uuid,
        action: SignalAction,
        symbol: impl Into<String>,
        market: Market,
        is_close: bool,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let symbol = symbol.into();
        let fingerprint = Self::fingerprint_for(whale_id, &symbol, action, is_close, detected_at);
        Self {
            id: Uuid::new_v4(),
            whale_id,
            source: SignalSource::Whale,
            fingerprint,
            action,
            symbol,
            market,
            is_close,
            whale_leverage: None,
            amount_hint_usd: None,
            price_at_signal: None,
            confidence: Confidence::Medium,
            confidence_score: 50,
            priority: SignalPriority::Medium,
            status: SignalStatus::Pending,
            created_at: detected_at,
            processing_started_at: None,
            processed_at: None,
            trades_executed: 0,
            error: None,
            version: 0,
        }
    }

    /// Stable identity of one detection. Second resolution: the same whale
    /// flipping the same symbol twice within a second collapses into one
    /// signal, which matches what the snapshot diff can observe anyway.
    pub fn fingerprint_for(
        whale_id: Uuid,
        symbol: &str,
        action: SignalAction,
        is_close: bool,
        detected_at: DateTime<Utc>,
    ) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            whale_id.simple(),
            symbol,
            match action {
                SignalAction::Buy => "buy",
                SignalAction::Sell => "sell",
            },
            if is_close { "close" } else { "open" },
            detected_at.timestamp(),
        )
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_buckets() {
        assert_eq!(Confidence::from_score(10), Confidence::Low);
        assert_eq!(Confidence::from_score(39), Confidence::Low);
        assert_eq!(Confidence::from_score(40), Confidence::Medium);
        assert_eq!(Confidence::from_score(59), Confidence::Medium);
        assert_eq!(Confidence::from_score(60), Confidence::High);
        assert_eq!(Confidence::from_score(79), Confidence::High);
        assert_eq!(Confidence::from_score(80), Confidence::VeryHigh);
        assert_eq!(Confidence::from_score(100), Confidence::VeryHigh);
    }

    #[test]
    fn closing_action_inverts_side() {
        assert_eq!(SignalAction::closing(PositionSide::Long), SignalAction::Sell);
        assert_eq!(SignalAction::closing(PositionSide::Short), SignalAction::Buy);
        assert_eq!(SignalAction::opening(PositionSide::Long), SignalAction::Buy);
        assert_eq!(SignalAction::opening(PositionSide::Short), SignalAction::Sell);
    }

    #[test]
    fn fingerprint_is_stable_for_same_detection() {
        let whale_id = Uuid::new_v4();
        let at = Utc::now();
        let a = Signal::fingerprint_for(whale_id, "BTCUSDT", SignalAction::Buy, false, at);
        let b = Signal::fingerprint_for(whale_id, "BTCUSDT", SignalAction::Buy, false, at);
        assert_eq!(a, b);

        let other = Signal::fingerprint_for(whale_id, "ETHUSDT", SignalAction::Buy, false, at);
        assert_ne!(a, other);
    }

    #[test]
    fn terminal_states() {
        assert!(!SignalStatus::Pending.is_terminal());
        assert!(!SignalStatus::Processing.is_terminal());
        for status in [
            SignalStatus::Processed,
            SignalStatus::Skipped,
            SignalStatus::Failed,
            SignalStatus::Expired,
        ] {
            assert!(status.is_terminal());
        }
    }
}
