//! Whale Tracker
//!
//! Tiered polling of whale positions across venues, snapshot diffing into
//! BUY/SELL signals, sharing-status tracking, and leaderboard discovery.

pub mod confidence;
pub mod diff;
pub mod discovery;
pub mod scheduler;
pub mod sharing;

pub use confidence::{confidence_score, derive_priority};
pub use diff::{diff_positions, SnapshotDiff};
pub use scheduler::{PollingScheduler, SchedulerDeps};
pub use sharing::{apply_outcome, PollOutcome, SharingPolicy};
