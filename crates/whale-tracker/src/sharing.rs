//! Sharing-status tracking.
//!
//! Leaderboard profiles can stop sharing at any time, and an empty response
//! is the only evidence. Five consecutive empties mark the whale
//! SHARING_DISABLED and park it for a day; a single non-empty poll restores
//! it. Auth and throttle failures are not evidence either way.

use chrono::{DateTime, Duration, Utc};
use copytrade_core::types::{DataStatus, Whale};

/// Classified outcome of one poll of one whale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The venue returned at least one shared position.
    Samples,
    /// The venue answered and the profile shares nothing.
    Empty,
    /// Credentials rejected or throttled; `venue_wide` marks throttling
    /// that applies to the whole venue, not this whale.
    AuthOrRateError { venue_wide: bool },
    /// Any other adapter failure.
    AdapterError,
}

/// Tunables for the tracker.
#[derive(Debug, Clone)]
pub struct SharingPolicy {
    /// Consecutive empties before SHARING_DISABLED.
    pub disable_after: u32,
    /// Rest period before re-checking a disabled whale.
    pub recheck_after: Duration,
    /// Cooldown applied on venue-wide throttling.
    pub rate_limit_cooldown: Duration,
}

impl Default for SharingPolicy {
    fn default() -> Self {
        Self {
            disable_after: 5,
            recheck_after: Duration::hours(24),
            rate_limit_cooldown: Duration::seconds(300),
        }
    }
}

/// Fold one poll outcome into the whale's sharing state.
///
/// Always stamps `last_checked_at`; the caller persists the whale after.
pub fn apply_outcome(
    whale: &mut Whale,
    outcome: &PollOutcome,
    policy: &SharingPolicy,
    now: DateTime<Utc>,
) {
    whale.last_checked_at = Some(now);

    match outcome {
        PollOutcome::Samples => {
            whale.consecutive_empty_checks = 0;
            whale.data_status = DataStatus::Active;
            whale.sharing_disabled_at = None;
            whale.sharing_recheck_at = None;
            whale.last_position_found = Some(now);
        }
        PollOutcome::Empty => {
            whale.consecutive_empty_checks += 1;
            if whale.consecutive_empty_checks >= policy.disable_after
                && whale.data_status != DataStatus::SharingDisabled
            {
                whale.data_status = DataStatus::SharingDisabled;
                whale.sharing_disabled_at = Some(now);
                whale.sharing_recheck_at = Some(now + policy.recheck_after);
            }
        }
        PollOutcome::AuthOrRateError { venue_wide } => {
            // No evidence about sharing; the counter stays put.
            if *venue_wide {
                whale.data_status = DataStatus::RateLimited;
                whale.sharing_recheck_at = Some(now + policy.rate_limit_cooldown);
            }
        }
        PollOutcome::AdapterError => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytrade_core::types::Venue;

    fn whale() -> Whale {
        Whale::cex(Venue::Binance, "uid-1")
    }

    #[test]
    fn five_consecutive_empties_disable_sharing() {
        let policy = SharingPolicy::default();
        let now = Utc::now();
        let mut w = whale();

        for i in 1..=4 {
            apply_outcome(&mut w, &PollOutcome::Empty, &policy, now);
            assert_eq!(w.consecutive_empty_checks, i);
            assert_eq!(w.data_status, DataStatus::Active);
        }

        apply_outcome(&mut w, &PollOutcome::Empty, &policy, now);
        assert_eq!(w.consecutive_empty_checks, 5);
        assert_eq!(w.data_status, DataStatus::SharingDisabled);
        assert_eq!(w.sharing_disabled_at, Some(now));
        assert_eq!(w.sharing_recheck_at, Some(now + Duration::hours(24)));
    }

    #[test]
    fn samples_reset_counter_and_restore_active() {
        let policy = SharingPolicy::default();
        let now = Utc::now();
        let mut w = whale();

        for _ in 0..5 {
            apply_outcome(&mut w, &PollOutcome::Empty, &policy, now);
        }
        assert_eq!(w.data_status, DataStatus::SharingDisabled);

        // First non-empty poll at the re-check restores everything.
        let later = now + Duration::hours(25);
        apply_outcome(&mut w, &PollOutcome::Samples, &policy, later);
        assert_eq!(w.consecutive_empty_checks, 0);
        assert_eq!(w.data_status, DataStatus::Active);
        assert_eq!(w.sharing_recheck_at, None);
        assert_eq!(w.last_position_found, Some(later));
    }

    #[test]
    fn auth_errors_do_not_touch_the_counter() {
        let policy = SharingPolicy::default();
        let now = Utc::now();
        let mut w = whale();

        for _ in 0..4 {
            apply_outcome(&mut w, &PollOutcome::Empty, &policy, now);
        }
        apply_outcome(
            &mut w,
            &PollOutcome::AuthOrRateError { venue_wide: false },
            &policy,
            now,
        );
        assert_eq!(w.consecutive_empty_checks, 4);
        assert_eq!(w.data_status, DataStatus::Active);
    }

    #[test]
    fn venue_wide_rate_limit_parks_the_whale_briefly() {
        let policy = SharingPolicy::default();
        let now = Utc::now();
        let mut w = whale();

        apply_outcome(
            &mut w,
            &PollOutcome::AuthOrRateError { venue_wide: true },
            &policy,
            now,
        );
        assert_eq!(w.data_status, DataStatus::RateLimited);
        assert_eq!(w.sharing_recheck_at, Some(now + Duration::seconds(300)));
        assert!(!w.pollable(now));
        assert!(w.pollable(now + Duration::seconds(301)));
    }

    #[test]
    fn adapter_errors_only_stamp_the_check_time() {
        let policy = SharingPolicy::default();
        let now = Utc::now();
        let mut w = whale();

        apply_outcome(&mut w, &PollOutcome::AdapterError, &policy, now);
        assert_eq!(w.consecutive_empty_checks, 0);
        assert_eq!(w.data_status, DataStatus::Active);
        assert_eq!(w.last_checked_at, Some(now));
    }
}
