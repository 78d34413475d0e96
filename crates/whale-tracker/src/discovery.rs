//! Leaderboard discovery sweep.
//!
//! Low-cadence task that pages each venue's public leaderboard and registers
//! unseen traders as whales, so the normal/low polling tiers pick them up
//! and the platform has discovery data before anyone follows them.

use rust_decimal::prelude::ToPrimitive;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use copytrade_core::types::{Market, TraderSummary, Whale};
use copytrade_core::Result;

use crate::scheduler::SchedulerDeps;

const DISCOVERY_PAGES: u32 = 2;

pub async fn run_discovery(deps: SchedulerDeps, period_secs: u64) {
    let mut ticker = interval(Duration::from_secs(period_secs.max(60)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = sweep(&deps).await {
            error!(error = %err, "leaderboard discovery sweep failed");
        }
    }
}

async fn sweep(deps: &SchedulerDeps) -> Result<()> {
    let mut discovered = 0usize;
    for venue in deps.adapters.venues() {
        if !venue.leaderboard_is_public() {
            continue;
        }
        let adapter = match deps.adapters.get(venue) {
            Some(adapter) => adapter,
            None => continue,
        };
        for page in 1..=DISCOVERY_PAGES {
            let rows = match deps
                .resilience
                .call(venue, "leaderboard", || {
                    let adapter = adapter.clone();
                    async move { adapter.get_leaderboard(Market::UsdmFutures, page).await }
                })
                .await
            {
                Ok(rows) => rows,
                Err(err) => {
                    debug!(venue = %venue, page = page, error = %err, "leaderboard page failed");
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }
            for summary in rows {
                deps.whales.upsert(&whale_from_summary(summary)).await?;
                discovered += 1;
            }
        }
    }
    if discovered > 0 {
        info!(traders = discovered, "leaderboard sweep upserted traders");
    }
    Ok(())
}

/// Seed a whale from a leaderboard row. The score starts from the reported
/// ROI so strong traders land in the high tier immediately.
fn whale_from_summary(summary: TraderSummary) -> Whale {
    let score = summary
        .roi
        .and_then(|r| r.to_i64())
        .map(|r| (30 + r.clamp(0, 50)) as u32)
        .unwrap_or(30);
    let mut whale = Whale::cex(summary.venue, summary.venue_uid).with_priority_score(score);
    whale.display_name = summary.display_name;
    whale.polling_interval_seconds = 60;
    whale
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytrade_core::types::Venue;
    use rust_decimal::Decimal;

    fn summary(roi: Option<Decimal>) -> TraderSummary {
        TraderSummary {
            venue: Venue::Binance,
            venue_uid: "uid-9".into(),
            display_name: Some("top gun".into()),
            roi,
            pnl: None,
            follower_count: None,
        }
    }

    #[test]
    fn roi_seeds_priority_score() {
        let whale = whale_from_summary(summary(Some(Decimal::new(40, 0))));
        assert_eq!(whale.priority_score, 70);
        assert_eq!(whale.display_name.as_deref(), Some("top gun"));
    }

    #[test]
    fn missing_roi_gets_the_floor_score() {
        assert_eq!(whale_from_summary(summary(None)).priority_score, 30);
    }

    #[test]
    fn huge_roi_is_clamped() {
        let whale = whale_from_summary(summary(Some(Decimal::new(100_000, 0))));
        assert_eq!(whale.priority_score, 80);
    }
}
