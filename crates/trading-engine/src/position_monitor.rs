//! Position monitor: re-pricing, local SL/TP triggering, and reconciliation.
//!
//! Three periodic tasks on their own cadences, one instance per role. The
//! reconciler is the authority for every trade whose venue outcome was not
//! observed at call time and for positions that diverge from the exchange.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use copytrade_core::config::MonitorConfig;
use copytrade_core::events::DomainEvent;
use copytrade_core::types::{
    CloseReason, Market, OrderResult, OrderType, Position, PositionSide, PositionStatus,
    Trade, TradeSide, TradeStatus, UserSettings, Venue, VenueOrderState,
};
use copytrade_core::Result;
use uuid::Uuid;

use crate::engine::CopyTradeEngine;
use crate::execution::trade_reserves_balance;

/// Mark prices fetched once per pass, keyed by (venue, symbol, market).
type TickerCache = HashMap<(Venue, String, Market), Decimal>;

fn tick(period_secs: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs(period_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct PositionMonitor {
    engine: Arc<CopyTradeEngine>,
    config: MonitorConfig,
}

impl PositionMonitor {
    pub fn new(engine: Arc<CopyTradeEngine>, config: MonitorConfig) -> Self {
        Self { engine, config }
    }

    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let monitor = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tick(monitor.config.reprice_period_secs);
            loop {
                ticker.tick().await;
                if let Err(err) = monitor.reprice_pass().await {
                    error!(task = "reprice", error = %err, "monitor pass failed");
                }
            }
        }));

        let monitor = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tick(monitor.config.sl_tp_period_secs);
            loop {
                ticker.tick().await;
                if let Err(err) = monitor.sl_tp_pass().await {
                    error!(task = "sl_tp", error = %err, "monitor pass failed");
                }
            }
        }));

        let monitor = self;
        handles.push(tokio::spawn(async move {
            let mut ticker = tick(monitor.config.reconcile_period_secs);
            loop {
                ticker.tick().await;
                if let Err(err) = monitor.reconcile_pass().await {
                    error!(task = "reconcile", error = %err, "monitor pass failed");
                }
            }
        }));

        info!("position monitor started");
        handles
    }

    async fn ticker_price(
        &self,
        cache: &mut TickerCache,
        venue: Venue,
        symbol: &str,
        market: Market,
    ) -> Option<Decimal> {
        let key = (venue, symbol.to_string(), market);
        if let Some(price) = cache.get(&key) {
            return Some(*price);
        }
        let adapter = self.engine.deps().adapters.get(venue)?;
        let price = self
            .engine
            .deps()
            .resilience
            .call(venue, "public", || {
                let adapter = adapter.clone();
                let symbol = symbol.to_string();
                async move { adapter.get_ticker(&symbol, market).await }
            })
            .await;
        match price {
            Ok(price) if price > Decimal::ZERO => {
                cache.insert(key, price);
                Some(price)
            }
            Ok(_) => None,
            Err(err) => {
                debug!(venue = %venue, symbol = %symbol, error = %err, "ticker fetch failed");
                None
            }
        }
    }

    /// Refresh `current_price` and `unrealized_pnl` on every open position.
    async fn reprice_pass(&self) -> Result<()> {
        let deps = self.engine.deps();
        let positions = deps.positions.list_open().await?;
        let mut cache = TickerCache::new();

        for position in positions {
            let Some(price) = self
                .ticker_price(&mut cache, position.venue, &position.symbol, position.market)
                .await
            else {
                continue;
            };
            let unrealized = position.pnl_at(price);
            deps.positions.update_mark(position.id, price, unrealized).await?;
        }
        Ok(())
    }

    /// Fire local stop-loss/take-profit where no venue-side stop exists.
    async fn sl_tp_pass(&self) -> Result<()> {
        let deps = self.engine.deps();
        let positions = deps.positions.list_open().await?;
        let mut cache = TickerCache::new();
        let mut settings_cache: HashMap<Uuid, UserSettings> = HashMap::new();

        for position in positions {
            // A venue-side stop order owns the stop; only TP may remain ours.
            let local_stop = position.stop_loss_order_id.is_none();
            let Some(price) = self
                .ticker_price(&mut cache, position.venue, &position.symbol, position.market)
                .await
            else {
                continue;
            };

            if local_stop && position.stop_loss_hit(price) {
                info!(
                    position_id = %position.id,
                    price = %price,
                    stop = ?position.stop_loss_price,
                    "local stop-loss triggered"
                );
                self.close_from_monitor(&position, CloseReason::StopLoss).await;
                continue;
            }

            if position.take_profit_hit(price) {
                let settings = match settings_cache.get(&position.user_id) {
                    Some(settings) => settings.clone(),
                    None => {
                        let settings = deps
                            .users
                            .get_settings(position.user_id)
                            .await?
                            .unwrap_or_else(|| UserSettings::defaults_for(position.user_id));
                        settings_cache.insert(position.user_id, settings.clone());
                        settings
                    }
                };
                if settings.auto_close_on_tp {
                    info!(
                        position_id = %position.id,
                        price = %price,
                        target = ?position.take_profit_price,
                        "take-profit triggered"
                    );
                    self.close_from_monitor(&position, CloseReason::TakeProfit).await;
                }
            }
        }
        Ok(())
    }

    async fn close_from_monitor(&self, position: &Position, reason: CloseReason) {
        match self
            .engine
            .close_position(position.user_id, position.id, reason)
            .await
        {
            Ok(outcome) => debug!(position_id = %position.id, outcome = ?outcome, "monitor close"),
            Err(err) => {
                error!(position_id = %position.id, error = %err, "monitor close failed");
                self.engine.record_dead_letter(
                    "monitor_close",
                    json!({ "position_id": position.id, "reason": format!("{:?}", reason) }),
                    &err.to_string(),
                );
            }
        }
    }

    /// The reconciliation pass:
    ///  1. EXECUTING trades past the hard limit → NEEDS_RECONCILIATION
    ///  2. orphaned PENDING trades → resolve by client order id
    ///  3. NEEDS_RECONCILIATION trades → resolve by client order id
    ///  4. open positions absent from the exchange → external close
    async fn reconcile_pass(&self) -> Result<()> {
        let deps = self.engine.deps();
        let now = Utc::now();

        let hard_cutoff = now - ChronoDuration::seconds(deps.config.hard_limit_secs);
        for trade in deps.trades.stuck_executing(hard_cutoff).await? {
            warn!(trade_id = %trade.id, "trade exceeded hard limit, parking for reconciliation");
            deps.trades
                .mark_needs_reconciliation(trade.id, trade.version, "execution exceeded hard limit")
                .await?;
        }

        let grace_cutoff = now - ChronoDuration::seconds(deps.config.pending_trade_grace_secs);
        for trade in deps.trades.orphaned_pending(grace_cutoff).await? {
            if let Err(err) = self.resolve_trade(trade).await {
                error!(error = %err, "orphaned-pending resolution failed");
            }
        }

        for trade in deps.trades.needing_reconciliation().await? {
            if let Err(err) = self.resolve_trade(trade).await {
                error!(error = %err, "reconciliation failed");
            }
        }

        self.reconcile_external_positions().await
    }

    /// Decide the terminal state of a trade whose outcome was not observed.
    async fn resolve_trade(&self, trade: Trade) -> Result<()> {
        let deps = self.engine.deps();
        let creds = match deps.credentials.resolve(trade.user_id, trade.venue).await? {
            Some(creds) => creds,
            None => {
                // Without credentials the venue can never confirm; the
                // reservation must not stay stuck.
                return self
                    .engine
                    .rollback_trade(&trade.id, trade.version, "credentials unavailable")
                    .await;
            }
        };
        let Some(adapter) = deps.adapters.get(trade.venue) else {
            return Ok(());
        };

        let scope = format!("user:{}", trade.user_id.simple());
        let client_order_id = trade.client_order_id();
        let report = deps
            .resilience
            .call(trade.venue, &scope, || {
                let adapter = adapter.clone();
                let creds = creds.clone();
                let symbol = trade.symbol.clone();
                let client_order_id = client_order_id.clone();
                async move {
                    adapter
                        .get_order_status(&creds, &symbol, &client_order_id, trade.market)
                        .await
                }
            })
            .await;

        let report = match report {
            Ok(report) => report,
            Err(err) => {
                debug!(trade_id = %trade.id, error = %err, "order lookup failed, retrying next pass");
                return Ok(());
            }
        };

        match report {
            // No order at the venue: Phase 1 reserved, nothing was placed.
            None => {
                info!(trade_id = %trade.id, "no venue order found, rolling back");
                self.engine
                    .rollback_trade(&trade.id, trade.version, "no venue order found")
                    .await
            }
            Some(status) => match status.state {
                VenueOrderState::Filled => {
                    let result = OrderResult {
                        venue_order_id: status.venue_order_id,
                        filled_price: status.filled_price.unwrap_or(Decimal::ZERO),
                        filled_quantity: status
                            .filled_quantity
                            .unwrap_or(trade.requested_quantity),
                        fee: status.fee,
                        raw_timestamp: Utc::now(),
                    };
                    self.complete_recovered_fill(trade, result).await
                }
                VenueOrderState::Cancelled | VenueOrderState::Rejected => {
                    self.engine
                        .rollback_trade(&trade.id, trade.version, "venue cancelled or rejected")
                        .await
                }
                VenueOrderState::Open | VenueOrderState::PartiallyFilled => {
                    // Still working at the venue; promote orphaned PENDING
                    // so the hard limit eventually parks it.
                    if trade.status == TradeStatus::Pending {
                        deps.trades
                            .try_transition(
                                trade.id,
                                TradeStatus::Pending,
                                TradeStatus::Executing,
                                trade.version,
                            )
                            .await?;
                    }
                    Ok(())
                }
            },
        }
    }

    /// A parked trade turned out to be FILLED: run the matching Phase 2.
    async fn complete_recovered_fill(&self, trade: Trade, result: OrderResult) -> Result<()> {
        let deps = self.engine.deps();

        // Promote PENDING to EXECUTING so the settlement's version check
        // lines up with the live-path state graph.
        let version = if trade.status == TradeStatus::Pending {
            if !deps
                .trades
                .try_transition(
                    trade.id,
                    TradeStatus::Pending,
                    TradeStatus::Executing,
                    trade.version,
                )
                .await?
            {
                return Ok(());
            }
            trade.version + 1
        } else {
            trade.version
        };

        if trade_reserves_balance(&trade) {
            let settings = deps
                .users
                .get_settings(trade.user_id)
                .await?
                .unwrap_or_else(|| UserSettings::defaults_for(trade.user_id));
            self.engine
                .settle_filled_open(&trade, version, &result, None, &settings)
                .await?;
            return Ok(());
        }

        // A closing trade: the position it meant to close may still be open.
        match deps
            .positions
            .get_open_for_key(trade.user_id, trade.venue, &trade.symbol, trade.market)
            .await?
        {
            Some(position) => {
                let reservation = match deps.trades.get(position.entry_trade_id).await? {
                    Some(entry) => entry.trade_value_usdt,
                    None => trade.trade_value_usdt,
                };
                let reason = if trade.signal_id.is_some() {
                    CloseReason::WhaleExit
                } else {
                    CloseReason::Manual
                };
                self.engine
                    .settle_filled_close(&trade, version, &position, &result, reason, reservation)
                    .await?;
            }
            None => {
                // Position already settled elsewhere; record the fill only.
                let mut tx = deps.pool.begin().await?;
                deps.users.lock_for_update(&mut tx, trade.user_id).await?;
                deps.trades
                    .mark_filled_tx(
                        &mut tx,
                        trade.id,
                        version,
                        &result.venue_order_id,
                        result.filled_price,
                        result.filled_quantity,
                        result.fee,
                        None,
                    )
                    .await?;
                tx.commit().await?;
            }
        }
        Ok(())
    }

    /// Close DB positions that no longer exist on the exchange.
    ///
    /// Futures only: a spot holding is a wallet balance, not a venue
    /// position, so absence proves nothing there.
    async fn reconcile_external_positions(&self) -> Result<()> {
        let deps = self.engine.deps();
        let open = deps.positions.list_open().await?;
        let mut venue_books: HashMap<(Uuid, Venue, Market), Option<Vec<String>>> = HashMap::new();
        let mut cache = TickerCache::new();

        for position in open {
            if !position.market.is_futures() {
                continue;
            }
            let key = (position.user_id, position.venue, position.market);
            if !venue_books.contains_key(&key) {
                let book = self.fetch_account_symbols(&key).await;
                venue_books.insert(key.clone(), book);
            }
            let Some(Some(symbols)) = venue_books.get(&key) else {
                continue;
            };
            if symbols.iter().any(|s| *s == position.symbol) {
                continue;
            }

            // Gone from the exchange: close it on our books.
            let exit_price = self
                .ticker_price(&mut cache, position.venue, &position.symbol, position.market)
                .await
                .or(position.current_price)
                .unwrap_or(position.entry_price);
            if let Err(err) = self.settle_external_close(&position, exit_price).await {
                error!(position_id = %position.id, error = %err, "external close failed");
                self.engine.record_dead_letter(
                    "external_close",
                    json!({ "position_id": position.id }),
                    &err.to_string(),
                );
            }
        }
        Ok(())
    }

    async fn fetch_account_symbols(
        &self,
        key: &(Uuid, Venue, Market),
    ) -> Option<Vec<String>> {
        let (user_id, venue, market) = key;
        let deps = self.engine.deps();
        let creds = deps.credentials.resolve(*user_id, *venue).await.ok()??;
        let adapter = deps.adapters.get(*venue)?;
        let scope = format!("user:{}", user_id.simple());
        let samples = deps
            .resilience
            .call(*venue, &scope, || {
                let adapter = adapter.clone();
                let creds = creds.clone();
                let market = *market;
                async move { adapter.get_account_positions(&creds, market).await }
            })
            .await;
        match samples {
            Ok(samples) => Some(samples.into_iter().map(|s| s.symbol).collect()),
            Err(err) => {
                debug!(venue = %venue, error = %err, "account position fetch failed");
                None
            }
        }
    }

    /// Settle a position the exchange no longer has. A loss that consumed
    /// the whole margin is a liquidation; anything else is an external
    /// close at the last observed price. Either way a FILLED exit trade is
    /// synthesized so the closed position always references one.
    async fn settle_external_close(&self, position: &Position, exit_price: Decimal) -> Result<()> {
        let deps = self.engine.deps();
        let reservation = match deps.trades.get(position.entry_trade_id).await? {
            Some(entry) => entry.trade_value_usdt,
            None => {
                position.entry_price * position.quantity
                    / Decimal::from(position.leverage.max(1))
            }
        };
        let realized = position.pnl_at(exit_price);
        let liquidated = realized <= -reservation;
        let (status, reason, recorded_pnl) = if liquidated {
            (PositionStatus::Liquidated, CloseReason::Liquidation, -reservation)
        } else {
            (
                PositionStatus::Closed,
                CloseReason::ReconciliationExternalClose,
                realized,
            )
        };
        let refund = (reservation + recorded_pnl).max(Decimal::ZERO);

        let now = Utc::now();
        let exit_trade = Trade {
            id: Uuid::new_v4(),
            user_id: position.user_id,
            signal_id: None,
            whale_id: position.whale_id,
            venue: position.venue,
            market: position.market,
            symbol: position.symbol.clone(),
            side: match position.side {
                PositionSide::Long => TradeSide::Sell,
                PositionSide::Short => TradeSide::Buy,
            },
            order_type: OrderType::Market,
            requested_quantity: position.quantity,
            trade_value_usdt: reservation,
            leverage: Some(position.leverage),
            status: TradeStatus::Filled,
            // The exit happened venue-side without us; a marker id keeps
            // the fill traceable back to its position.
            venue_order_id: Some(format!("ext-{}", position.id.simple())),
            executed_price: Some(exit_price),
            executed_quantity: Some(position.quantity),
            fee: None,
            realized_pnl: Some(recorded_pnl),
            version: 0,
            created_at: now,
            executed_at: Some(now),
            error: None,
        };

        let mut tx = deps.pool.begin().await?;
        deps.users.lock_for_update(&mut tx, position.user_id).await?;
        deps.trades.insert_filled_tx(&mut tx, &exit_trade).await?;
        let closed = deps
            .positions
            .close_tx(
                &mut tx,
                position.id,
                position.version,
                status,
                Some(exit_trade.id),
                exit_price,
                recorded_pnl,
                reason,
            )
            .await?;
        if !closed {
            // Lost the version race; drop the synthetic trade with the tx.
            tx.rollback().await?;
            return Ok(());
        }
        deps.users
            .adjust_balances(&mut tx, position.user_id, refund, recorded_pnl)
            .await?;
        tx.commit().await?;

        warn!(
            position_id = %position.id,
            exit_trade_id = %exit_trade.id,
            exit_price = %exit_price,
            realized_pnl = %recorded_pnl,
            liquidated = liquidated,
            "position closed by external reconciliation"
        );
        if liquidated {
            deps.bus.publish(DomainEvent::PositionLiquidated {
                position_id: position.id,
                user_id: position.user_id,
            });
        } else {
            deps.bus.publish(DomainEvent::PositionClosed {
                position_id: position.id,
                user_id: position.user_id,
                close_reason: reason,
                realized_pnl: recorded_pnl,
            });
        }
        Ok(())
    }
}
