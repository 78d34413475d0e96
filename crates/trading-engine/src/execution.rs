//! Per-follower two-phase execution.
//!
//! Phase 1 reserves the trade value from the user's available balance in a
//! local transaction; the venue call runs outside any transaction; Phase 2
//! settles or refunds in a second transaction. After a crash the only
//! durable in-flight state is a PENDING or EXECUTING trade, which the
//! reconciler resolves through the deterministic client order id.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use copytrade_core::config::AppConfig;
use copytrade_core::error::VenueError;
use copytrade_core::events::{DomainEvent, EventBuffer};
use copytrade_core::types::{
    CloseReason, Market, OrderResult, OrderType, Position, PositionSide, PositionStatus,
    Signal, SignalAction, Trade, TradeSide, TradeStatus, UserSettings, Venue, WhaleFollow,
};
use copytrade_core::venues::{
    ApiCredentials, CloseFuturesRequest, ExchangeAdapter, FuturesMarketRequest, OrderSide,
    SpotMarketRequest, StopLossRequest,
};
use copytrade_core::{Error, Result};
use risk_manager::{resolve_leverage, resolve_trade_size, RiskContext, TierLimits};

use crate::engine::{CopyTradeEngine, FollowerOutcome};

/// Whether Phase 1 deducted a reservation for this trade.
///
/// Opening trades reserve (futures LONG/SHORT, spot BUY); closing trades
/// (futures BUY/SELL, spot SELL) settle an existing position and reserve
/// nothing. Rollback and reconciliation key their refunds on this.
pub(crate) fn trade_reserves_balance(trade: &Trade) -> bool {
    match trade.market {
        Market::Spot => trade.side == TradeSide::Buy,
        _ => matches!(trade.side, TradeSide::Long | TradeSide::Short),
    }
}

impl CopyTradeEngine {
    /// Execute one signal for one follower.
    pub(crate) async fn execute_follower(
        &self,
        signal: &Signal,
        follow: &WhaleFollow,
        size_override: Option<Decimal>,
        venue_override: Option<Venue>,
    ) -> Result<FollowerOutcome> {
        let settings = self
            .deps
            .users
            .get_settings(follow.user_id)
            .await?
            .unwrap_or_else(|| UserSettings::defaults_for(follow.user_id));
        let venue = venue_override.unwrap_or(settings.preferred_venue);

        if signal.is_close {
            let position = self
                .deps
                .positions
                .get_open_by_whale_symbol(follow.user_id, signal.whale_id, &signal.symbol)
                .await?;
            match position {
                Some(position) => {
                    self.close_position_inner(position, CloseReason::WhaleExit, Some(signal.id))
                        .await
                }
                None => Ok(FollowerOutcome::Skipped {
                    reason: "no open position for whale exit".into(),
                }),
            }
        } else {
            self.execute_open(signal, follow, &settings, venue, size_override)
                .await
        }
    }

    async fn execute_open(
        &self,
        signal: &Signal,
        follow: &WhaleFollow,
        settings: &UserSettings,
        venue: Venue,
        size_override: Option<Decimal>,
    ) -> Result<FollowerOutcome> {
        use copytrade_core::types::TradingMode;

        let market = signal.market;
        if market.is_futures() && settings.trading_mode == TradingMode::Spot {
            return Ok(FollowerOutcome::Skipped {
                reason: "futures disabled by trading mode".into(),
            });
        }
        if market == Market::Spot && signal.action == SignalAction::Sell {
            return Ok(FollowerOutcome::Skipped {
                reason: "spot cannot open a short".into(),
            });
        }

        let creds = match self.deps.credentials.resolve(follow.user_id, venue).await? {
            Some(creds) => creds,
            None => {
                return Ok(FollowerOutcome::Skipped {
                    reason: format!("no credentials for {}", venue),
                })
            }
        };
        let adapter = match self.deps.adapters.get(venue) {
            Some(adapter) => adapter,
            None => {
                return Ok(FollowerOutcome::Skipped {
                    reason: format!("no adapter for {}", venue),
                })
            }
        };

        // Price first: the venue call cannot happen inside Phase 1.
        let price = match signal.price_at_signal {
            Some(price) if price > Decimal::ZERO => price,
            _ => {
                let symbol = signal.symbol.clone();
                self.deps
                    .resilience
                    .call(venue, "public", || {
                        let adapter = adapter.clone();
                        let symbol = symbol.clone();
                        async move { adapter.get_ticker(&symbol, market).await }
                    })
                    .await
                    .map_err(Error::Venue)?
            }
        };
        if price <= Decimal::ZERO {
            return Ok(FollowerOutcome::Failed {
                error: format!("no price for {}", signal.symbol),
            });
        }

        // Inputs the policy needs but the lock must not wait for.
        let day_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        let daily_pnl = self
            .deps
            .trades
            .realized_pnl_since(follow.user_id, day_start)
            .await?;
        let open_positions = self
            .deps
            .positions
            .count_open_by_user(follow.user_id)
            .await?;
        if self
            .deps
            .positions
            .get_open_for_key(follow.user_id, venue, &signal.symbol, market)
            .await?
            .is_some()
        {
            return Ok(FollowerOutcome::Skipped {
                reason: "position already open for symbol".into(),
            });
        }

        // ---- Phase 1: RESERVE ----
        let mut tx = self.deps.pool.begin().await?;
        let user = self.deps.users.lock_for_update(&mut tx, follow.user_id).await?;

        let requested_size =
            size_override.unwrap_or_else(|| resolve_trade_size(follow, settings, user.available_balance));
        let requested_leverage = resolve_leverage(
            follow,
            settings,
            signal.whale_leverage,
            market,
            AppConfig::venue_leverage_cap(venue, market),
        );
        let ctx = RiskContext {
            available_balance: user.available_balance,
            open_positions,
            daily_realized_pnl: daily_pnl,
        };
        let verdict = self.deps.risk.check(
            &user,
            settings,
            &TierLimits::for_tier(user.effective_tier()),
            venue,
            market,
            requested_size,
            requested_leverage,
            &ctx,
        );
        if !verdict.allowed {
            // Dropping the transaction rolls the lock back; no Trade row.
            return Ok(FollowerOutcome::RiskRejected {
                reason: verdict.reason.unwrap_or_else(|| "risk rejected".into()),
            });
        }
        for warning in &verdict.warnings {
            info!(user_id = %follow.user_id, warning = %warning, "risk warning");
        }
        let size = verdict.adjusted_size_usdt;
        let leverage = verdict.leverage;

        let quantity = (size * Decimal::from(leverage) / price).round_dp(6);
        if quantity <= Decimal::ZERO {
            return Ok(FollowerOutcome::RiskRejected {
                reason: "quantity rounds to zero".into(),
            });
        }

        let side = match (market, signal.action) {
            (Market::Spot, _) => TradeSide::Buy,
            (_, SignalAction::Buy) => TradeSide::Long,
            (_, SignalAction::Sell) => TradeSide::Short,
        };
        let trade = Trade {
            id: Uuid::new_v4(),
            user_id: follow.user_id,
            signal_id: Some(signal.id),
            whale_id: Some(signal.whale_id),
            venue,
            market,
            symbol: signal.symbol.clone(),
            side,
            order_type: OrderType::Market,
            requested_quantity: quantity,
            trade_value_usdt: size,
            leverage: Some(leverage),
            status: TradeStatus::Pending,
            venue_order_id: None,
            executed_price: None,
            executed_quantity: None,
            fee: None,
            realized_pnl: None,
            version: 0,
            created_at: Utc::now(),
            executed_at: None,
            error: None,
        };
        self.deps.trades.insert_tx(&mut tx, &trade).await?;
        self.deps
            .users
            .adjust_balances(&mut tx, follow.user_id, -size, Decimal::ZERO)
            .await?;
        tx.commit().await?;

        // ---- Venue call, no enclosing transaction ----
        if !self
            .deps
            .trades
            .try_transition(trade.id, TradeStatus::Pending, TradeStatus::Executing, 0)
            .await?
        {
            // The reconciler got here first (crash replay); leave it alone.
            return Ok(FollowerOutcome::Skipped {
                reason: "trade claimed by reconciler".into(),
            });
        }
        let version = 1i64;
        let scope = format!("user:{}", follow.user_id.simple());

        if market.is_futures() {
            let lev_result = self
                .deps
                .resilience
                .call(venue, &scope, || {
                    let adapter = adapter.clone();
                    let creds = creds.clone();
                    let symbol = signal.symbol.clone();
                    async move { adapter.set_leverage(&creds, &symbol, leverage, market).await }
                })
                .await;
            match lev_result {
                Ok(()) | Err(VenueError::Unsupported) => {}
                Err(err) => {
                    // No order was placed yet; a leverage failure is a clean
                    // rollback whatever its class.
                    self.rollback_trade(&trade.id, version, &err.to_string()).await?;
                    return Ok(FollowerOutcome::Failed {
                        error: format!("set_leverage: {}", err),
                    });
                }
            }
        }

        let mut order_result = self
            .place_market_order(&adapter, &creds, &scope, signal, &trade, quantity, size)
            .await;

        // A futures wallet short on margin may be fundable from spot; top it
        // up once and retry before giving up.
        if market.is_futures()
            && matches!(&order_result, Err(VenueError::InsufficientBalance))
        {
            let funded = self
                .deps
                .resilience
                .call(venue, &scope, || {
                    let adapter = adapter.clone();
                    let creds = creds.clone();
                    async move { adapter.transfer_spot_to_futures(&creds, "USDT", size).await }
                })
                .await;
            match funded {
                Ok(()) => {
                    info!(
                        user_id = %follow.user_id,
                        amount = %size,
                        "funded futures wallet from spot, retrying order"
                    );
                    order_result = self
                        .place_market_order(&adapter, &creds, &scope, signal, &trade, quantity, size)
                        .await;
                }
                Err(VenueError::Unsupported) => {}
                Err(err) => {
                    warn!(user_id = %follow.user_id, error = %err, "spot to futures transfer failed");
                }
            }
        }

        match order_result {
            Ok(result) => {
                let outcome = self
                    .settle_filled_open(&trade, version, &result, Some(follow), settings)
                    .await?;
                Ok(outcome)
            }
            Err(err) => self.handle_open_failure(&trade, version, err).await,
        }
    }

    async fn place_market_order(
        &self,
        adapter: &std::sync::Arc<dyn ExchangeAdapter>,
        creds: &ApiCredentials,
        scope: &str,
        signal: &Signal,
        trade: &Trade,
        quantity: Decimal,
        quote_size: Decimal,
    ) -> std::result::Result<OrderResult, VenueError> {
        let client_order_id = trade.client_order_id();
        if trade.market == Market::Spot {
            let req = SpotMarketRequest {
                symbol: signal.symbol.clone(),
                side: OrderSide::Buy,
                quantity: None,
                quote_quantity: Some(quote_size),
                client_order_id,
            };
            self.deps
                .resilience
                .call(trade.venue, scope, || {
                    let adapter = adapter.clone();
                    let creds = creds.clone();
                    let req = req.clone();
                    async move { adapter.place_spot_market(&creds, &req).await }
                })
                .await
        } else {
            let req = FuturesMarketRequest {
                symbol: signal.symbol.clone(),
                side: trade.side.position_side(),
                quantity,
                market: trade.market,
                client_order_id,
                reduce_only: false,
            };
            self.deps
                .resilience
                .call(trade.venue, scope, || {
                    let adapter = adapter.clone();
                    let creds = creds.clone();
                    let req = req.clone();
                    async move { adapter.place_futures_market(&creds, &req).await }
                })
                .await
        }
    }

    /// Classify a failed place-order call into rollback vs reconciliation.
    async fn handle_open_failure(
        &self,
        trade: &Trade,
        version: i64,
        err: VenueError,
    ) -> Result<FollowerOutcome> {
        match &err {
            // The wrapper failed fast; the request never left the process.
            VenueError::CircuitOpen { .. } => {
                self.rollback_trade(&trade.id, version, "venue unavailable (circuit open)")
                    .await?;
                Ok(FollowerOutcome::Failed {
                    error: "venue unavailable".into(),
                })
            }
            // 429 means the venue rejected the request before matching.
            VenueError::RateLimited { .. } => {
                self.rollback_trade(&trade.id, version, &err.to_string()).await?;
                Ok(FollowerOutcome::Failed { error: err.to_string() })
            }
            // Transport errors after the last retry are an unknown outcome:
            // the order may be live at the venue. Park for the reconciler.
            VenueError::RetryableNetwork(_) => {
                self.deps
                    .trades
                    .mark_needs_reconciliation(trade.id, version, &err.to_string())
                    .await?;
                warn!(trade_id = %trade.id, "order outcome unknown, queued for reconciliation");
                Ok(FollowerOutcome::Failed {
                    error: "order outcome unknown, reconciling".into(),
                })
            }
            // Terminal venue rejection: nothing was placed.
            _ => {
                self.rollback_trade(&trade.id, version, &err.to_string()).await?;
                Ok(FollowerOutcome::Failed { error: err.to_string() })
            }
        }
    }

    /// Phase 2 CONFIRM for an opening trade. Also used by the reconciler
    /// when a parked trade turns out to be filled (then without a follow).
    pub(crate) async fn settle_filled_open(
        &self,
        trade: &Trade,
        version: i64,
        result: &OrderResult,
        follow: Option<&WhaleFollow>,
        settings: &UserSettings,
    ) -> Result<FollowerOutcome> {
        let entry_price = if result.filled_price > Decimal::ZERO {
            result.filled_price
        } else {
            // Some venues fill market orders without reporting a price on
            // the create response; fall back to the requested terms.
            trade.trade_value_usdt * Decimal::from(trade.leverage.unwrap_or(1))
                / trade.requested_quantity.max(Decimal::new(1, 6))
        };
        let quantity = if result.filled_quantity > Decimal::ZERO {
            result.filled_quantity
        } else {
            trade.requested_quantity
        };
        let side = trade.side.position_side();
        let leverage = trade.leverage.unwrap_or(1);

        let sl_pct = follow
            .and_then(|f| f.stop_loss_percent)
            .or(if settings.stop_loss_percent > Decimal::ZERO {
                Some(settings.stop_loss_percent)
            } else {
                None
            });
        let tp_pct = follow
            .and_then(|f| f.take_profit_percent)
            .or(settings.take_profit_percent);
        let stop_loss_price = sl_pct.map(|pct| stop_price(entry_price, side, pct));
        let take_profit_price = tp_pct.map(|pct| target_price(entry_price, side, pct));

        let position = Position {
            id: Uuid::new_v4(),
            user_id: trade.user_id,
            whale_id: trade.whale_id,
            entry_trade_id: trade.id,
            exit_trade_id: None,
            venue: trade.venue,
            market: trade.market,
            symbol: trade.symbol.clone(),
            side,
            leverage,
            entry_price,
            current_price: Some(entry_price),
            exit_price: None,
            quantity,
            stop_loss_price,
            stop_loss_order_id: None,
            take_profit_price,
            take_profit_order_id: None,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            close_reason: None,
            version: 0,
            opened_at: Utc::now(),
            closed_at: None,
        };

        let mut events = EventBuffer::new();
        let mut tx = self.deps.pool.begin().await?;
        self.deps.users.lock_for_update(&mut tx, trade.user_id).await?;
        let updated = self
            .deps
            .trades
            .mark_filled_tx(
                &mut tx,
                trade.id,
                version,
                &result.venue_order_id,
                entry_price,
                quantity,
                result.fee,
                None,
            )
            .await?;
        if !updated {
            // Lost the version race; whoever won also settled.
            return Ok(FollowerOutcome::Skipped {
                reason: "trade settled elsewhere".into(),
            });
        }
        self.deps.positions.insert_tx(&mut tx, &position).await?;
        events.record(DomainEvent::TradeExecuted {
            trade_id: trade.id,
            user_id: trade.user_id,
            venue: trade.venue,
            symbol: trade.symbol.clone(),
            executed_price: entry_price,
            executed_quantity: quantity,
        });
        events.record(DomainEvent::PositionOpened {
            position_id: position.id,
            user_id: trade.user_id,
            symbol: trade.symbol.clone(),
            entry_price,
            quantity,
            leverage,
        });
        tx.commit().await?;
        events.flush(&self.deps.bus);

        if let Some(stop) = stop_loss_price {
            self.try_place_remote_stop(trade, &position, stop).await;
        }

        info!(
            trade_id = %trade.id,
            user_id = %trade.user_id,
            symbol = %trade.symbol,
            price = %entry_price,
            quantity = %quantity,
            "trade filled, position opened"
        );
        Ok(FollowerOutcome::Executed { trade_id: trade.id })
    }

    /// Best-effort remote stop placement; local triggering covers the rest.
    async fn try_place_remote_stop(&self, trade: &Trade, position: &Position, stop: Decimal) {
        let adapter = match self.deps.adapters.get(trade.venue) {
            Some(adapter) if adapter.supports_stop_orders() => adapter,
            _ => return,
        };
        let creds = match self.deps.credentials.resolve(trade.user_id, trade.venue).await {
            Ok(Some(creds)) => creds,
            _ => return,
        };
        let scope = format!("user:{}", trade.user_id.simple());
        let req = StopLossRequest {
            symbol: trade.symbol.clone(),
            side: position.side,
            quantity: position.quantity,
            stop_price: stop,
            market: trade.market,
            client_order_id: format!("{}sl", trade.client_order_id()),
        };
        let placed = self
            .deps
            .resilience
            .call(trade.venue, &scope, || {
                let adapter = adapter.clone();
                let creds = creds.clone();
                let req = req.clone();
                async move { adapter.place_stop_loss(&creds, &req).await }
            })
            .await;
        match placed {
            Ok(order_id) => {
                if let Err(err) = self
                    .deps
                    .positions
                    .set_stop_order(position.id, stop, Some(&order_id))
                    .await
                {
                    error!(position_id = %position.id, error = %err, "failed to record stop order");
                }
            }
            Err(VenueError::Unsupported) => {
                // Recorded stop price stays; the monitor triggers locally.
            }
            Err(err) => {
                warn!(
                    position_id = %position.id,
                    error = %err,
                    "remote stop placement failed, falling back to local trigger"
                );
            }
        }
    }

    /// Phase 2 ROLLBACK: fail the trade and refund the Phase-1 reservation
    /// exactly once. The conditional status update is what makes the refund
    /// exactly-once: a second rollback finds the trade already FAILED and
    /// touches nothing.
    pub(crate) async fn rollback_trade(
        &self,
        trade_id: &Uuid,
        version: i64,
        error_text: &str,
    ) -> Result<()> {
        let trade = match self.deps.trades.get(*trade_id).await? {
            Some(trade) => trade,
            None => return Ok(()),
        };

        let mut tx = self.deps.pool.begin().await?;
        self.deps.users.lock_for_update(&mut tx, trade.user_id).await?;
        let updated = self
            .deps
            .trades
            .mark_failed_tx(&mut tx, trade.id, version, error_text)
            .await?;
        if updated && trade_reserves_balance(&trade) {
            self.deps
                .users
                .adjust_balances(&mut tx, trade.user_id, trade.trade_value_usdt, Decimal::ZERO)
                .await?;
        }
        tx.commit().await?;

        if updated {
            self.deps.bus.publish(DomainEvent::TradeFailed {
                trade_id: trade.id,
                user_id: trade.user_id,
                error: error_text.to_string(),
            });
            info!(trade_id = %trade.id, error = %error_text, "trade rolled back");
        }
        Ok(())
    }

    /// Close an open position through the engine (command API, whale-exit
    /// signals, stop-loss/take-profit triggers, reconciliation).
    pub async fn close_position(
        &self,
        user_id: Uuid,
        position_id: Uuid,
        reason: CloseReason,
    ) -> Result<FollowerOutcome> {
        use copytrade_core::cache::IdempotencyKey;

        let key = IdempotencyKey::ClosePosition { position_id };
        let claim = self
            .deps
            .idempotency
            .acquire(&key, self.deps.idem_config.close_position_ttl_secs)
            .await?;
        if claim.already_completed || !claim.acquired {
            return Ok(FollowerOutcome::Skipped {
                reason: "close already in progress or done".into(),
            });
        }

        let outcome = match self.deps.positions.get(position_id).await? {
            Some(position) if position.user_id == user_id => {
                if position.status == PositionStatus::Open {
                    self.close_position_inner(position, reason, None).await
                } else {
                    Ok(FollowerOutcome::Skipped {
                        reason: "position already closed".into(),
                    })
                }
            }
            Some(_) => Ok(FollowerOutcome::Skipped {
                reason: "position belongs to another user".into(),
            }),
            None => Ok(FollowerOutcome::Skipped {
                reason: "position not found".into(),
            }),
        };

        if let Ok(FollowerOutcome::Executed { trade_id }) = &outcome {
            self.deps
                .idempotency
                .mark_completed(&key, &serde_json::json!({ "trade_id": trade_id }).to_string())
                .await?;
        }
        self.deps.idempotency.release(&key).await?;
        outcome
    }

    /// The two-phase close. No reservation is taken: Phase 2 releases the
    /// entry reservation plus realized PnL on success.
    pub(crate) async fn close_position_inner(
        &self,
        position: Position,
        reason: CloseReason,
        signal_id: Option<Uuid>,
    ) -> Result<FollowerOutcome> {
        let creds = match self
            .deps
            .credentials
            .resolve(position.user_id, position.venue)
            .await?
        {
            Some(creds) => creds,
            None => {
                return Ok(FollowerOutcome::Skipped {
                    reason: format!("no credentials for {}", position.venue),
                })
            }
        };
        let adapter = match self.deps.adapters.get(position.venue) {
            Some(adapter) => adapter,
            None => {
                return Ok(FollowerOutcome::Skipped {
                    reason: format!("no adapter for {}", position.venue),
                })
            }
        };

        // The entry trade carries the reservation to release.
        let reservation = match self.deps.trades.get(position.entry_trade_id).await? {
            Some(entry) => entry.trade_value_usdt,
            None => {
                position.entry_price * position.quantity
                    / Decimal::from(position.leverage.max(1))
            }
        };

        // ---- Phase 1: record the closing trade (no reservation) ----
        let side = match position.side {
            PositionSide::Long => TradeSide::Sell,
            PositionSide::Short => TradeSide::Buy,
        };
        let trade = Trade {
            id: Uuid::new_v4(),
            user_id: position.user_id,
            signal_id,
            whale_id: position.whale_id,
            venue: position.venue,
            market: position.market,
            symbol: position.symbol.clone(),
            side,
            order_type: OrderType::Market,
            requested_quantity: position.quantity,
            trade_value_usdt: reservation,
            leverage: Some(position.leverage),
            status: TradeStatus::Pending,
            venue_order_id: None,
            executed_price: None,
            executed_quantity: None,
            fee: None,
            realized_pnl: None,
            version: 0,
            created_at: Utc::now(),
            executed_at: None,
            error: None,
        };
        let mut tx = self.deps.pool.begin().await?;
        self.deps
            .users
            .lock_for_update(&mut tx, position.user_id)
            .await?;
        self.deps.trades.insert_tx(&mut tx, &trade).await?;
        tx.commit().await?;

        if !self
            .deps
            .trades
            .try_transition(trade.id, TradeStatus::Pending, TradeStatus::Executing, 0)
            .await?
        {
            return Ok(FollowerOutcome::Skipped {
                reason: "close trade claimed by reconciler".into(),
            });
        }
        let version = 1i64;

        // ---- Venue call ----
        let scope = format!("user:{}", position.user_id.simple());
        let client_order_id = trade.client_order_id();
        let order_result = if position.market == Market::Spot {
            let req = SpotMarketRequest {
                symbol: position.symbol.clone(),
                side: OrderSide::Sell,
                quantity: Some(position.quantity),
                quote_quantity: None,
                client_order_id,
            };
            self.deps
                .resilience
                .call(position.venue, &scope, || {
                    let adapter = adapter.clone();
                    let creds = creds.clone();
                    let req = req.clone();
                    async move { adapter.place_spot_market(&creds, &req).await }
                })
                .await
        } else {
            let req = CloseFuturesRequest {
                symbol: position.symbol.clone(),
                side: position.side,
                quantity: Some(position.quantity),
                market: position.market,
                client_order_id,
            };
            self.deps
                .resilience
                .call(position.venue, &scope, || {
                    let adapter = adapter.clone();
                    let creds = creds.clone();
                    let req = req.clone();
                    async move { adapter.close_futures_position(&creds, &req).await }
                })
                .await
        };

        match order_result {
            Ok(result) => {
                self.settle_filled_close(&trade, version, &position, &result, reason, reservation)
                    .await
            }
            Err(VenueError::RetryableNetwork(message)) => {
                self.deps
                    .trades
                    .mark_needs_reconciliation(trade.id, version, &message)
                    .await?;
                warn!(trade_id = %trade.id, "close outcome unknown, queued for reconciliation");
                Ok(FollowerOutcome::Failed {
                    error: "close outcome unknown, reconciling".into(),
                })
            }
            Err(VenueError::PositionNotFound(_)) => {
                // Nothing to close at the venue: the external reconciler
                // owns this divergence. Fail the trade, keep the position.
                self.rollback_trade(&trade.id, version, "position not found at venue")
                    .await?;
                Ok(FollowerOutcome::Failed {
                    error: "position not found at venue".into(),
                })
            }
            Err(err) => {
                self.rollback_trade(&trade.id, version, &err.to_string()).await?;
                Ok(FollowerOutcome::Failed { error: err.to_string() })
            }
        }
    }

    /// Phase 2 CONFIRM for a closing trade: fill the trade, close the
    /// position, release reservation + PnL.
    pub(crate) async fn settle_filled_close(
        &self,
        trade: &Trade,
        version: i64,
        position: &Position,
        result: &OrderResult,
        reason: CloseReason,
        reservation: Decimal,
    ) -> Result<FollowerOutcome> {
        let exit_price = if result.filled_price > Decimal::ZERO {
            result.filled_price
        } else {
            position.current_price.unwrap_or(position.entry_price)
        };
        let realized_pnl = position.pnl_at(exit_price);

        let mut events = EventBuffer::new();
        let mut tx = self.deps.pool.begin().await?;
        self.deps
            .users
            .lock_for_update(&mut tx, position.user_id)
            .await?;
        let trade_updated = self
            .deps
            .trades
            .mark_filled_tx(
                &mut tx,
                trade.id,
                version,
                &result.venue_order_id,
                exit_price,
                if result.filled_quantity > Decimal::ZERO {
                    result.filled_quantity
                } else {
                    position.quantity
                },
                result.fee,
                Some(realized_pnl),
            )
            .await?;
        if !trade_updated {
            return Ok(FollowerOutcome::Skipped {
                reason: "close settled elsewhere".into(),
            });
        }
        let closed = self
            .deps
            .positions
            .close_tx(
                &mut tx,
                position.id,
                position.version,
                PositionStatus::Closed,
                Some(trade.id),
                exit_price,
                realized_pnl,
                reason,
            )
            .await?;
        if closed {
            self.deps
                .users
                .adjust_balances(
                    &mut tx,
                    position.user_id,
                    reservation + realized_pnl,
                    realized_pnl,
                )
                .await?;
            events.record(DomainEvent::TradeExecuted {
                trade_id: trade.id,
                user_id: trade.user_id,
                venue: trade.venue,
                symbol: trade.symbol.clone(),
                executed_price: exit_price,
                executed_quantity: position.quantity,
            });
            events.record(DomainEvent::PositionClosed {
                position_id: position.id,
                user_id: position.user_id,
                close_reason: reason,
                realized_pnl,
            });
        } else {
            // Someone closed the position between our read and this commit;
            // the venue fill is real, so keep the trade but flag the books.
            error!(
                position_id = %position.id,
                trade_id = %trade.id,
                "position version conflict after venue fill"
            );
            self.record_dead_letter(
                "settle_close_conflict",
                serde_json::json!({ "position_id": position.id, "trade_id": trade.id }),
                "position closed concurrently with a live venue fill",
            );
        }
        tx.commit().await?;
        events.flush(&self.deps.bus);

        if closed {
            info!(
                position_id = %position.id,
                exit_price = %exit_price,
                realized_pnl = %realized_pnl,
                reason = ?reason,
                "position closed"
            );
        }
        Ok(FollowerOutcome::Executed { trade_id: trade.id })
    }
}

/// Stop price below (LONG) or above (SHORT) the entry by `pct` percent.
fn stop_price(entry: Decimal, side: PositionSide, pct: Decimal) -> Decimal {
    let offset = entry * pct / Decimal::new(100, 0);
    match side {
        PositionSide::Long => entry - offset,
        PositionSide::Short => entry + offset,
    }
}

/// Take-profit price above (LONG) or below (SHORT) the entry.
fn target_price(entry: Decimal, side: PositionSide, pct: Decimal) -> Decimal {
    let offset = entry * pct / Decimal::new(100, 0);
    match side {
        PositionSide::Long => entry + offset,
        PositionSide::Short => entry - offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trade(market: Market, side: TradeSide) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            signal_id: None,
            whale_id: None,
            venue: Venue::Binance,
            market,
            symbol: "BTCUSDT".into(),
            side,
            order_type: OrderType::Market,
            requested_quantity: Decimal::ONE,
            trade_value_usdt: Decimal::new(100, 0),
            leverage: Some(10),
            status: TradeStatus::Pending,
            venue_order_id: None,
            executed_price: None,
            executed_quantity: None,
            fee: None,
            realized_pnl: None,
            version: 0,
            created_at: Utc::now(),
            executed_at: None,
            error: None,
        }
    }

    #[test]
    fn opening_trades_reserve_closing_trades_do_not() {
        assert!(trade_reserves_balance(&trade(Market::UsdmFutures, TradeSide::Long)));
        assert!(trade_reserves_balance(&trade(Market::UsdmFutures, TradeSide::Short)));
        assert!(trade_reserves_balance(&trade(Market::Spot, TradeSide::Buy)));

        assert!(!trade_reserves_balance(&trade(Market::UsdmFutures, TradeSide::Sell)));
        assert!(!trade_reserves_balance(&trade(Market::UsdmFutures, TradeSide::Buy)));
        assert!(!trade_reserves_balance(&trade(Market::Spot, TradeSide::Sell)));
    }

    #[test]
    fn stop_price_is_on_the_losing_side() {
        let entry = Decimal::new(50_000, 0);
        let pct = Decimal::new(5, 0);
        assert_eq!(
            stop_price(entry, PositionSide::Long, pct),
            Decimal::new(47_500, 0)
        );
        assert_eq!(
            stop_price(entry, PositionSide::Short, pct),
            Decimal::new(52_500, 0)
        );
    }

    #[test]
    fn target_price_is_on_the_winning_side() {
        let entry = Decimal::new(50_000, 0);
        let pct = Decimal::new(10, 0);
        assert_eq!(
            target_price(entry, PositionSide::Long, pct),
            Decimal::new(55_000, 0)
        );
        assert_eq!(
            target_price(entry, PositionSide::Short, pct),
            Decimal::new(45_000, 0)
        );
    }
}
