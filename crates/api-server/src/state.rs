//! Application state shared across handlers.

use std::sync::Arc;

use copytrade_core::db::{
    FollowRepository, PositionRepository, SignalRepository, TradeRepository, UserRepository,
    WhaleRepository,
};
use copytrade_core::dlq::DeadLetterQueue;
use trading_engine::CopyTradeEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CopyTradeEngine>,
    pub users: Arc<UserRepository>,
    pub whales: Arc<WhaleRepository>,
    pub follows: Arc<FollowRepository>,
    pub signals: Arc<SignalRepository>,
    pub trades: Arc<TradeRepository>,
    pub positions: Arc<PositionRepository>,
    pub dlq: Arc<DeadLetterQueue>,
}
