//! Domain types shared across the platform.

pub mod position;
pub mod signal;
pub mod trade;
pub mod user;
pub mod venue;
pub mod whale;

pub use position::{CloseReason, Position, PositionSide, PositionStatus};
pub use signal::{
    Confidence, Signal, SignalAction, SignalPriority, SignalSource, SignalStatus,
};
pub use trade::{OrderType, Trade, TradeSide, TradeStatus};
pub use user::{SubscriptionTier, TradingMode, User, UserSettings};
pub use venue::{
    AssetBalance, Market, OrderResult, OrderStatusReport, PositionSample, TraderScan,
    TraderSummary, Venue, VenueOrderState,
};
pub use whale::{DataStatus, Whale, WhaleFollow, WhaleKind};
