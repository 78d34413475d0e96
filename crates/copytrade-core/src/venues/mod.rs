//! Venue adapters.
//!
//! Each venue module normalizes one exchange's REST surface to the
//! [`ExchangeAdapter`] contract. Venue peculiarities (symbol formats, side
//! encodings, time sync, passphrases, hedge-mode indexes) stay inside the
//! adapter; the rest of the system only ever names a [`Venue`] tag.

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod okx;
pub mod resilience;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{VenueError, VenueResult};
use crate::types::{
    AssetBalance, Market, OrderResult, OrderStatusReport, PositionSide, TraderScan,
    TraderSummary, Venue,
};

pub use resilience::{CircuitState, Resilience, ResilienceConfig};

/// Decrypted API credentials for one (user, venue) pair.
///
/// Produced by the credential provider; never logged, never persisted here.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    /// OKX and Bitget require a passphrase alongside the key pair.
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Redacted: credentials must never reach logs.
        f.debug_struct("ApiCredentials").finish_non_exhaustive()
    }
}

/// Spot market order request.
#[derive(Debug, Clone)]
pub struct SpotMarketRequest {
    pub symbol: String,
    pub side: OrderSide,
    /// Base-asset quantity. Exactly one of `quantity`/`quote_quantity` is set.
    pub quantity: Option<Decimal>,
    /// Quote-asset (USDT) amount to spend.
    pub quote_quantity: Option<Decimal>,
    pub client_order_id: String,
}

/// Futures market order request.
#[derive(Debug, Clone)]
pub struct FuturesMarketRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub market: Market,
    pub client_order_id: String,
    pub reduce_only: bool,
}

/// Close an open futures position (market order, reduce-only).
#[derive(Debug, Clone)]
pub struct CloseFuturesRequest {
    pub symbol: String,
    pub side: PositionSide,
    /// Quantity to close; `None` closes the whole position.
    pub quantity: Option<Decimal>,
    pub market: Market,
    pub client_order_id: String,
}

/// Stop-loss order request.
#[derive(Debug, Clone)]
pub struct StopLossRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub stop_price: Decimal,
    pub market: Market,
    pub client_order_id: String,
}

/// Buy/sell direction at the venue boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_upper(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn as_lower(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Venue-neutral exchange contract.
///
/// All operations are async and may block on I/O; every call site goes
/// through the resilience wrapper.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    async fn place_spot_market(
        &self,
        creds: &ApiCredentials,
        req: &SpotMarketRequest,
    ) -> VenueResult<OrderResult>;

    async fn place_futures_market(
        &self,
        creds: &ApiCredentials,
        req: &FuturesMarketRequest,
    ) -> VenueResult<OrderResult>;

    async fn close_futures_position(
        &self,
        creds: &ApiCredentials,
        req: &CloseFuturesRequest,
    ) -> VenueResult<OrderResult>;

    /// Idempotent: setting the current leverage again succeeds.
    async fn set_leverage(
        &self,
        creds: &ApiCredentials,
        symbol: &str,
        leverage: u32,
        market: Market,
    ) -> VenueResult<()>;

    /// Returns the venue stop order id, or `Unsupported` when the venue has
    /// no server-side stop orders (the position monitor triggers locally).
    async fn place_stop_loss(
        &self,
        creds: &ApiCredentials,
        req: &StopLossRequest,
    ) -> VenueResult<String>;

    async fn get_ticker(&self, symbol: &str, market: Market) -> VenueResult<Decimal>;

    async fn get_balances(&self, creds: &ApiCredentials) -> VenueResult<Vec<AssetBalance>>;

    /// Fund the futures wallet from the spot wallet. `Unsupported` when the
    /// venue has no internal transfers (unified accounts need none).
    async fn transfer_spot_to_futures(
        &self,
        creds: &ApiCredentials,
        asset: &str,
        amount: Decimal,
    ) -> VenueResult<()> {
        let _ = (creds, asset, amount);
        Err(VenueError::Unsupported)
    }

    /// The follower's own open positions, for reconciliation.
    async fn get_account_positions(
        &self,
        creds: &ApiCredentials,
        market: Market,
    ) -> VenueResult<Vec<crate::types::PositionSample>>;

    /// Look up an order by the client order id we attached at placement.
    async fn get_order_status(
        &self,
        creds: &ApiCredentials,
        symbol: &str,
        client_order_id: &str,
        market: Market,
    ) -> VenueResult<Option<OrderStatusReport>>;

    /// PUBLIC leaderboard data for one trader. `Empty` means the venue
    /// answered with no shared positions; auth/throttle failures are errors.
    async fn get_open_positions_of_trader(
        &self,
        venue_uid: &str,
        market: Market,
    ) -> VenueResult<TraderScan>;

    async fn get_leaderboard(
        &self,
        market: Market,
        page: u32,
    ) -> VenueResult<Vec<TraderSummary>>;

    /// Whether the venue accepts server-side stop orders.
    fn supports_stop_orders(&self) -> bool {
        true
    }
}

/// Registry of adapters, one per configured venue.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Venue, Arc<dyn ExchangeAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All four production adapters with default endpoints.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(binance::BinanceAdapter::new(None)));
        registry.register(Arc::new(bybit::BybitAdapter::new(None)));
        registry.register(Arc::new(okx::OkxAdapter::new(None)));
        registry.register(Arc::new(bitget::BitgetAdapter::new(None)));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ExchangeAdapter>) {
        self.adapters.insert(adapter.venue(), adapter);
    }

    pub fn get(&self, venue: Venue) -> Option<Arc<dyn ExchangeAdapter>> {
        self.adapters.get(&venue).cloned()
    }

    pub fn venues(&self) -> Vec<Venue> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn registry_dispatches_by_venue() {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_venue().return_const(Venue::Okx);
        mock.expect_get_ticker()
            .returning(|_, _| Ok(Decimal::new(42, 0)));

        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(mock));

        assert!(registry.get(Venue::Binance).is_none());
        let adapter = registry.get(Venue::Okx).expect("registered adapter");
        let price = adapter.get_ticker("BTCUSDT", Market::Spot).await.unwrap();
        assert_eq!(price, Decimal::new(42, 0));
    }

    #[test]
    fn default_registry_covers_all_venues() {
        let registry = AdapterRegistry::with_defaults();
        for venue in [Venue::Binance, Venue::Bybit, Venue::Okx, Venue::Bitget] {
            assert!(registry.get(venue).is_some());
        }
    }
}
