//! Bitget v2 adapter.
//!
//! Bitget peculiarities kept local: base64 HMAC signing with a passphrase
//! header (millisecond timestamps, unlike OKX's ISO form), the
//! `productType` tag (`USDT-FUTURES`/`COIN-FUTURES`), and hedge-mode
//! `holdSide`/`tradeSide` encoding where `side` names the position
//! direction rather than the order direction.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{VenueError, VenueResult};
use crate::types::{
    AssetBalance, Market, OrderResult, OrderStatusReport, PositionSample, PositionSide,
    TraderScan, TraderSummary, Venue, VenueOrderState,
};
use crate::venues::{
    ApiCredentials, CloseFuturesRequest, ExchangeAdapter, FuturesMarketRequest, OrderSide,
    SpotMarketRequest, StopLossRequest,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.bitget.com";

pub struct BitgetAdapter {
    base_url: String,
    http: reqwest::Client,
}

impl BitgetAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn product_type(market: Market) -> &'static str {
        match market {
            Market::UsdmFutures => "USDT-FUTURES",
            Market::CoinmFutures => "COIN-FUTURES",
            Market::Spot => "SPOT",
        }
    }

    fn hold_side(side: PositionSide) -> &'static str {
        match side {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    fn sign(creds: &ApiCredentials, timestamp: i64, method: &str, path: &str, body: &str) -> String {
        let to_sign = format!("{}{}{}{}", timestamp, method, path, body);
        let mut mac = HmacSha256::new_from_slice(creds.api_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(to_sign.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    async fn signed_request(
        &self,
        creds: &ApiCredentials,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> VenueResult<Value> {
        let passphrase = creds
            .passphrase
            .as_deref()
            .ok_or_else(|| VenueError::AuthFailure("Bitget requires a passphrase".into()))?;
        let timestamp = Utc::now().timestamp_millis();
        let payload = body.as_ref().map(Value::to_string).unwrap_or_default();
        let signature = Self::sign(creds, timestamp, method.as_str(), path, &payload);

        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("ACCESS-KEY", &creds.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", timestamp.to_string())
            .header("ACCESS-PASSPHRASE", passphrase)
            .header("Content-Type", "application/json");
        if !payload.is_empty() {
            request = request.body(payload);
        }
        let response = request.send().await.map_err(transport_error)?;
        decode_response(response).await
    }

    async fn public_get(&self, path_and_query: &str) -> VenueResult<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path_and_query))
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(response).await
    }

    async fn futures_fill(
        &self,
        creds: &ApiCredentials,
        symbol: &str,
        market: Market,
        client_order_id: &str,
        order_id: String,
    ) -> VenueResult<OrderResult> {
        let path = format!(
            "/api/v2/mix/order/detail?symbol={}&productType={}&clientOid={}",
            normalize_symbol(symbol),
            Self::product_type(market),
            client_order_id
        );
        let body = self
            .signed_request(creds, reqwest::Method::GET, &path, None)
            .await?;
        let row = body.get("data").cloned().unwrap_or(Value::Null);
        Ok(OrderResult {
            venue_order_id: order_id,
            filled_price: dec_field(&row, "priceAvg").unwrap_or(Decimal::ZERO),
            filled_quantity: dec_field(&row, "baseVolume").unwrap_or(Decimal::ZERO),
            fee: dec_field(&row, "fee").map(|f| f.abs()),
            raw_timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BitgetAdapter {
    fn venue(&self) -> Venue {
        Venue::Bitget
    }

    async fn place_spot_market(
        &self,
        creds: &ApiCredentials,
        req: &SpotMarketRequest,
    ) -> VenueResult<OrderResult> {
        // Bitget spot market buys are sized in quote currency, sells in base.
        let size = match (req.side, req.quantity, req.quote_quantity) {
            (OrderSide::Buy, _, Some(quote)) => quote,
            (OrderSide::Buy, Some(qty), None) => qty,
            (OrderSide::Sell, Some(qty), _) => qty,
            _ => {
                return Err(VenueError::InvalidOrder(
                    "spot market order needs quantity or quote_quantity".into(),
                ))
            }
        };
        let body = self
            .signed_request(
                creds,
                reqwest::Method::POST,
                "/api/v2/spot/trade/place-order",
                Some(json!({
                    "symbol": normalize_symbol(&req.symbol),
                    "side": req.side.as_lower(),
                    "orderType": "market",
                    "size": size.normalize().to_string(),
                    "clientOid": req.client_order_id,
                })),
            )
            .await?;
        let order_id = data_order_id(&body)?;

        let path = format!(
            "/api/v2/spot/trade/orderInfo?clientOid={}",
            req.client_order_id
        );
        let info = self
            .signed_request(creds, reqwest::Method::GET, &path, None)
            .await?;
        let row = info.pointer("/data/0").cloned().unwrap_or(Value::Null);
        Ok(OrderResult {
            venue_order_id: order_id,
            filled_price: dec_field(&row, "priceAvg").unwrap_or(Decimal::ZERO),
            filled_quantity: dec_field(&row, "baseVolume").unwrap_or(Decimal::ZERO),
            fee: None,
            raw_timestamp: Utc::now(),
        })
    }

    async fn place_futures_market(
        &self,
        creds: &ApiCredentials,
        req: &FuturesMarketRequest,
    ) -> VenueResult<OrderResult> {
        let body = self
            .signed_request(
                creds,
                reqwest::Method::POST,
                "/api/v2/mix/order/place-order",
                Some(json!({
                    "symbol": normalize_symbol(&req.symbol),
                    "productType": Self::product_type(req.market),
                    "marginMode": "crossed",
                    "marginCoin": "USDT",
                    // Hedge mode: side is the position direction.
                    "side": match req.side {
                        PositionSide::Long => "buy",
                        PositionSide::Short => "sell",
                    },
                    "tradeSide": if req.reduce_only { "close" } else { "open" },
                    "orderType": "market",
                    "size": req.quantity.normalize().to_string(),
                    "clientOid": req.client_order_id,
                })),
            )
            .await?;
        let order_id = data_order_id(&body)?;
        self.futures_fill(creds, &req.symbol, req.market, &req.client_order_id, order_id)
            .await
    }

    async fn close_futures_position(
        &self,
        creds: &ApiCredentials,
        req: &CloseFuturesRequest,
    ) -> VenueResult<OrderResult> {
        let quantity = match req.quantity {
            Some(qty) => qty,
            None => {
                let positions = self.get_account_positions(creds, req.market).await?;
                positions
                    .iter()
                    .find(|p| p.symbol == normalize_symbol(&req.symbol) && p.side == req.side)
                    .map(|p| p.quantity)
                    .ok_or_else(|| VenueError::PositionNotFound(req.symbol.clone()))?
            }
        };
        self.place_futures_market(
            creds,
            &FuturesMarketRequest {
                symbol: req.symbol.clone(),
                side: req.side,
                quantity,
                market: req.market,
                client_order_id: req.client_order_id.clone(),
                reduce_only: true,
            },
        )
        .await
    }

    async fn set_leverage(
        &self,
        creds: &ApiCredentials,
        symbol: &str,
        leverage: u32,
        market: Market,
    ) -> VenueResult<()> {
        if market == Market::Spot {
            return Err(VenueError::Unsupported);
        }
        self.signed_request(
            creds,
            reqwest::Method::POST,
            "/api/v2/mix/account/set-leverage",
            Some(json!({
                "symbol": normalize_symbol(symbol),
                "productType": Self::product_type(market),
                "marginCoin": "USDT",
                "leverage": leverage.to_string(),
            })),
        )
        .await?;
        Ok(())
    }

    async fn place_stop_loss(
        &self,
        creds: &ApiCredentials,
        req: &StopLossRequest,
    ) -> VenueResult<String> {
        if req.market == Market::Spot {
            return Err(VenueError::Unsupported);
        }
        let body = self
            .signed_request(
                creds,
                reqwest::Method::POST,
                "/api/v2/mix/order/place-tpsl-order",
                Some(json!({
                    "symbol": normalize_symbol(&req.symbol),
                    "productType": Self::product_type(req.market),
                    "marginCoin": "USDT",
                    "planType": "loss_plan",
                    "triggerPrice": req.stop_price.normalize().to_string(),
                    "holdSide": Self::hold_side(req.side),
                    "size": req.quantity.normalize().to_string(),
                    "clientOid": req.client_order_id,
                })),
            )
            .await?;
        data_order_id(&body)
    }

    async fn get_ticker(&self, symbol: &str, market: Market) -> VenueResult<Decimal> {
        let path = match market {
            Market::Spot => format!(
                "/api/v2/spot/market/tickers?symbol={}",
                normalize_symbol(symbol)
            ),
            _ => format!(
                "/api/v2/mix/market/ticker?symbol={}&productType={}",
                normalize_symbol(symbol),
                Self::product_type(market)
            ),
        };
        let body = self.public_get(&path).await?;
        body.pointer("/data/0")
            .and_then(|row| dec_field(row, "lastPr"))
            .ok_or_else(|| VenueError::Venue {
                code: "parse".into(),
                message: format!("no ticker for {}", symbol),
            })
    }

    async fn transfer_spot_to_futures(
        &self,
        creds: &ApiCredentials,
        asset: &str,
        amount: Decimal,
    ) -> VenueResult<()> {
        self.signed_request(
            creds,
            reqwest::Method::POST,
            "/api/v2/spot/wallet/transfer",
            Some(json!({
                "fromType": "spot",
                "toType": "usdt_futures",
                "coin": asset.to_uppercase(),
                "amount": amount.normalize().to_string(),
            })),
        )
        .await?;
        Ok(())
    }

    async fn get_balances(&self, creds: &ApiCredentials) -> VenueResult<Vec<AssetBalance>> {
        let body = self
            .signed_request(
                creds,
                reqwest::Method::GET,
                "/api/v2/spot/account/assets",
                None,
            )
            .await?;
        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(AssetBalance {
                    asset: row.get("coin")?.as_str()?.to_string(),
                    free: dec_field(row, "available")?,
                    locked: dec_field(row, "frozen").unwrap_or(Decimal::ZERO),
                })
            })
            .collect())
    }

    async fn get_account_positions(
        &self,
        creds: &ApiCredentials,
        market: Market,
    ) -> VenueResult<Vec<PositionSample>> {
        if market == Market::Spot {
            return Ok(Vec::new());
        }
        let path = format!(
            "/api/v2/mix/position/all-position?productType={}&marginCoin=USDT",
            Self::product_type(market)
        );
        let body = self
            .signed_request(creds, reqwest::Method::GET, &path, None)
            .await?;
        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                let total = dec_field(row, "total")?;
                if total.is_zero() {
                    return None;
                }
                Some(PositionSample {
                    symbol: row.get("symbol")?.as_str()?.to_string(),
                    market,
                    side: match row.get("holdSide").and_then(Value::as_str) {
                        Some("short") => PositionSide::Short,
                        _ => PositionSide::Long,
                    },
                    quantity: total,
                    entry_price: dec_field(row, "openPriceAvg").unwrap_or(Decimal::ZERO),
                    leverage: dec_field(row, "leverage").and_then(|l| l.to_u32()),
                    roe: None,
                })
            })
            .collect())
    }

    async fn get_order_status(
        &self,
        creds: &ApiCredentials,
        symbol: &str,
        client_order_id: &str,
        market: Market,
    ) -> VenueResult<Option<OrderStatusReport>> {
        let path = match market {
            Market::Spot => format!("/api/v2/spot/trade/orderInfo?clientOid={}", client_order_id),
            _ => format!(
                "/api/v2/mix/order/detail?symbol={}&productType={}&clientOid={}",
                normalize_symbol(symbol),
                Self::product_type(market),
                client_order_id
            ),
        };
        let result = self
            .signed_request(creds, reqwest::Method::GET, &path, None)
            .await;
        let body = match result {
            Ok(body) => body,
            // 40034: order not found.
            Err(VenueError::Venue { code, .. }) if code == "40034" => return Ok(None),
            Err(err) => return Err(err),
        };
        let row = body
            .pointer("/data/0")
            .or_else(|| body.get("data"))
            .cloned()
            .unwrap_or(Value::Null);
        if row.is_null() {
            return Ok(None);
        }
        let state = match row
            .get("status")
            .or_else(|| row.get("state"))
            .and_then(Value::as_str)
            .unwrap_or("")
        {
            "filled" => VenueOrderState::Filled,
            "partially_filled" => VenueOrderState::PartiallyFilled,
            "live" | "new" | "init" => VenueOrderState::Open,
            "cancelled" | "canceled" => VenueOrderState::Cancelled,
            "" => return Ok(None),
            other => {
                return Err(VenueError::Venue {
                    code: "parse".into(),
                    message: format!("unknown order status {:?}", other),
                })
            }
        };
        Ok(Some(OrderStatusReport {
            venue_order_id: row
                .get("orderId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            state,
            filled_price: dec_field(&row, "priceAvg"),
            filled_quantity: dec_field(&row, "baseVolume"),
            fee: dec_field(&row, "fee").map(|f| f.abs()),
        }))
    }

    async fn get_open_positions_of_trader(
        &self,
        venue_uid: &str,
        market: Market,
    ) -> VenueResult<TraderScan> {
        if market != Market::UsdmFutures {
            return Ok(TraderScan::Empty);
        }
        // Unsigned endpoint: auth-shaped rejections mean a gated profile.
        let body = match self
            .public_get(&format!(
                "/api/v2/copy/mix-trader/public-current-positions?traderId={}",
                venue_uid
            ))
            .await
        {
            Ok(body) => body,
            Err(VenueError::AuthFailure(_)) => return Ok(TraderScan::Empty),
            Err(err) => return Err(err),
        };
        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if rows.is_empty() {
            return Ok(TraderScan::Empty);
        }
        let samples = rows
            .iter()
            .filter_map(|row| {
                let size = dec_field(row, "openSize").or_else(|| dec_field(row, "total"))?;
                if size.is_zero() {
                    return None;
                }
                Some(PositionSample {
                    symbol: row.get("symbol")?.as_str()?.to_string(),
                    market,
                    side: match row.get("holdSide").and_then(Value::as_str) {
                        Some("short") => PositionSide::Short,
                        _ => PositionSide::Long,
                    },
                    quantity: size,
                    entry_price: dec_field(row, "openPriceAvg").unwrap_or(Decimal::ZERO),
                    leverage: dec_field(row, "leverage").and_then(|l| l.to_u32()),
                    roe: None,
                })
            })
            .collect::<Vec<_>>();
        if samples.is_empty() {
            Ok(TraderScan::Empty)
        } else {
            Ok(TraderScan::Samples(samples))
        }
    }

    async fn get_leaderboard(
        &self,
        market: Market,
        page: u32,
    ) -> VenueResult<Vec<TraderSummary>> {
        if market != Market::UsdmFutures {
            return Ok(Vec::new());
        }
        let body = self
            .public_get(&format!(
                "/api/v2/copy/mix-trader/public-trader-list?pageNo={}&pageSize=20",
                page
            ))
            .await?;
        let rows = body
            .pointer("/data/list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(TraderSummary {
                    venue: Venue::Bitget,
                    venue_uid: row.get("traderId")?.as_str()?.to_string(),
                    display_name: row
                        .get("traderName")
                        .and_then(Value::as_str)
                        .map(String::from),
                    roi: dec_field(row, "roi"),
                    pnl: dec_field(row, "totalPnl"),
                    follower_count: row
                        .get("followerCount")
                        .and_then(Value::as_i64)
                        .and_then(|n| u32::try_from(n).ok()),
                })
            })
            .collect())
    }
}

/// Bitget symbols are plain concatenation.
fn normalize_symbol(symbol: &str) -> String {
    symbol.replace(['-', '/', '_'], "").to_uppercase()
}

fn transport_error(err: reqwest::Error) -> VenueError {
    VenueError::RetryableNetwork(err.to_string())
}

fn dec_field(value: &Value, key: &str) -> Option<Decimal> {
    match value.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Decimal::from_str(s).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn data_order_id(body: &Value) -> VenueResult<String> {
    body.pointer("/data/orderId")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| VenueError::Venue {
            code: "parse".into(),
            message: "order response missing orderId".into(),
        })
}

async fn decode_response(response: reqwest::Response) -> VenueResult<Value> {
    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(VenueError::RateLimited { retry_after_secs: retry_after });
    }
    if status.is_server_error() {
        return Err(VenueError::RetryableNetwork(format!("bitget {}", status)));
    }
    let body: Value = response.json().await.map_err(transport_error)?;
    let code = body.get("code").and_then(Value::as_str).unwrap_or("00000");
    if code == "00000" {
        return Ok(body);
    }
    let message = body
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Err(match code {
        "40037" | "40018" | "40006" | "40012" => VenueError::AuthFailure(message),
        "429" | "40429" => VenueError::RateLimited { retry_after_secs: None },
        "43012" | "40754" => VenueError::InsufficientBalance,
        "40019" | "40020" | "45110" => VenueError::InvalidOrder(message),
        "40797" => VenueError::InvalidLeverage(message),
        other => VenueError::Venue { code: other.to_string(), message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_normalization() {
        assert_eq!(normalize_symbol("BTC-USDT"), "BTCUSDT");
        assert_eq!(normalize_symbol("btcusdt"), "BTCUSDT");
    }

    #[test]
    fn hold_side_encoding() {
        assert_eq!(BitgetAdapter::hold_side(PositionSide::Long), "long");
        assert_eq!(BitgetAdapter::hold_side(PositionSide::Short), "short");
    }

    #[test]
    fn signature_differs_by_path() {
        let creds = ApiCredentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
            passphrase: Some("phrase".into()),
        };
        let a = BitgetAdapter::sign(&creds, 1_700_000_000_000, "GET", "/api/v2/spot/account/assets", "");
        let b = BitgetAdapter::sign(&creds, 1_700_000_000_000, "GET", "/api/v2/mix/position/all-position", "");
        assert_ne!(a, b);
    }
}
