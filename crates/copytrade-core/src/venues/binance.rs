//! Binance adapter: spot, USD-M and COIN-M futures, plus the public
//! futures leaderboard.
//!
//! Binance peculiarities kept local to this module: HMAC-SHA256 query
//! signing with a cached server-time offset (signed futures calls reject
//! clients more than 1s off), the `bapi` leaderboard surface, and the
//! one-way position mode (closes are reduce-only orders on the opposite
//! side).

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

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

const DEFAULT_SPOT_URL: &str = "https://api.binance.com";
const DEFAULT_USDM_URL: &str = "https://fapi.binance.com";
const DEFAULT_COINM_URL: &str = "https://dapi.binance.com";
const DEFAULT_BAPI_URL: &str = "https://www.binance.com";

pub struct BinanceAdapter {
    spot_url: String,
    usdm_url: String,
    coinm_url: String,
    /// Web surface hosting the public leaderboard.
    bapi_url: String,
    http: reqwest::Client,
    /// Milliseconds to add to local time in signed requests.
    time_offset_ms: AtomicI64,
}

impl BinanceAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        let base = base_url.clone();
        Self {
            spot_url: base.clone().unwrap_or_else(|| DEFAULT_SPOT_URL.to_string()),
            usdm_url: base.clone().unwrap_or_else(|| DEFAULT_USDM_URL.to_string()),
            coinm_url: base.clone().unwrap_or_else(|| DEFAULT_COINM_URL.to_string()),
            bapi_url: base.unwrap_or_else(|| DEFAULT_BAPI_URL.to_string()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            time_offset_ms: AtomicI64::new(0),
        }
    }

    /// Refresh the cached server-time offset. Called once on startup and
    /// again whenever the venue rejects a timestamp.
    pub async fn sync_time(&self) -> VenueResult<()> {
        let url = format!("{}/fapi/v1/time", self.usdm_url);
        let body: Value = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(transport_error)?;
        if let Some(server_time) = body.get("serverTime").and_then(Value::as_i64) {
            let offset = server_time - Utc::now().timestamp_millis();
            self.time_offset_ms.store(offset, Ordering::Relaxed);
            debug!(offset_ms = offset, "synced binance server time");
        }
        Ok(())
    }

    fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    fn base_for(&self, market: Market) -> &str {
        match market {
            Market::Spot => &self.spot_url,
            Market::UsdmFutures => &self.usdm_url,
            Market::CoinmFutures => &self.coinm_url,
        }
    }

    fn order_path(market: Market) -> &'static str {
        match market {
            Market::Spot => "/api/v3/order",
            Market::UsdmFutures => "/fapi/v1/order",
            Market::CoinmFutures => "/dapi/v1/order",
        }
    }

    fn sign(secret: &str, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed_request(
        &self,
        creds: &ApiCredentials,
        method: reqwest::Method,
        base: &str,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> VenueResult<Value> {
        params.push(("timestamp".to_string(), self.timestamp_ms().to_string()));
        params.push(("recvWindow".to_string(), "5000".to_string()));
        let query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let signature = Self::sign(&creds.api_secret, &query);
        let url = format!("{}{}?{}&signature={}", base, path, query, signature);

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(response).await
    }

    async fn public_get(&self, base: &str, path_and_query: &str) -> VenueResult<Value> {
        let url = format!("{}{}", base, path_and_query);
        let response = self.http.get(&url).send().await.map_err(transport_error)?;
        decode_response(response).await
    }

    fn order_result(body: &Value) -> VenueResult<OrderResult> {
        let venue_order_id = body
            .get("orderId")
            .map(|v| v.to_string().trim_matches('"').to_string())
            .ok_or_else(|| VenueError::Venue {
                code: "parse".into(),
                message: "order response missing orderId".into(),
            })?;

        // Spot FULL responses carry fills; futures report avgPrice directly.
        let (price, quantity, fee) = if let Some(fills) = body.get("fills").and_then(Value::as_array)
        {
            let mut notional = Decimal::ZERO;
            let mut qty = Decimal::ZERO;
            let mut fee = Decimal::ZERO;
            for fill in fills {
                let p = dec_field(fill, "price").unwrap_or(Decimal::ZERO);
                let q = dec_field(fill, "qty").unwrap_or(Decimal::ZERO);
                notional += p * q;
                qty += q;
                fee += dec_field(fill, "commission").unwrap_or(Decimal::ZERO);
            }
            let avg = if qty > Decimal::ZERO { notional / qty } else { Decimal::ZERO };
            (avg, qty, Some(fee))
        } else {
            (
                dec_field(body, "avgPrice")
                    .or_else(|| dec_field(body, "price"))
                    .unwrap_or(Decimal::ZERO),
                dec_field(body, "executedQty")
                    .or_else(|| dec_field(body, "origQty"))
                    .unwrap_or(Decimal::ZERO),
                None,
            )
        };

        let raw_timestamp = body
            .get("transactTime")
            .or_else(|| body.get("updateTime"))
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Ok(OrderResult {
            venue_order_id,
            filled_price: price,
            filled_quantity: quantity,
            fee,
            raw_timestamp,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn place_spot_market(
        &self,
        creds: &ApiCredentials,
        req: &SpotMarketRequest,
    ) -> VenueResult<OrderResult> {
        let mut params = vec![
            ("symbol".to_string(), normalize_symbol(&req.symbol)),
            ("side".to_string(), req.side.as_upper().to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("newClientOrderId".to_string(), req.client_order_id.clone()),
            ("newOrderRespType".to_string(), "FULL".to_string()),
        ];
        match (req.quantity, req.quote_quantity) {
            (Some(qty), _) => params.push(("quantity".to_string(), qty.normalize().to_string())),
            (None, Some(quote)) => {
                params.push(("quoteOrderQty".to_string(), quote.normalize().to_string()))
            }
            (None, None) => {
                return Err(VenueError::InvalidOrder(
                    "spot market order needs quantity or quote_quantity".into(),
                ))
            }
        }
        let body = self
            .signed_request(creds, reqwest::Method::POST, &self.spot_url, "/api/v3/order", params)
            .await?;
        Self::order_result(&body)
    }

    async fn place_futures_market(
        &self,
        creds: &ApiCredentials,
        req: &FuturesMarketRequest,
    ) -> VenueResult<OrderResult> {
        let side = match (req.side, req.reduce_only) {
            (PositionSide::Long, false) | (PositionSide::Short, true) => OrderSide::Buy,
            (PositionSide::Short, false) | (PositionSide::Long, true) => OrderSide::Sell,
        };
        let mut params = vec![
            ("symbol".to_string(), normalize_symbol(&req.symbol)),
            ("side".to_string(), side.as_upper().to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), req.quantity.normalize().to_string()),
            ("newClientOrderId".to_string(), req.client_order_id.clone()),
        ];
        if req.reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }
        let base = self.base_for(req.market).to_string();
        let body = self
            .signed_request(
                creds,
                reqwest::Method::POST,
                &base,
                Self::order_path(req.market),
                params,
            )
            .await?;
        Self::order_result(&body)
    }

    async fn close_futures_position(
        &self,
        creds: &ApiCredentials,
        req: &CloseFuturesRequest,
    ) -> VenueResult<OrderResult> {
        let quantity = match req.quantity {
            Some(qty) => qty,
            None => {
                // Whole-position close: look the size up first.
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
        let path = match market {
            Market::UsdmFutures => "/fapi/v1/leverage",
            Market::CoinmFutures => "/dapi/v1/leverage",
            Market::Spot => unreachable!(),
        };
        let base = self.base_for(market).to_string();
        self.signed_request(
            creds,
            reqwest::Method::POST,
            &base,
            path,
            vec![
                ("symbol".to_string(), normalize_symbol(symbol)),
                ("leverage".to_string(), leverage.to_string()),
            ],
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
            // Spot stop-limit needs a limit leg we do not manage; the
            // position monitor triggers spot stops locally.
            return Err(VenueError::Unsupported);
        }
        let close_side = match req.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };
        let base = self.base_for(req.market).to_string();
        let body = self
            .signed_request(
                creds,
                reqwest::Method::POST,
                &base,
                Self::order_path(req.market),
                vec![
                    ("symbol".to_string(), normalize_symbol(&req.symbol)),
                    ("side".to_string(), close_side.as_upper().to_string()),
                    ("type".to_string(), "STOP_MARKET".to_string()),
                    ("stopPrice".to_string(), req.stop_price.normalize().to_string()),
                    ("quantity".to_string(), req.quantity.normalize().to_string()),
                    ("reduceOnly".to_string(), "true".to_string()),
                    ("newClientOrderId".to_string(), req.client_order_id.clone()),
                ],
            )
            .await?;
        body.get("orderId")
            .map(|v| v.to_string().trim_matches('"').to_string())
            .ok_or_else(|| VenueError::Venue {
                code: "parse".into(),
                message: "stop order response missing orderId".into(),
            })
    }

    async fn get_ticker(&self, symbol: &str, market: Market) -> VenueResult<Decimal> {
        let (base, path) = match market {
            Market::Spot => (&self.spot_url, "/api/v3/ticker/price"),
            Market::UsdmFutures => (&self.usdm_url, "/fapi/v1/ticker/price"),
            Market::CoinmFutures => (&self.coinm_url, "/dapi/v1/ticker/price"),
        };
        let body = self
            .public_get(
                base,
                &format!("{}?symbol={}", path, normalize_symbol(symbol)),
            )
            .await?;
        // COIN-M returns an array per pair.
        let obj = body.as_array().and_then(|a| a.first()).unwrap_or(&body);
        dec_field(obj, "price").ok_or_else(|| VenueError::Venue {
            code: "parse".into(),
            message: format!("no price in ticker for {}", symbol),
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
            &self.spot_url,
            "/sapi/v1/asset/transfer",
            vec![
                ("type".to_string(), "MAIN_UMFUTURE".to_string()),
                ("asset".to_string(), asset.to_uppercase()),
                ("amount".to_string(), amount.normalize().to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_balances(&self, creds: &ApiCredentials) -> VenueResult<Vec<AssetBalance>> {
        let body = self
            .signed_request(
                creds,
                reqwest::Method::GET,
                &self.spot_url,
                "/api/v3/account",
                vec![],
            )
            .await?;
        let balances = body
            .get("balances")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(balances
            .iter()
            .filter_map(|b| {
                let asset = b.get("asset")?.as_str()?.to_string();
                let free = dec_field(b, "free")?;
                let locked = dec_field(b, "locked")?;
                if free.is_zero() && locked.is_zero() {
                    None
                } else {
                    Some(AssetBalance { asset, free, locked })
                }
            })
            .collect())
    }

    async fn get_account_positions(
        &self,
        creds: &ApiCredentials,
        market: Market,
    ) -> VenueResult<Vec<PositionSample>> {
        let path = match market {
            Market::UsdmFutures => "/fapi/v2/positionRisk",
            Market::CoinmFutures => "/dapi/v1/positionRisk",
            Market::Spot => return Ok(Vec::new()),
        };
        let base = self.base_for(market).to_string();
        let body = self
            .signed_request(creds, reqwest::Method::GET, &base, path, vec![])
            .await?;
        let rows = body.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                let amt = dec_field(row, "positionAmt")?;
                if amt.is_zero() {
                    return None;
                }
                Some(PositionSample {
                    symbol: row.get("symbol")?.as_str()?.to_string(),
                    market,
                    side: if amt > Decimal::ZERO {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    },
                    quantity: amt.abs(),
                    entry_price: dec_field(row, "entryPrice").unwrap_or(Decimal::ZERO),
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
        let base = self.base_for(market).to_string();
        let result = self
            .signed_request(
                creds,
                reqwest::Method::GET,
                &base,
                Self::order_path(market),
                vec![
                    ("symbol".to_string(), normalize_symbol(symbol)),
                    ("origClientOrderId".to_string(), client_order_id.to_string()),
                ],
            )
            .await;
        let body = match result {
            Ok(body) => body,
            // -2013: order does not exist.
            Err(VenueError::Venue { code, .. }) if code == "-2013" => return Ok(None),
            Err(VenueError::PositionNotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let state = match body.get("status").and_then(Value::as_str).unwrap_or("") {
            "FILLED" => VenueOrderState::Filled,
            "PARTIALLY_FILLED" => VenueOrderState::PartiallyFilled,
            "NEW" => VenueOrderState::Open,
            "CANCELED" | "EXPIRED" => VenueOrderState::Cancelled,
            "REJECTED" => VenueOrderState::Rejected,
            other => {
                return Err(VenueError::Venue {
                    code: "parse".into(),
                    message: format!("unknown order status {:?}", other),
                })
            }
        };
        Ok(Some(OrderStatusReport {
            venue_order_id: body
                .get("orderId")
                .map(|v| v.to_string().trim_matches('"').to_string())
                .unwrap_or_default(),
            state,
            filled_price: dec_field(&body, "avgPrice").or_else(|| dec_field(&body, "price")),
            filled_quantity: dec_field(&body, "executedQty"),
            fee: None,
        }))
    }

    async fn get_open_positions_of_trader(
        &self,
        venue_uid: &str,
        market: Market,
    ) -> VenueResult<TraderScan> {
        let trade_type = match market {
            Market::CoinmFutures => "DELIVERY",
            _ => "PERPETUAL",
        };
        let url = format!(
            "{}/bapi/futures/v1/public/future/leaderboard/getOtherPosition",
            self.bapi_url
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({ "encryptedUid": venue_uid, "tradeType": trade_type }))
            .send()
            .await
            .map_err(transport_error)?;
        // This endpoint is public and unsigned: a 401/403 here means the
        // trader gated their profile, which is "shares nothing", never a
        // credential problem. The empty streak must keep counting.
        let body = match decode_response(response).await {
            Ok(body) => body,
            Err(VenueError::AuthFailure(_)) => return Ok(TraderScan::Empty),
            Err(err) => return Err(err),
        };

        // success=false with a message means the profile hides positions.
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return Ok(TraderScan::Empty);
        }
        let rows = body
            .pointer("/data/otherPositionRetList")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if rows.is_empty() {
            return Ok(TraderScan::Empty);
        }
        let samples = rows
            .iter()
            .filter_map(|row| {
                let amount = dec_field(row, "amount")?;
                if amount.is_zero() {
                    return None;
                }
                Some(PositionSample {
                    symbol: row.get("symbol")?.as_str()?.to_string(),
                    market,
                    side: if amount > Decimal::ZERO {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    },
                    quantity: amount.abs(),
                    entry_price: dec_field(row, "entryPrice").unwrap_or(Decimal::ZERO),
                    leverage: row
                        .get("leverage")
                        .and_then(Value::as_i64)
                        .and_then(|l| u32::try_from(l).ok()),
                    roe: dec_field(row, "roe"),
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
        let trade_type = match market {
            Market::CoinmFutures => "DELIVERY",
            _ => "PERPETUAL",
        };
        let url = format!(
            "{}/bapi/futures/v3/public/future/leaderboard/getLeaderboardRank",
            self.bapi_url
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "tradeType": trade_type,
                "statisticsType": "ROI",
                "periodType": "WEEKLY",
                "isShared": true,
                "page": page,
                "rows": 20,
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let body = decode_response(response).await?;
        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(TraderSummary {
                    venue: Venue::Binance,
                    venue_uid: row.get("encryptedUid")?.as_str()?.to_string(),
                    display_name: row
                        .get("nickName")
                        .and_then(Value::as_str)
                        .map(String::from),
                    roi: dec_field(row, "value"),
                    pnl: dec_field(row, "pnl"),
                    follower_count: row
                        .get("followerCount")
                        .and_then(Value::as_i64)
                        .and_then(|n| u32::try_from(n).ok()),
                })
            })
            .collect())
    }
}

/// Binance symbols are plain concatenation: `BTC-USDT` → `BTCUSDT`.
fn normalize_symbol(symbol: &str) -> String {
    symbol.replace(['-', '/', '_'], "").to_uppercase()
}

fn transport_error(err: reqwest::Error) -> VenueError {
    VenueError::RetryableNetwork(err.to_string())
}

fn dec_field(value: &Value, key: &str) -> Option<Decimal> {
    match value.get(key) {
        Some(Value::String(s)) => Decimal::from_str(s).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Map an HTTP response to the venue failure taxonomy.
async fn decode_response(response: reqwest::Response) -> VenueResult<Value> {
    let status = response.status();
    if status.as_u16() == 429 || status.as_u16() == 418 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(VenueError::RateLimited { retry_after_secs: retry_after });
    }
    if status.is_server_error() {
        return Err(VenueError::RetryableNetwork(format!("binance {}", status)));
    }
    let body: Value = response.json().await.map_err(transport_error)?;
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(VenueError::AuthFailure(
            body.get("msg")
                .and_then(Value::as_str)
                .unwrap_or("credentials rejected")
                .to_string(),
        ));
    }
    if !status.is_success() {
        return Err(map_api_error(&body));
    }
    // Binance sometimes returns 200 with an error envelope.
    if let (Some(code), Some(_)) = (
        body.get("code").and_then(Value::as_i64),
        body.get("msg").and_then(Value::as_str),
    ) {
        if code != 0 {
            return Err(map_api_error(&body));
        }
    }
    Ok(body)
}

fn map_api_error(body: &Value) -> VenueError {
    let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = body
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    match code {
        -2018 | -2019 => VenueError::InsufficientBalance,
        -1013 | -1111 | -4003 | -4164 => VenueError::InvalidOrder(message),
        -4028 => VenueError::InvalidLeverage(message),
        -2013 | -2011 => VenueError::Venue { code: code.to_string(), message },
        -2014 | -2015 => VenueError::AuthFailure(message),
        -1003 => VenueError::RateLimited { retry_after_secs: None },
        _ => VenueError::Venue { code: code.to_string(), message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_normalization() {
        assert_eq!(normalize_symbol("BTC-USDT"), "BTCUSDT");
        assert_eq!(normalize_symbol("eth/usdt"), "ETHUSDT");
        assert_eq!(normalize_symbol("BTCUSDT"), "BTCUSDT");
    }

    #[test]
    fn signature_matches_reference_vector() {
        // Reference vector from the Binance REST docs.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            BinanceAdapter::sign(secret, query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn insufficient_margin_maps_to_terminal_error() {
        let body = serde_json::json!({"code": -2019, "msg": "Margin is insufficient."});
        assert!(matches!(map_api_error(&body), VenueError::InsufficientBalance));
    }

    #[test]
    fn leverage_error_maps() {
        let body = serde_json::json!({"code": -4028, "msg": "Leverage 200 is not valid"});
        assert!(matches!(map_api_error(&body), VenueError::InvalidLeverage(_)));
    }
}
