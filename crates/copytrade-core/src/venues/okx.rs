//! OKX v5 adapter.
//!
//! OKX peculiarities kept local: base64 HMAC signing over
//! `timestamp + method + path + body` with a mandatory passphrase header,
//! dash-separated instrument ids (`BTC-USDT`, `BTC-USDT-SWAP`), and order
//! errors nested per-item under `data[].sCode`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
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
    ApiCredentials, CloseFuturesRequest, ExchangeAdapter, FuturesMarketRequest,
    SpotMarketRequest, StopLossRequest,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://www.okx.com";

pub struct OkxAdapter {
    base_url: String,
    http: reqwest::Client,
}

impl OkxAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn sign(creds: &ApiCredentials, timestamp: &str, method: &str, path: &str, body: &str) -> String {
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
            .ok_or_else(|| VenueError::AuthFailure("OKX requires a passphrase".into()))?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let payload = body.as_ref().map(Value::to_string).unwrap_or_default();
        let signature = Self::sign(creds, &timestamp, method.as_str(), path, &payload);

        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("OK-ACCESS-KEY", &creds.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", passphrase)
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

    /// OKX order placement returns only ids; the fill is read back.
    async fn read_back_fill(
        &self,
        creds: &ApiCredentials,
        inst_id: &str,
        client_order_id: &str,
        order_id: String,
    ) -> VenueResult<OrderResult> {
        let path = format!(
            "/api/v5/trade/order?instId={}&clOrdId={}",
            inst_id, client_order_id
        );
        let body = self
            .signed_request(creds, reqwest::Method::GET, &path, None)
            .await?;
        let row = body.pointer("/data/0").cloned().unwrap_or(Value::Null);
        Ok(OrderResult {
            venue_order_id: order_id,
            filled_price: dec_field(&row, "avgPx").unwrap_or(Decimal::ZERO),
            filled_quantity: dec_field(&row, "accFillSz").unwrap_or(Decimal::ZERO),
            fee: dec_field(&row, "fee").map(|f| f.abs()),
            raw_timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    async fn place_spot_market(
        &self,
        creds: &ApiCredentials,
        req: &SpotMarketRequest,
    ) -> VenueResult<OrderResult> {
        let inst_id = to_inst_id(&req.symbol, Market::Spot);
        let (size, tgt_ccy) = match (req.quantity, req.quote_quantity) {
            (Some(qty), _) => (qty, "base_ccy"),
            (None, Some(quote)) => (quote, "quote_ccy"),
            (None, None) => {
                return Err(VenueError::InvalidOrder(
                    "spot market order needs quantity or quote_quantity".into(),
                ))
            }
        };
        let body = self
            .signed_request(
                creds,
                reqwest::Method::POST,
                "/api/v5/trade/order",
                Some(json!({
                    "instId": inst_id,
                    "tdMode": "cash",
                    "side": req.side.as_lower(),
                    "ordType": "market",
                    "sz": size.normalize().to_string(),
                    "tgtCcy": tgt_ccy,
                    "clOrdId": req.client_order_id,
                })),
            )
            .await?;
        let order_id = data_order_id(&body)?;
        self.read_back_fill(creds, &inst_id, &req.client_order_id, order_id)
            .await
    }

    async fn place_futures_market(
        &self,
        creds: &ApiCredentials,
        req: &FuturesMarketRequest,
    ) -> VenueResult<OrderResult> {
        let inst_id = to_inst_id(&req.symbol, req.market);
        let side = match (req.side, req.reduce_only) {
            (PositionSide::Long, false) | (PositionSide::Short, true) => "buy",
            (PositionSide::Short, false) | (PositionSide::Long, true) => "sell",
        };
        let body = self
            .signed_request(
                creds,
                reqwest::Method::POST,
                "/api/v5/trade/order",
                Some(json!({
                    "instId": inst_id,
                    "tdMode": "cross",
                    "side": side,
                    "ordType": "market",
                    "sz": req.quantity.normalize().to_string(),
                    "reduceOnly": req.reduce_only,
                    "clOrdId": req.client_order_id,
                })),
            )
            .await?;
        let order_id = data_order_id(&body)?;
        self.read_back_fill(creds, &inst_id, &req.client_order_id, order_id)
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
                let inst_id = to_inst_id(&req.symbol, req.market);
                positions
                    .iter()
                    .find(|p| to_inst_id(&p.symbol, req.market) == inst_id && p.side == req.side)
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
            "/api/v5/account/set-leverage",
            Some(json!({
                "instId": to_inst_id(symbol, market),
                "lever": leverage.to_string(),
                "mgnMode": "cross",
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
        let side = match req.side {
            PositionSide::Long => "sell",
            PositionSide::Short => "buy",
        };
        let body = self
            .signed_request(
                creds,
                reqwest::Method::POST,
                "/api/v5/trade/order-algo",
                Some(json!({
                    "instId": to_inst_id(&req.symbol, req.market),
                    "tdMode": "cross",
                    "side": side,
                    "ordType": "conditional",
                    "sz": req.quantity.normalize().to_string(),
                    "slTriggerPx": req.stop_price.normalize().to_string(),
                    // -1 executes the stop as a market order.
                    "slOrdPx": "-1",
                    "reduceOnly": true,
                    "clOrdId": req.client_order_id,
                })),
            )
            .await?;
        body.pointer("/data/0/algoId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| VenueError::Venue {
                code: "parse".into(),
                message: "algo order response missing algoId".into(),
            })
    }

    async fn get_ticker(&self, symbol: &str, market: Market) -> VenueResult<Decimal> {
        let body = self
            .public_get(&format!(
                "/api/v5/market/ticker?instId={}",
                to_inst_id(symbol, market)
            ))
            .await?;
        body.pointer("/data/0")
            .and_then(|row| dec_field(row, "last"))
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
        // 18 = trading account, 6 = funding account; swaps margin from the
        // unified trading account, so only funding needs a move.
        self.signed_request(
            creds,
            reqwest::Method::POST,
            "/api/v5/asset/transfer",
            Some(json!({
                "ccy": asset.to_uppercase(),
                "amt": amount.normalize().to_string(),
                "from": "6",
                "to": "18",
            })),
        )
        .await?;
        Ok(())
    }

    async fn get_balances(&self, creds: &ApiCredentials) -> VenueResult<Vec<AssetBalance>> {
        let body = self
            .signed_request(creds, reqwest::Method::GET, "/api/v5/account/balance", None)
            .await?;
        let details = body
            .pointer("/data/0/details")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(details
            .iter()
            .filter_map(|d| {
                Some(AssetBalance {
                    asset: d.get("ccy")?.as_str()?.to_string(),
                    free: dec_field(d, "availBal")?,
                    locked: dec_field(d, "frozenBal").unwrap_or(Decimal::ZERO),
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
        let body = self
            .signed_request(
                creds,
                reqwest::Method::GET,
                "/api/v5/account/positions?instType=SWAP",
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
                let pos = dec_field(row, "pos")?;
                if pos.is_zero() {
                    return None;
                }
                let inst_id = row.get("instId")?.as_str()?;
                Some(PositionSample {
                    symbol: inst_id.trim_end_matches("-SWAP").replace('-', ""),
                    market,
                    side: if pos > Decimal::ZERO {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    },
                    quantity: pos.abs(),
                    entry_price: dec_field(row, "avgPx").unwrap_or(Decimal::ZERO),
                    leverage: dec_field(row, "lever").and_then(|l| l.to_u32()),
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
        let path = format!(
            "/api/v5/trade/order?instId={}&clOrdId={}",
            to_inst_id(symbol, market),
            client_order_id
        );
        let result = self
            .signed_request(creds, reqwest::Method::GET, &path, None)
            .await;
        let body = match result {
            Ok(body) => body,
            // 51603: order does not exist.
            Err(VenueError::Venue { code, .. }) if code == "51603" => return Ok(None),
            Err(err) => return Err(err),
        };
        let row = match body.pointer("/data/0") {
            Some(row) => row.clone(),
            None => return Ok(None),
        };
        let state = match row.get("state").and_then(Value::as_str).unwrap_or("") {
            "filled" => VenueOrderState::Filled,
            "partially_filled" => VenueOrderState::PartiallyFilled,
            "live" => VenueOrderState::Open,
            "canceled" | "mmp_canceled" => VenueOrderState::Cancelled,
            "" => return Ok(None),
            other => {
                return Err(VenueError::Venue {
                    code: "parse".into(),
                    message: format!("unknown order state {:?}", other),
                })
            }
        };
        Ok(Some(OrderStatusReport {
            venue_order_id: row
                .get("ordId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            state,
            filled_price: dec_field(&row, "avgPx"),
            filled_quantity: dec_field(&row, "accFillSz"),
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
                "/api/v5/copytrading/public-current-subpositions?uniqueCode={}",
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
                let size = dec_field(row, "subPos")?;
                if size.is_zero() {
                    return None;
                }
                let inst_id = row.get("instId")?.as_str()?;
                Some(PositionSample {
                    symbol: inst_id.trim_end_matches("-SWAP").replace('-', ""),
                    market,
                    side: match row.get("posSide").and_then(Value::as_str) {
                        Some("short") => PositionSide::Short,
                        _ => PositionSide::Long,
                    },
                    quantity: size,
                    entry_price: dec_field(row, "openAvgPx").unwrap_or(Decimal::ZERO),
                    leverage: dec_field(row, "lever").and_then(|l| l.to_u32()),
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
                "/api/v5/copytrading/public-lead-traders?sortType=pnl&page={}&limit=20",
                page
            ))
            .await?;
        let rows = body
            .pointer("/data/0/ranks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(TraderSummary {
                    venue: Venue::Okx,
                    venue_uid: row.get("uniqueCode")?.as_str()?.to_string(),
                    display_name: row
                        .get("nickName")
                        .and_then(Value::as_str)
                        .map(String::from),
                    roi: dec_field(row, "winRatio"),
                    pnl: dec_field(row, "pnl"),
                    follower_count: row
                        .get("copyTraderNum")
                        .and_then(Value::as_str)
                        .and_then(|n| n.parse().ok()),
                })
            })
            .collect())
    }
}

/// OKX instrument ids are dash-separated; swaps carry a `-SWAP` suffix.
/// `BTCUSDT` → `BTC-USDT`, `BTCUSDT` on USDM → `BTC-USDT-SWAP`,
/// COIN-M `BTCUSD` → `BTC-USD-SWAP`.
fn to_inst_id(symbol: &str, market: Market) -> String {
    let flat = symbol.replace(['-', '/', '_'], "").to_uppercase();
    let (base, quote) = split_pair(&flat);
    match market {
        Market::Spot => format!("{}-{}", base, quote),
        Market::UsdmFutures => format!("{}-{}-SWAP", base, quote),
        Market::CoinmFutures => format!("{}-USD-SWAP", base),
    }
}

fn split_pair(flat: &str) -> (&str, &str) {
    for quote in ["USDT", "USDC", "USD", "BTC", "ETH"] {
        if let Some(base) = flat.strip_suffix(quote) {
            if !base.is_empty() {
                return (base, quote);
            }
        }
    }
    (flat, "USDT")
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
    body.pointer("/data/0/ordId")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| VenueError::Venue {
            code: "parse".into(),
            message: "order response missing ordId".into(),
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
        return Err(VenueError::RetryableNetwork(format!("okx {}", status)));
    }
    let body: Value = response.json().await.map_err(transport_error)?;
    let code = body.get("code").and_then(Value::as_str).unwrap_or("0");
    if code == "0" {
        // Per-item errors: a 0 envelope can carry a non-zero sCode.
        if let Some(s_code) = body.pointer("/data/0/sCode").and_then(Value::as_str) {
            if s_code != "0" {
                let message = body
                    .pointer("/data/0/sMsg")
                    .and_then(Value::as_str)
                    .unwrap_or("order rejected")
                    .to_string();
                return Err(map_code(s_code, message));
            }
        }
        return Ok(body);
    }
    let message = body
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Err(map_code(code, message))
}

fn map_code(code: &str, message: String) -> VenueError {
    match code {
        "50111" | "50113" | "50114" | "50102" => VenueError::AuthFailure(message),
        "50011" | "50013" => VenueError::RateLimited { retry_after_secs: None },
        "51008" | "51119" => VenueError::InsufficientBalance,
        "51000" | "51005" | "51020" => VenueError::InvalidOrder(message),
        "59101" | "59102" | "59103" => VenueError::InvalidLeverage(message),
        _ => VenueError::Venue { code: code.to_string(), message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inst_id_conversion() {
        assert_eq!(to_inst_id("BTCUSDT", Market::Spot), "BTC-USDT");
        assert_eq!(to_inst_id("BTC-USDT", Market::Spot), "BTC-USDT");
        assert_eq!(to_inst_id("ETHUSDT", Market::UsdmFutures), "ETH-USDT-SWAP");
        assert_eq!(to_inst_id("BTCUSD", Market::CoinmFutures), "BTC-USD-SWAP");
    }

    #[test]
    fn signature_is_base64_and_deterministic() {
        let creds = ApiCredentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
            passphrase: Some("phrase".into()),
        };
        let a = OkxAdapter::sign(&creds, "2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance", "");
        let b = OkxAdapter::sign(&creds, "2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance", "");
        assert_eq!(a, b);
        assert!(BASE64.decode(&a).is_ok());
    }

    #[test]
    fn error_code_mapping() {
        assert!(matches!(
            map_code("51008", "insufficient".into()),
            VenueError::InsufficientBalance
        ));
        assert!(matches!(
            map_code("50111", "bad key".into()),
            VenueError::AuthFailure(_)
        ));
    }
}
