//! REST adapter for the venue.
//!
//! Three HTTP surfaces are combined behind the [`Venue`] trait:
//! - Public CLOB: `GET /book?token_id=`
//! - Data API: `GET /trades?user=&limit=`, `GET /positions?user=`
//! - Order gateway (signs and submits on our behalf): `POST /order`,
//!   `DELETE /order/{id}`, `DELETE /orders`, `GET /orders`, `GET /balance?user=`
//!
//! Each call carries its own timeout so a slow endpoint cannot stall the loop.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use binmm_core::{
    BookTop, InstrumentId, OrderId, OrderSide, PostOrderRequest, PostOrderResult, Price, Size,
};

use crate::error::{VenueError, VenueResult};
use crate::types::{OpenOrder, RawTrade, VenuePosition};
use crate::venue::{BoxFuture, Venue};

/// Default timeout for order book requests.
const DEFAULT_BOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for every other request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Trades with a timestamp below this are in seconds rather than ms.
const SECONDS_TIMESTAMP_CEILING: u64 = 100_000_000_000;

/// Endpoint configuration for [`HttpVenue`].
#[derive(Debug, Clone)]
pub struct HttpVenueConfig {
    pub clob_url: String,
    pub data_url: String,
    pub gateway_url: String,
    pub book_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpVenueConfig {
    fn default() -> Self {
        Self {
            clob_url: "https://clob.polymarket.com".to_string(),
            data_url: "https://data-api.polymarket.com".to_string(),
            gateway_url: "http://127.0.0.1:8787".to_string(),
            book_timeout: DEFAULT_BOOK_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireLevel {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct WireBook {
    #[serde(default)]
    bids: Vec<WireLevel>,
    #[serde(default)]
    asks: Vec<WireLevel>,
}

/// Timestamp as delivered: integer seconds, integer ms, or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Int(u64),
    Float(f64),
    Text(String),
}

impl WireTimestamp {
    fn to_ms(&self) -> Option<u64> {
        let raw = match self {
            Self::Int(v) => *v,
            Self::Float(v) if *v >= 0.0 => *v as u64,
            Self::Float(_) => return None,
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| *v >= 0.0)? as u64,
        };
        if raw < SECONDS_TIMESTAMP_CEILING {
            Some(raw.saturating_mul(1000))
        } else {
            Some(raw)
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireTrade {
    #[serde(rename = "transactionHash", default)]
    transaction_hash: Option<String>,
    #[serde(rename = "orderId", default)]
    order_id: Option<String>,
    #[serde(default)]
    asset: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    size: Decimal,
    #[serde(default)]
    price: Decimal,
    timestamp: Option<WireTimestamp>,
    #[serde(default = "default_maker")]
    maker: bool,
    #[serde(default)]
    fee: Decimal,
    #[serde(default)]
    rebate: Decimal,
}

fn default_maker() -> bool {
    true
}

impl WireTrade {
    fn into_raw(self) -> RawTrade {
        RawTrade {
            tx_ref: self.transaction_hash.filter(|s| !s.is_empty()),
            order_id: self.order_id.filter(|s| !s.is_empty()),
            asset: self.asset,
            side: self.side,
            size: self.size,
            price: self.price,
            timestamp_ms: self.timestamp.and_then(|t| t.to_ms()),
            is_maker: self.maker,
            fee: self.fee,
            rebate: self.rebate,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePosition {
    asset: String,
    size: Decimal,
    #[serde(rename = "avgPrice", default)]
    avg_price: Decimal,
}

#[derive(Debug, Serialize)]
struct WireOrderRequest<'a> {
    token_id: &'a str,
    side: OrderSide,
    price: Decimal,
    size: Decimal,
    post_only: bool,
}

#[derive(Debug, Deserialize)]
struct WireOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
}

impl WireOrderResponse {
    fn into_result(self) -> PostOrderResult {
        let error = self.error_msg.filter(|e| !e.is_empty());
        let would_cross = error
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().contains("cross"));
        match self.order_id.filter(|id| !id.is_empty()) {
            Some(id) if self.success => PostOrderResult::accepted(OrderId::from_string(id)),
            _ => PostOrderResult {
                success: false,
                order_id: None,
                error: Some(error.unwrap_or_else(|| "order rejected".to_string())),
                would_cross,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCancelResponse {
    #[serde(default)]
    canceled: Vec<String>,
    #[serde(default)]
    not_canceled: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireOpenOrder {
    id: String,
    asset_id: String,
    side: String,
    price: Decimal,
    original_size: Decimal,
    #[serde(default)]
    size_matched: Decimal,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct WireBalance {
    usdc: Decimal,
}

// ============================================================================
// HttpVenue
// ============================================================================

/// REST-backed venue.
pub struct HttpVenue {
    client: Client,
    config: HttpVenueConfig,
}

impl HttpVenue {
    /// Create a new HTTP venue.
    pub fn new(config: HttpVenueConfig) -> VenueResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| VenueError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> VenueResult<T> {
        let response = request.send().await.map_err(VenueError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint = what, %status, "Venue request failed");
            return Err(VenueError::Http(format!("HTTP {status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| VenueError::Decode(format!("{what}: {e}")))
    }

    async fn fetch_book(&self, instrument: &InstrumentId) -> VenueResult<BookTop> {
        let url = format!("{}/book", self.config.clob_url);
        let request = self
            .client
            .get(&url)
            .query(&[("token_id", instrument.as_str())])
            .timeout(self.config.book_timeout);
        let book: WireBook = self.send_json(request, "book").await?;

        let bids: Vec<Price> = book.bids.iter().map(|l| Price::new(l.price)).collect();
        let asks: Vec<Price> = book.asks.iter().map(|l| Price::new(l.price)).collect();
        Ok(BookTop::from_levels(&bids, &asks))
    }

    async fn submit_order(&self, req: &PostOrderRequest) -> VenueResult<PostOrderResult> {
        let url = format!("{}/order", self.config.gateway_url);
        let body = WireOrderRequest {
            token_id: req.instrument.as_str(),
            side: req.side,
            price: req.price.inner(),
            size: req.size.inner(),
            post_only: req.post_only,
        };
        debug!(
            instrument = %req.instrument,
            side = %req.side,
            price = %req.price,
            size = %req.size,
            post_only = req.post_only,
            "Posting order"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(VenueError::from)?;

        let status = response.status();
        // The gateway reports business rejections as 400 with an errorMsg body.
        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(VenueError::Http(format!("HTTP {status}: {text}")));
        }
        let parsed: WireOrderResponse = response
            .json()
            .await
            .map_err(|e| VenueError::Decode(format!("order: {e}")))?;
        Ok(parsed.into_result())
    }

    async fn delete_order(&self, order_id: &OrderId) -> VenueResult<bool> {
        let url = format!("{}/order/{}", self.config.gateway_url, order_id);
        let response: WireCancelResponse =
            self.send_json(self.client.delete(&url), "cancel").await?;
        Ok(response.canceled.iter().any(|id| id == order_id.as_str()))
    }

    async fn delete_all(&self) -> VenueResult<bool> {
        let url = format!("{}/orders", self.config.gateway_url);
        let response: WireCancelResponse =
            self.send_json(self.client.delete(&url), "cancel_all").await?;
        if !response.not_canceled.is_empty() {
            warn!(
                not_canceled = response.not_canceled.len(),
                "Venue left orders uncancelled"
            );
        }
        Ok(response.not_canceled.is_empty())
    }

    async fn fetch_open_orders(&self) -> VenueResult<Vec<OpenOrder>> {
        let url = format!("{}/orders", self.config.gateway_url);
        let orders: Vec<WireOpenOrder> = self.send_json(self.client.get(&url), "orders").await?;

        let mut result = Vec::with_capacity(orders.len());
        for o in orders {
            if !matches!(o.status.to_ascii_uppercase().as_str(), "OPEN" | "LIVE") {
                continue;
            }
            let Ok(side) = o.side.parse::<OrderSide>() else {
                warn!(order_id = %o.id, side = %o.side, "Skipping open order with unknown side");
                continue;
            };
            result.push(OpenOrder {
                order_id: OrderId::from_string(o.id),
                instrument: InstrumentId::from(o.asset_id.as_str()),
                side,
                price: Price::new(o.price),
                size: Size::new(o.original_size),
                size_matched: Size::new(o.size_matched),
            });
        }
        Ok(result)
    }

    async fn fetch_trades(&self, account: &str, limit: usize) -> VenueResult<Vec<RawTrade>> {
        let url = format!("{}/trades", self.config.data_url);
        let limit = limit.to_string();
        let request = self
            .client
            .get(&url)
            .query(&[("user", account), ("limit", limit.as_str())]);
        let trades: Vec<WireTrade> = self.send_json(request, "trades").await?;
        Ok(trades.into_iter().map(WireTrade::into_raw).collect())
    }

    async fn fetch_positions(&self, account: &str) -> VenueResult<Vec<VenuePosition>> {
        let url = format!("{}/positions", self.config.data_url);
        let request = self.client.get(&url).query(&[("user", account)]);
        let positions: Vec<WirePosition> = self.send_json(request, "positions").await?;
        Ok(positions
            .into_iter()
            .filter(|p| !p.asset.is_empty())
            .map(|p| VenuePosition {
                instrument: InstrumentId::from(p.asset.as_str()),
                size: Size::new(p.size),
                avg_price: Price::new(p.avg_price),
            })
            .collect())
    }

    async fn fetch_balance(&self, account: &str) -> VenueResult<Decimal> {
        let url = format!("{}/balance", self.config.gateway_url);
        let request = self.client.get(&url).query(&[("user", account)]);
        let balance: WireBalance = self.send_json(request, "balance").await?;
        Ok(balance.usdc)
    }
}

impl Venue for HttpVenue {
    fn get_order_book<'a>(
        &'a self,
        instrument: &'a InstrumentId,
    ) -> BoxFuture<'a, VenueResult<BookTop>> {
        Box::pin(self.fetch_book(instrument))
    }

    fn post_order<'a>(
        &'a self,
        request: &'a PostOrderRequest,
    ) -> BoxFuture<'a, VenueResult<PostOrderResult>> {
        Box::pin(self.submit_order(request))
    }

    fn cancel_order<'a>(&'a self, order_id: &'a OrderId) -> BoxFuture<'a, VenueResult<bool>> {
        Box::pin(self.delete_order(order_id))
    }

    fn cancel_all(&self) -> BoxFuture<'_, VenueResult<bool>> {
        Box::pin(self.delete_all())
    }

    fn get_open_orders(&self) -> BoxFuture<'_, VenueResult<Vec<OpenOrder>>> {
        Box::pin(self.fetch_open_orders())
    }

    fn get_trades<'a>(
        &'a self,
        account: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, VenueResult<Vec<RawTrade>>> {
        Box::pin(self.fetch_trades(account, limit))
    }

    fn get_positions<'a>(
        &'a self,
        account: &'a str,
    ) -> BoxFuture<'a, VenueResult<Vec<VenuePosition>>> {
        Box::pin(self.fetch_positions(account))
    }

    fn get_balance<'a>(&'a self, account: &'a str) -> BoxFuture<'a, VenueResult<Decimal>> {
        Box::pin(self.fetch_balance(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_decoding_seconds_timestamp() {
        let json = r#"[{
            "proxyWallet": "0xabc",
            "side": "BUY",
            "asset": "7142",
            "size": 10,
            "price": 0.5,
            "timestamp": 1730000000,
            "transactionHash": "0xdeadbeefcafebabe0011"
        }]"#;
        let trades: Vec<WireTrade> = serde_json::from_str(json).unwrap();
        let raw = trades.into_iter().next().unwrap().into_raw();

        assert_eq!(raw.asset, "7142");
        assert_eq!(raw.size, dec!(10));
        assert_eq!(raw.price, dec!(0.5));
        assert_eq!(raw.timestamp_ms, Some(1_730_000_000_000));
        assert_eq!(raw.tx_ref.as_deref(), Some("0xdeadbeefcafebabe0011"));
        assert!(raw.is_maker);
        assert_eq!(raw.fee, Decimal::ZERO);
    }

    #[test]
    fn test_trade_decoding_missing_hash_and_string_timestamp() {
        let json = r#"{"side":"sell","asset":"9","size":"4","price":"0.61",
                       "timestamp":"1730000000123","transactionHash":""}"#;
        let raw = serde_json::from_str::<WireTrade>(json).unwrap().into_raw();
        assert_eq!(raw.tx_ref, None);
        assert_eq!(raw.timestamp_ms, Some(1_730_000_000_123));
        assert_eq!(raw.price, dec!(0.61));
    }

    #[test]
    fn test_trade_decoding_missing_timestamp_stays_none() {
        let json = r#"{"side":"BUY","asset":"9","size":"4","price":"0.61",
                       "transactionHash":"0xdeadbeefcafebabe0011"}"#;
        let raw = serde_json::from_str::<WireTrade>(json).unwrap().into_raw();
        assert_eq!(raw.timestamp_ms, None);
    }

    #[test]
    fn test_order_response_mapping() {
        let ok: WireOrderResponse =
            serde_json::from_str(r#"{"success":true,"orderID":"0x01","errorMsg":""}"#).unwrap();
        let ok = ok.into_result();
        assert!(ok.success);
        assert_eq!(ok.order_id, Some(OrderId::from("0x01")));

        let crossed: WireOrderResponse = serde_json::from_str(
            r#"{"success":false,"errorMsg":"invalid post-only order: order crosses book"}"#,
        )
        .unwrap();
        let crossed = crossed.into_result();
        assert!(!crossed.success);
        assert!(crossed.would_cross);

        let balance: WireOrderResponse = serde_json::from_str(
            r#"{"success":false,"errorMsg":"not enough balance / allowance"}"#,
        )
        .unwrap();
        assert!(balance.into_result().is_balance_error());
    }

    #[test]
    fn test_book_decoding() {
        let json = r#"{"bids":[{"price":"0.01","size":"1000"},{"price":"0.45","size":"20"}],
                       "asks":[{"price":"0.47","size":"15"},{"price":"0.99","size":"1000"}]}"#;
        let book: WireBook = serde_json::from_str(json).unwrap();
        let bids: Vec<Price> = book.bids.iter().map(|l| Price::new(l.price)).collect();
        let asks: Vec<Price> = book.asks.iter().map(|l| Price::new(l.price)).collect();
        let top = BookTop::from_levels(&bids, &asks);
        assert_eq!(top.best_bid.inner(), dec!(0.45));
        assert_eq!(top.best_ask.inner(), dec!(0.47));
    }

    #[test]
    fn test_new_builds_client() {
        assert!(HttpVenue::new(HttpVenueConfig::default()).is_ok());
    }
}
