use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::errors::ExchangeError;
use crate::domain::market::types::{Balance, BookLevel, Candle, OrderBook, Ticker};
use crate::domain::ports::{ExchangeClient, OrderParams, VenueOrder, VenueOrderStatus};
use crate::domain::trading::types::{OrderSide, OrderType};

/// "BTC/JPY" -> "btc_jpy", the venue's pair format.
fn to_pair(symbol: &str) -> String {
    symbol.replace('/', "_").to_lowercase()
}

#[derive(Debug, Clone)]
pub struct VenueCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// REST client for the live venue. Public endpoints are unauthenticated;
/// private endpoints carry a nonce and an HMAC-SHA256 signature over
/// `nonce + path + body`.
pub struct LiveVenueClient {
    client: Client,
    public_url: String,
    private_url: String,
    credentials: VenueCredentials,
}

impl LiveVenueClient {
    pub fn new(public_url: String, private_url: String, credentials: VenueCredentials) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            public_url,
            private_url,
            credentials,
        }
    }

    fn sign(&self, payload: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn get_public<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.public_url, path);
        debug!("LiveVenueClient: GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn get_private<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<T, ExchangeError> {
        let nonce = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&format!("{}{}", nonce, path));
        let url = format!("{}{}", self.private_url, path);
        let response = self
            .client
            .get(&url)
            .header("ACCESS-KEY", &self.credentials.api_key)
            .header("ACCESS-NONCE", &nonce)
            .header("ACCESS-SIGNATURE", signature)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post_private<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ExchangeError> {
        let nonce = Utc::now().timestamp_millis().to_string();
        let body_text = body.to_string();
        let signature = self.sign(&format!("{}{}", nonce, body_text));
        let url = format!("{}{}", self.private_url, path);
        debug!("LiveVenueClient: POST {}", url);
        let response = self
            .client
            .post(&url)
            .header("ACCESS-KEY", &self.credentials.api_key)
            .header("ACCESS-NONCE", &nonce)
            .header("ACCESS-SIGNATURE", signature)
            .header("Content-Type", "application/json")
            .body(body_text)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    /// Map an HTTP response onto the error taxonomy. 429 carries Retry-After,
    /// 5xx is transient, everything else surfaces the venue's error code.
    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ExchangeError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Server {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Api {
                code: status.as_u16().to_string(),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ExchangeError::Network(format!("malformed response: {}", e)))?;
        match envelope.success {
            1 => envelope.data.ok_or_else(|| ExchangeError::Network(
                "success response without data".to_string(),
            )),
            _ => {
                let code = envelope
                    .data_error
                    .map(|e| e.code.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                // 6xxxx codes are order validation failures.
                if code.starts_with('6') {
                    Err(ExchangeError::InvalidOrder {
                        reason: format!("venue error {}", code),
                    })
                } else {
                    Err(ExchangeError::Api {
                        code,
                        message: "venue rejected request".to_string(),
                    })
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: u8,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(rename = "error", default)]
    data_error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: u32,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    buy: Decimal,
    sell: Decimal,
    last: Decimal,
    vol: Decimal,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct DepthData {
    bids: Vec<[Decimal; 2]>,
    asks: Vec<[Decimal; 2]>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct AssetsData {
    assets: Vec<AssetData>,
}

#[derive(Debug, Deserialize)]
struct AssetData {
    asset: String,
    free_amount: Decimal,
    locked_amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderData {
    order_id: u64,
    pair: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    price: Option<Decimal>,
    start_amount: Decimal,
    executed_amount: Decimal,
    average_price: Option<Decimal>,
    status: String,
    ordered_at: i64,
}

#[derive(Debug, Deserialize)]
struct OrdersData {
    orders: Vec<OrderData>,
}

#[derive(Debug, Deserialize)]
struct CandlestickData {
    candlestick: Vec<CandleSeries>,
}

#[derive(Debug, Deserialize)]
struct CandleSeries {
    // [open, high, low, close, volume, unix_ms]
    ohlcv: Vec<[serde_json::Value; 6]>,
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

impl OrderData {
    /// The venue echoes the pair on every order payload; a mismatch means a
    /// routing fault and the payload must not be applied to local state.
    fn matches(&self, symbol: &str) -> bool {
        self.pair == to_pair(symbol)
    }

    fn into_venue_order(self, symbol: &str) -> VenueOrder {
        let status = match self.status.as_str() {
            "UNFILLED" => VenueOrderStatus::Unfilled,
            "PARTIALLY_FILLED" => VenueOrderStatus::PartiallyFilled,
            "FULLY_FILLED" => VenueOrderStatus::FullyFilled,
            "CANCELED_UNFILLED" => VenueOrderStatus::CancelledUnfilled,
            "CANCELED_PARTIALLY_FILLED" => VenueOrderStatus::CancelledPartiallyFilled,
            _ => VenueOrderStatus::Expired,
        };
        VenueOrder {
            order_id: self.order_id.to_string(),
            symbol: symbol.to_string(),
            side: if self.side == "buy" {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            },
            order_type: if self.order_type == "limit" {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            price: self.price,
            amount: self.start_amount,
            filled_amount: self.executed_amount,
            avg_fill_price: self.average_price.unwrap_or(Decimal::ZERO),
            status,
            timestamp: millis_to_datetime(self.ordered_at),
        }
    }
}

#[async_trait]
impl ExchangeClient for LiveVenueClient {
    async fn fetch_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        let data: AssetsData = self.get_private("/v1/user/assets").await?;
        Ok(data
            .assets
            .into_iter()
            .map(|a| Balance {
                asset: a.asset.to_uppercase(),
                free: a.free_amount,
                locked: a.locked_amount,
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let data: TickerData = self
            .get_public(&format!("/{}/ticker", to_pair(symbol)))
            .await?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            bid: data.buy,
            ask: data.sell,
            last: data.last,
            volume: data.vol,
            timestamp: millis_to_datetime(data.timestamp),
        })
    }

    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBook, ExchangeError> {
        let data: DepthData = self
            .get_public(&format!("/{}/depth", to_pair(symbol)))
            .await?;
        let levels = |raw: Vec<[Decimal; 2]>| {
            raw.into_iter()
                .map(|[price, amount]| BookLevel { price, amount })
                .collect()
        };
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: levels(data.bids),
            asks: levels(data.asks),
            timestamp: millis_to_datetime(data.timestamp),
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let date = Utc::now().format("%Y%m%d");
        let data: CandlestickData = self
            .get_public(&format!(
                "/{}/candlestick/{}/{}",
                to_pair(symbol),
                timeframe,
                date
            ))
            .await?;
        let mut candles = Vec::new();
        for series in data.candlestick {
            for row in series.ohlcv {
                let decimal = |v: &serde_json::Value| -> Option<Decimal> {
                    match v {
                        serde_json::Value::String(s) => s.parse().ok(),
                        serde_json::Value::Number(n) => n.as_f64().and_then(Decimal::from_f64_retain),
                        _ => None,
                    }
                };
                let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
                    decimal(&row[0]),
                    decimal(&row[1]),
                    decimal(&row[2]),
                    decimal(&row[3]),
                    decimal(&row[4]),
                ) else {
                    continue;
                };
                let ts = row[5].as_i64().unwrap_or_default();
                candles.push(Candle {
                    symbol: symbol.to_string(),
                    open,
                    high,
                    low,
                    close,
                    volume,
                    timestamp: millis_to_datetime(ts),
                });
            }
        }
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn create_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
        params: OrderParams,
    ) -> Result<VenueOrder, ExchangeError> {
        if order_type == OrderType::Limit && price.is_none() {
            return Err(ExchangeError::InvalidOrder {
                reason: "limit order requires a price".to_string(),
            });
        }
        let mut body = serde_json::json!({
            "pair": to_pair(symbol),
            "side": side.to_string(),
            "type": order_type.to_string(),
            "amount": amount.to_string(),
        });
        if let Some(price) = price {
            body["price"] = serde_json::Value::String(price.to_string());
        }
        if params.post_only {
            body["post_only"] = serde_json::Value::Bool(true);
        }
        if params.margin {
            body["position_side"] = serde_json::Value::String("long".to_string());
        }

        let data: OrderData = self.post_private("/v1/user/spot/order", body).await?;
        if !data.matches(symbol) {
            return Err(ExchangeError::Api {
                code: "pair_mismatch".to_string(),
                message: format!(
                    "requested {} but venue answered for {}",
                    to_pair(symbol),
                    data.pair
                ),
            });
        }
        info!(
            "LiveVenueClient: order {} accepted ({} {} {})",
            data.order_id, symbol, side, amount
        );
        Ok(data.into_venue_order(symbol))
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError> {
        let body = serde_json::json!({
            "pair": to_pair(symbol),
            "order_id": order_id.parse::<u64>().unwrap_or_default(),
        });
        let _: OrderData = self.post_private("/v1/user/spot/cancel_order", body).await?;
        Ok(())
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>, ExchangeError> {
        let data: OrdersData = self
            .get_private(&format!("/v1/user/spot/active_orders?pair={}", to_pair(symbol)))
            .await?;
        let mut orders = Vec::with_capacity(data.orders.len());
        for order in data.orders {
            if !order.matches(symbol) {
                warn!(
                    "LiveVenueClient: dropping order {} for foreign pair {}",
                    order.order_id, order.pair
                );
                continue;
            }
            orders.push(order.into_venue_order(symbol));
        }
        Ok(orders)
    }
}
