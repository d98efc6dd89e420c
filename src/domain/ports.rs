use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Receiver;

use crate::domain::errors::ExchangeError;
use crate::domain::market::types::{Balance, Candle, OrderBook, Ticker};
use crate::domain::trading::types::{OrderSide, OrderType};

/// Order status as the venue reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueOrderStatus {
    Unfilled,
    PartiallyFilled,
    FullyFilled,
    CancelledUnfilled,
    CancelledPartiallyFilled,
    Expired,
}

impl VenueOrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            VenueOrderStatus::Unfilled | VenueOrderStatus::PartiallyFilled
        )
    }
}

/// The venue's view of one order, returned by `create_order` (the ack) and by
/// the open-orders poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub filled_amount: Decimal,
    pub avg_fill_price: Decimal,
    pub status: VenueOrderStatus,
    pub timestamp: DateTime<Utc>,
}

/// Extra create-order parameters that not every venue supports.
#[derive(Debug, Clone, Default)]
pub struct OrderParams {
    pub post_only: bool,
    pub margin: bool,
}

/// The exchange capability port. Live, paper, and backtest venues plug in
/// behind this interface; nothing above it knows which one is wired.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_balance(&self) -> Result<Vec<Balance>, ExchangeError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;

    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBook, ExchangeError>;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn create_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
        params: OrderParams,
    ) -> Result<VenueOrder, ExchangeError>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>, ExchangeError>;

    /// Push channel for order updates, where the venue supports one. Callers
    /// must still reconcile via `fetch_open_orders`; this only tightens
    /// latency. Defaults to unsupported.
    async fn subscribe_order_updates(&self) -> Option<Receiver<VenueOrder>> {
        None
    }
}
