use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info};

use crate::domain::errors::ExchangeError;
use crate::domain::market::types::{Balance, BookLevel, Candle, OrderBook, Ticker};
use crate::domain::ports::{ExchangeClient, OrderParams, VenueOrder, VenueOrderStatus};
use crate::domain::trading::types::{OrderSide, OrderType};

struct PaperState {
    tickers: HashMap<String, Ticker>,
    candles: HashMap<String, Vec<Candle>>,
    balances: Vec<Balance>,
    orders: HashMap<String, VenueOrder>,
    next_order_id: u64,
    injected_failures: VecDeque<ExchangeError>,
    update_subs: Vec<Sender<VenueOrder>>,
}

/// In-memory venue for paper trading and backtests. Market orders fill at
/// the touch; limit orders rest until a ticker update crosses them. Failures
/// can be injected to exercise the gateway's retry paths.
#[derive(Clone)]
pub struct PaperVenue {
    state: Arc<RwLock<PaperState>>,
}

impl PaperVenue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperState {
                tickers: HashMap::new(),
                candles: HashMap::new(),
                balances: vec![Balance {
                    asset: "JPY".to_string(),
                    free: Decimal::new(1_000_000, 0),
                    locked: Decimal::ZERO,
                }],
                orders: HashMap::new(),
                next_order_id: 1,
                injected_failures: VecDeque::new(),
                update_subs: Vec::new(),
            })),
        }
    }

    pub async fn set_balance(&self, asset: &str, free: Decimal) {
        let mut state = self.state.write().await;
        state.balances.retain(|b| b.asset != asset);
        state.balances.push(Balance {
            asset: asset.to_string(),
            free,
            locked: Decimal::ZERO,
        });
    }

    pub async fn push_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.state
            .write()
            .await
            .candles
            .insert(symbol.to_string(), candles);
    }

    /// Update the ticker and match any resting limit orders it crosses.
    pub async fn set_ticker(&self, symbol: &str, bid: Decimal, ask: Decimal, last: Decimal) {
        let mut state = self.state.write().await;
        state.tickers.insert(
            symbol.to_string(),
            Ticker {
                symbol: symbol.to_string(),
                bid,
                ask,
                last,
                volume: Decimal::new(10, 0),
                timestamp: Utc::now(),
            },
        );

        let mut filled = Vec::new();
        for order in state.orders.values_mut() {
            if order.symbol != symbol || !order.status.is_open() {
                continue;
            }
            let Some(price) = order.price else { continue };
            let crossed = match order.side {
                OrderSide::Buy => last <= price,
                OrderSide::Sell => last >= price,
            };
            if crossed {
                order.status = VenueOrderStatus::FullyFilled;
                order.filled_amount = order.amount;
                order.avg_fill_price = price;
                order.timestamp = Utc::now();
                info!("PaperVenue: limit order {} filled at {}", order.order_id, price);
                filled.push(order.clone());
            }
        }
        Self::notify(&mut state, filled);
    }

    /// Queue an error returned by the next `create_order` call.
    pub async fn inject_failure(&self, error: ExchangeError) {
        self.state.write().await.injected_failures.push_back(error);
    }

    /// Force-fill an open order (full remaining amount) at the given price.
    pub async fn force_fill(&self, order_id: &str, price: Decimal) {
        let mut state = self.state.write().await;
        let mut filled = Vec::new();
        if let Some(order) = state.orders.get_mut(order_id) {
            if order.status.is_open() {
                order.status = VenueOrderStatus::FullyFilled;
                order.filled_amount = order.amount;
                order.avg_fill_price = price;
                order.timestamp = Utc::now();
                filled.push(order.clone());
            }
        }
        Self::notify(&mut state, filled);
    }

    /// Report a partial fill on an open order.
    pub async fn partial_fill(&self, order_id: &str, amount: Decimal, price: Decimal) {
        let mut state = self.state.write().await;
        let mut updates = Vec::new();
        if let Some(order) = state.orders.get_mut(order_id) {
            if order.status.is_open() {
                order.filled_amount = (order.filled_amount + amount).min(order.amount);
                order.avg_fill_price = price;
                order.status = if order.filled_amount >= order.amount {
                    VenueOrderStatus::FullyFilled
                } else {
                    VenueOrderStatus::PartiallyFilled
                };
                order.timestamp = Utc::now();
                updates.push(order.clone());
            }
        }
        Self::notify(&mut state, updates);
    }

    pub async fn order(&self, order_id: &str) -> Option<VenueOrder> {
        self.state.read().await.orders.get(order_id).cloned()
    }

    fn notify(state: &mut PaperState, updates: Vec<VenueOrder>) {
        state.update_subs.retain(|tx| !tx.is_closed());
        for update in updates {
            for tx in &state.update_subs {
                let _ = tx.try_send(update.clone());
            }
        }
    }
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for PaperVenue {
    async fn fetch_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        Ok(self.state.read().await.balances.clone())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        self.state
            .read()
            .await
            .tickers
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::Api {
                code: "60001".to_string(),
                message: format!("no ticker for {}", symbol),
            })
    }

    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBook, ExchangeError> {
        let ticker = self.fetch_ticker(symbol).await?;
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: vec![BookLevel {
                price: ticker.bid,
                amount: Decimal::ONE,
            }],
            asks: vec![BookLevel {
                price: ticker.ask,
                amount: Decimal::ONE,
            }],
            timestamp: ticker.timestamp,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let state = self.state.read().await;
        let candles = state.candles.get(symbol).cloned().unwrap_or_default();
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
        let mut state = self.state.write().await;

        if let Some(error) = state.injected_failures.pop_front() {
            debug!("PaperVenue: returning injected failure: {}", error);
            return Err(error);
        }

        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder {
                reason: format!("amount must be positive, got {}", amount),
            });
        }
        if order_type == OrderType::Limit && price.is_none() {
            return Err(ExchangeError::InvalidOrder {
                reason: "limit order requires a price".to_string(),
            });
        }

        let ticker = state.tickers.get(symbol).cloned();
        let order_id = state.next_order_id.to_string();
        state.next_order_id += 1;

        let mut order = VenueOrder {
            order_id: order_id.clone(),
            symbol: symbol.to_string(),
            side,
            order_type,
            price,
            amount,
            filled_amount: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            status: VenueOrderStatus::Unfilled,
            timestamp: Utc::now(),
        };

        match order_type {
            OrderType::Market => {
                let Some(ticker) = ticker else {
                    return Err(ExchangeError::InvalidOrder {
                        reason: format!("no market for {}", symbol),
                    });
                };
                let fill_price = match side {
                    OrderSide::Buy => ticker.ask,
                    OrderSide::Sell => ticker.bid,
                };
                order.status = VenueOrderStatus::FullyFilled;
                order.filled_amount = amount;
                order.avg_fill_price = fill_price;
            }
            OrderType::Limit => {
                let limit = price.expect("checked above");
                if let Some(ticker) = ticker {
                    let crosses = match side {
                        OrderSide::Buy => limit >= ticker.ask,
                        OrderSide::Sell => limit <= ticker.bid,
                    };
                    if crosses {
                        if params.post_only {
                            return Err(ExchangeError::InvalidOrder {
                                reason: "post-only order would cross the book".to_string(),
                            });
                        }
                        let fill_price = match side {
                            OrderSide::Buy => ticker.ask,
                            OrderSide::Sell => ticker.bid,
                        };
                        order.status = VenueOrderStatus::FullyFilled;
                        order.filled_amount = amount;
                        order.avg_fill_price = fill_price;
                    }
                }
            }
        }

        state.orders.insert(order_id, order.clone());
        let updates = if order.status == VenueOrderStatus::FullyFilled {
            vec![order.clone()]
        } else {
            Vec::new()
        };
        Self::notify(&mut state, updates);
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(order_id) else {
            return Err(ExchangeError::InvalidOrder {
                reason: format!("unknown order {}", order_id),
            });
        };
        if order.status.is_open() {
            order.status = if order.filled_amount.is_zero() {
                VenueOrderStatus::CancelledUnfilled
            } else {
                VenueOrderStatus::CancelledPartiallyFilled
            };
            order.timestamp = Utc::now();
            let update = order.clone();
            Self::notify(&mut state, vec![update]);
        }
        Ok(())
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>, ExchangeError> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.status.is_open())
            .cloned()
            .collect())
    }

    async fn subscribe_order_updates(&self) -> Option<Receiver<VenueOrder>> {
        let (tx, rx) = mpsc::channel(64);
        self.state.write().await.update_subs.push(tx);
        Some(rx)
    }
}
