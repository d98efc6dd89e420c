use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::OrderError;
use crate::domain::market::types::Ticker;
use crate::domain::ports::ExchangeClient;
use crate::domain::trading::fees::FeeModel;
use crate::domain::trading::types::{
    FillEvent, Liquidity, OrderIntent, OrderPriority, OrderSide, OrderState, OrderType,
    TradeSignal,
};
use crate::application::execution::order_manager::OrderManager;
use crate::infrastructure::gateway::{RateLimitedGateway, RequestKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvoidanceStrategy {
    /// Maker order posted and filled before the deadline.
    MakerSubstitution,
    /// Maker attempt abandoned; filled as taker instead.
    TakerFallback,
}

#[derive(Debug, Clone)]
pub struct AvoidanceReport {
    pub strategy: AvoidanceStrategy,
    pub client_id: Uuid,
    pub fill: Option<FillEvent>,
    /// Baseline taker fee minus realised fee; negative when the detour cost
    /// more than taking immediately would have.
    pub fee_delta: Decimal,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
pub struct TakerAvoidanceConfig {
    pub deadline: Duration,
    pub poll_interval: Duration,
    /// Relative adverse move of the touch that abandons the maker attempt.
    pub adverse_tolerance: Decimal,
    pub price_tick: Decimal,
}

impl Default for TakerAvoidanceConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            adverse_tolerance: Decimal::new(1, 3),
            price_tick: Decimal::ONE,
        }
    }
}

/// When a signal maps to a taker fill but is not urgent, try a priced maker
/// order one tick inside the touch first, falling back to taker at the
/// deadline or on an adverse book move.
pub struct TakerAvoidancePlanner {
    config: TakerAvoidanceConfig,
    fee_model: Arc<FeeModel>,
    gateway: Arc<RateLimitedGateway>,
    exchange: Arc<dyn ExchangeClient>,
}

impl TakerAvoidancePlanner {
    pub fn new(
        config: TakerAvoidanceConfig,
        fee_model: Arc<FeeModel>,
        gateway: Arc<RateLimitedGateway>,
        exchange: Arc<dyn ExchangeClient>,
    ) -> Self {
        Self {
            config,
            fee_model,
            gateway,
            exchange,
        }
    }

    /// Price one tick inside the opposite touch, capped by the signal's own
    /// target so we never bid above (or offer below) what the signal wanted.
    fn maker_price(&self, side: OrderSide, signal: &TradeSignal, ticker: &Ticker) -> Decimal {
        match side {
            OrderSide::Buy => (ticker.ask - self.config.price_tick).min(signal.target_price),
            OrderSide::Sell => (ticker.bid + self.config.price_tick).max(signal.target_price),
        }
    }

    /// Run the avoidance attempt to a fill. Returns the report including the
    /// final fill event when one arrived inside the wait budgets.
    pub async fn execute(
        &self,
        signal: &TradeSignal,
        side: OrderSide,
        amount: Decimal,
        priority: OrderPriority,
        ticker: &Ticker,
        order_manager: &Arc<OrderManager>,
    ) -> Result<AvoidanceReport, OrderError> {
        let baseline_taker_price = match side {
            OrderSide::Buy => ticker.ask,
            OrderSide::Sell => ticker.bid,
        };
        let baseline_fee = self
            .fee_model
            .quote(&signal.symbol, Liquidity::Taker, amount, baseline_taker_price)
            .expected_fee;

        let maker_price = self.maker_price(side, signal, ticker);
        let mut fills = order_manager.subscribe_fills();

        let client_id = order_manager
            .submit(OrderIntent {
                signal_id: signal.id,
                symbol: signal.symbol.clone(),
                side,
                order_type: OrderType::Limit,
                amount,
                price: Some(maker_price),
                priority,
                post_only: true,
            })
            .await?;
        info!(
            "TakerAvoidance: posted maker order {} at {} (deadline {:?})",
            client_id, maker_price, self.config.deadline
        );

        let deadline = Instant::now() + self.config.deadline;
        loop {
            let now = Instant::now();
            if now >= deadline {
                info!("TakerAvoidance: deadline reached, falling back to taker");
                break;
            }
            let wait = self.config.poll_interval.min(deadline - now);

            match tokio::time::timeout(wait, fills.recv()).await {
                Ok(Ok(fill)) if fill.signal_id == signal.id => {
                    let fee_delta = baseline_fee - fill.fee_paid;
                    info!(
                        "TakerAvoidance: maker fill at {}, fee saved {}",
                        fill.price, fee_delta
                    );
                    return Ok(AvoidanceReport {
                        strategy: AvoidanceStrategy::MakerSubstitution,
                        client_id,
                        fill: Some(fill),
                        fee_delta,
                        succeeded: true,
                    });
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => break,
                Err(_) => {
                    // Poll tick: check for an adverse move of the touch.
                    if self.book_moved_adversely(signal, side, maker_price).await {
                        warn!("TakerAvoidance: book moved adversely, abandoning maker attempt");
                        break;
                    }
                }
            }
        }

        // Abandon the maker order. A fill can still race the cancel; if it
        // does, the manager reports Filled and we count it a success.
        order_manager.cancel(client_id).await?;
        let settled = self
            .await_terminal(order_manager, client_id, Duration::from_secs(5))
            .await;
        if settled == Some(OrderState::Filled) {
            let order = order_manager.order(client_id).await;
            let fee_paid = order.map(|o| o.fee_paid).unwrap_or(Decimal::ZERO);
            return Ok(AvoidanceReport {
                strategy: AvoidanceStrategy::MakerSubstitution,
                client_id,
                fill: None,
                fee_delta: baseline_fee - fee_paid,
                succeeded: true,
            });
        }

        // Taker fallback at the market.
        let fallback_id = order_manager
            .submit(OrderIntent {
                signal_id: signal.id,
                symbol: signal.symbol.clone(),
                side,
                order_type: OrderType::Market,
                amount,
                price: None,
                priority,
                post_only: false,
            })
            .await?;

        let fill = self
            .await_fill(&mut fills, signal.id, Duration::from_secs(30))
            .await;
        let fee_delta = fill
            .as_ref()
            .map(|f| baseline_fee - f.fee_paid)
            .unwrap_or(Decimal::ZERO);
        info!(
            "TakerAvoidance: taker fallback {} (fee delta {})",
            fallback_id, fee_delta
        );
        Ok(AvoidanceReport {
            strategy: AvoidanceStrategy::TakerFallback,
            client_id: fallback_id,
            fill,
            fee_delta,
            succeeded: false,
        })
    }

    async fn book_moved_adversely(
        &self,
        signal: &TradeSignal,
        side: OrderSide,
        maker_price: Decimal,
    ) -> bool {
        let exchange = Arc::clone(&self.exchange);
        let symbol = signal.symbol.clone();
        let ticker = self
            .gateway
            .execute(RequestKind::Get, || {
                let exchange = Arc::clone(&exchange);
                let symbol = symbol.clone();
                async move { exchange.fetch_ticker(&symbol).await }
            })
            .await;
        let Ok(ticker) = ticker else {
            return false;
        };
        let tolerance = maker_price * self.config.adverse_tolerance;
        match side {
            OrderSide::Buy => ticker.ask > maker_price + tolerance,
            OrderSide::Sell => ticker.bid < maker_price - tolerance,
        }
    }

    async fn await_terminal(
        &self,
        order_manager: &Arc<OrderManager>,
        client_id: Uuid,
        timeout: Duration,
    ) -> Option<OrderState> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = order_manager.order(client_id).await.map(|o| o.state)?;
            if state.is_terminal() {
                return Some(state);
            }
            if Instant::now() >= deadline {
                return Some(state);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn await_fill(
        &self,
        fills: &mut tokio::sync::broadcast::Receiver<FillEvent>,
        signal_id: Uuid,
        timeout: Duration,
    ) -> Option<FillEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match tokio::time::timeout(deadline - now, fills.recv()).await {
                Ok(Ok(fill)) if fill.signal_id == signal_id => return Some(fill),
                Ok(Ok(_)) => continue,
                _ => return None,
            }
        }
    }
}
