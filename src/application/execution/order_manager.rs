use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, Notify, broadcast};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{GatewayError, OrderError};
use crate::domain::events::TradingEvent;
use crate::domain::ports::{ExchangeClient, OrderParams, VenueOrder, VenueOrderStatus};
use crate::domain::trading::fees::FeeModel;
use crate::domain::trading::types::{
    FillEvent, Liquidity, Order, OrderEvent, OrderIntent, OrderState, OrderType,
};
use crate::infrastructure::gateway::{RateLimitedGateway, RequestKind};

#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    /// Working orders older than this are cancelled.
    pub submit_timeout: Duration,
    /// Oldest queued intent is boosted past higher tiers after this wait.
    pub max_wait: Duration,
    /// Reconciliation poll cadence.
    pub poll_interval: Duration,
    /// Requeues allowed for pre-ack network failures before giving up.
    pub max_requeues: u32,
    pub margin_mode: bool,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(30),
            max_wait: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
            max_requeues: 3,
            margin_mode: true,
        }
    }
}

struct QueuedIntent {
    client_id: Uuid,
    enqueued_at: Instant,
    seq: u64,
}

struct ManagerState {
    queue: Vec<QueuedIntent>,
    orders: HashMap<Uuid, Order>,
    by_venue_id: HashMap<String, Uuid>,
    in_flight_signals: HashSet<Uuid>,
    deferred_cancels: HashSet<Uuid>,
    cancel_event_sent: HashSet<Uuid>,
    seq: u64,
}

impl ManagerState {
    /// Pop the next intent: strict priority with FIFO inside a tier, except
    /// that an intent waiting past `max_wait` jumps the queue so low tiers
    /// never starve.
    fn pop_next(&mut self, max_wait: Duration) -> Option<Uuid> {
        if self.queue.is_empty() {
            return None;
        }
        let now = Instant::now();
        let oldest_idx = self
            .queue
            .iter()
            .enumerate()
            .min_by_key(|(_, q)| q.seq)
            .map(|(i, _)| i)
            .expect("non-empty queue");
        let idx = if now.duration_since(self.queue[oldest_idx].enqueued_at) >= max_wait {
            oldest_idx
        } else {
            self.queue
                .iter()
                .enumerate()
                .max_by_key(|(_, q)| {
                    let priority = self
                        .orders
                        .get(&q.client_id)
                        .map(|o| o.intent.priority)
                        .unwrap_or(crate::domain::trading::types::OrderPriority::Low);
                    (priority, std::cmp::Reverse(q.seq))
                })
                .map(|(i, _)| i)
                .expect("non-empty queue")
        };
        Some(self.queue.swap_remove(idx).client_id)
    }
}

/// Order lifecycle owner: priority queue in front, state machine per order,
/// idempotent submission through the gateway, polled reconciliation behind.
pub struct OrderManager {
    config: OrderManagerConfig,
    gateway: Arc<RateLimitedGateway>,
    exchange: Arc<dyn ExchangeClient>,
    fee_model: Arc<FeeModel>,
    state: Mutex<ManagerState>,
    queue_notify: Notify,
    fill_tx: broadcast::Sender<FillEvent>,
    event_tx: UnboundedSender<TradingEvent>,
    symbols: Vec<String>,
}

impl OrderManager {
    pub fn new(
        config: OrderManagerConfig,
        gateway: Arc<RateLimitedGateway>,
        exchange: Arc<dyn ExchangeClient>,
        fee_model: Arc<FeeModel>,
        event_tx: UnboundedSender<TradingEvent>,
        symbols: Vec<String>,
    ) -> Self {
        let (fill_tx, _) = broadcast::channel(256);
        Self {
            config,
            gateway,
            exchange,
            fee_model,
            state: Mutex::new(ManagerState {
                queue: Vec::new(),
                orders: HashMap::new(),
                by_venue_id: HashMap::new(),
                in_flight_signals: HashSet::new(),
                deferred_cancels: HashSet::new(),
                cancel_event_sent: HashSet::new(),
                seq: 0,
            }),
            queue_notify: Notify::new(),
            fill_tx,
            event_tx,
            symbols,
        }
    }

    pub fn subscribe_fills(&self) -> broadcast::Receiver<FillEvent> {
        self.fill_tx.subscribe()
    }

    /// Accept an intent into the queue. At most one order per `signal_id`
    /// may be live (queued or on the venue) at any time.
    pub async fn submit(&self, intent: OrderIntent) -> Result<Uuid, OrderError> {
        if intent.amount <= Decimal::ZERO {
            return Err(OrderError::InvalidIntent {
                reason: format!("amount must be positive, got {}", intent.amount),
            });
        }
        if intent.order_type == OrderType::Limit && intent.price.is_none() {
            return Err(OrderError::InvalidIntent {
                reason: "limit intent requires a price".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        if state.in_flight_signals.contains(&intent.signal_id) {
            return Err(OrderError::DuplicateInFlight {
                signal_id: intent.signal_id,
            });
        }

        let order = Order::new(intent, Utc::now());
        let client_id = order.client_id;
        state.in_flight_signals.insert(order.intent.signal_id);
        state.seq += 1;
        let seq = state.seq;
        state.queue.push(QueuedIntent {
            client_id,
            enqueued_at: Instant::now(),
            seq,
        });
        info!(
            "OrderManager: accepted intent {} ({} {} {} @ {:?}, {})",
            client_id,
            order.intent.symbol,
            order.intent.side,
            order.intent.amount,
            order.intent.price,
            order.intent.priority
        );
        state.orders.insert(client_id, order);
        drop(state);

        self.queue_notify.notify_one();
        Ok(client_id)
    }

    /// Idempotent cancel. Terminal orders are a no-op returning their state;
    /// exactly one `OrderCancelled` event is ever emitted per order.
    pub async fn cancel(&self, client_id: Uuid) -> Result<OrderState, OrderError> {
        let (venue_id, symbol) = {
            let mut state = self.state.lock().await;
            let order = state
                .orders
                .get_mut(&client_id)
                .ok_or(OrderError::UnknownOrder {
                    order_id: client_id.to_string(),
                })?;

            match order.state {
                s if s.is_terminal() => return Ok(s),
                OrderState::Cancelling => return Ok(OrderState::Cancelling),
                OrderState::Pending => {
                    order.transition(OrderEvent::CancelRequest, Utc::now())?;
                    let signal_id = order.intent.signal_id;
                    let symbol = order.intent.symbol.clone();
                    let venue_id = order.venue_order_id.clone().unwrap_or_default();
                    state.queue.retain(|q| q.client_id != client_id);
                    state.in_flight_signals.remove(&signal_id);
                    self.emit_cancelled(&mut state, client_id, signal_id, venue_id, symbol);
                    return Ok(OrderState::Cancelled);
                }
                OrderState::Submitted => {
                    // No venue id yet; cancel right after the ack lands.
                    state.deferred_cancels.insert(client_id);
                    return Ok(OrderState::Submitted);
                }
                OrderState::Working => {
                    order.transition(OrderEvent::CancelRequest, Utc::now())?;
                    (
                        order.venue_order_id.clone().unwrap_or_default(),
                        order.intent.symbol.clone(),
                    )
                }
                s => return Ok(s),
            }
        };

        self.request_venue_cancel(client_id, &venue_id, &symbol).await;
        Ok(OrderState::Cancelling)
    }

    async fn request_venue_cancel(&self, client_id: Uuid, venue_id: &str, symbol: &str) {
        let exchange = Arc::clone(&self.exchange);
        let venue_id_owned = venue_id.to_string();
        let symbol_owned = symbol.to_string();
        let result = self
            .gateway
            .execute(RequestKind::Post, || {
                let exchange = Arc::clone(&exchange);
                let venue_id = venue_id_owned.clone();
                let symbol = symbol_owned.clone();
                async move { exchange.cancel_order(&venue_id, &symbol).await }
            })
            .await;

        match result {
            Ok(()) => {
                let mut state = self.state.lock().await;
                if let Some(order) = state.orders.get_mut(&client_id) {
                    if order.state == OrderState::Cancelling {
                        let _ = order.transition(OrderEvent::CancelAck, Utc::now());
                        let signal_id = order.intent.signal_id;
                        let symbol = order.intent.symbol.clone();
                        let venue_id = order.venue_order_id.clone().unwrap_or_default();
                        state.in_flight_signals.remove(&signal_id);
                        self.emit_cancelled(&mut state, client_id, signal_id, venue_id, symbol);
                    }
                }
            }
            Err(e) => {
                // The reconcile poll resolves the order's true fate.
                warn!("OrderManager: cancel of {} failed, will reconcile: {}", client_id, e);
            }
        }
    }

    fn emit_cancelled(
        &self,
        state: &mut ManagerState,
        client_id: Uuid,
        signal_id: Uuid,
        order_id: String,
        symbol: String,
    ) {
        if !state.cancel_event_sent.insert(client_id) {
            return;
        }
        let _ = self.event_tx.send(TradingEvent::OrderCancelled {
            signal_id,
            order_id,
            symbol,
            timestamp: Utc::now(),
        });
    }

    pub async fn order(&self, client_id: Uuid) -> Option<Order> {
        self.state.lock().await.orders.get(&client_id).cloned()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Number of orders in a non-terminal state for this signal.
    pub async fn live_orders_for_signal(&self, signal_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.intent.signal_id == signal_id && !o.state.is_terminal())
            .count()
    }

    /// Main loop: drain the queue, poll reconciliation, sweep timeouts.
    /// Runs until the task is aborted by the orchestrator's shutdown.
    pub async fn run(self: Arc<Self>) {
        info!("OrderManager: started");
        let mut updates = self.exchange.subscribe_order_updates().await;
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.queue_notify.notified() => {
                    self.drain_queue().await;
                }

                update = async {
                    match updates.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match update {
                        Some(venue_order) => self.apply_venue_update(venue_order).await,
                        None => updates = None,
                    }
                }

                _ = poll.tick() => {
                    self.poll_reconcile().await;
                    self.sweep_timeouts().await;
                    self.drain_queue().await;
                }
            }
        }
    }

    /// Submit queued intents one at a time; the single consumer preserves
    /// the priority order of actual venue submissions.
    pub async fn drain_queue(&self) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                state.pop_next(self.config.max_wait)
            };
            let Some(client_id) = next else { break };
            self.submit_to_venue(client_id).await;
        }
    }

    async fn submit_to_venue(&self, client_id: Uuid) {
        let intent = {
            let mut state = self.state.lock().await;
            let Some(order) = state.orders.get_mut(&client_id) else {
                return;
            };
            if order.state != OrderState::Pending {
                return;
            }
            if order.transition(OrderEvent::Submit, Utc::now()).is_err() {
                return;
            }
            order.intent.clone()
        };

        let exchange = Arc::clone(&self.exchange);
        let params = OrderParams {
            post_only: intent.post_only,
            margin: self.config.margin_mode,
        };
        let result = self
            .gateway
            .execute(RequestKind::Post, || {
                let exchange = Arc::clone(&exchange);
                let intent = intent.clone();
                let params = params.clone();
                async move {
                    exchange
                        .create_order(
                            &intent.symbol,
                            intent.side,
                            intent.order_type,
                            intent.amount,
                            intent.price,
                            params,
                        )
                        .await
                }
            })
            .await;

        match result {
            Ok(venue_order) => self.on_ack(client_id, venue_order).await,
            Err(GatewayError::Rejected { source }) => {
                let mut state = self.state.lock().await;
                if let Some(order) = state.orders.get_mut(&client_id) {
                    error!("OrderManager: order {} rejected by venue: {}", client_id, source);
                    order.last_error = Some(source.to_string());
                    let _ = order.transition(OrderEvent::ServerReject, Utc::now());
                    let signal_id = order.intent.signal_id;
                    state.in_flight_signals.remove(&signal_id);
                    state.deferred_cancels.remove(&client_id);
                }
            }
            Err(e) => {
                // Pre-ack transport failure: the order never reached the
                // venue, so requeueing cannot produce a duplicate.
                let requeued = {
                    let mut state = self.state.lock().await;
                    let mut requeued = false;
                    if let Some(order) = state.orders.get_mut(&client_id) {
                        order.retry_count += 1;
                        order.last_error = Some(e.to_string());
                        if order.retry_count > self.config.max_requeues {
                            error!(
                                "OrderManager: order {} abandoned after {} requeues",
                                client_id, order.retry_count
                            );
                            let _ = order.transition(OrderEvent::ServerReject, Utc::now());
                            let signal_id = order.intent.signal_id;
                            state.in_flight_signals.remove(&signal_id);
                        } else {
                            warn!(
                                "OrderManager: order {} requeued after network error ({})",
                                client_id, e
                            );
                            let _ = order.transition(OrderEvent::NetworkError, Utc::now());
                            state.seq += 1;
                            let seq = state.seq;
                            state.queue.push(QueuedIntent {
                                client_id,
                                enqueued_at: Instant::now(),
                                seq,
                            });
                            requeued = true;
                        }
                    }
                    requeued
                };
                if requeued {
                    self.queue_notify.notify_one();
                }
            }
        }
    }

    async fn on_ack(&self, client_id: Uuid, venue_order: VenueOrder) {
        let deferred_cancel = {
            let mut state = self.state.lock().await;
            let Some(order) = state.orders.get_mut(&client_id) else {
                return;
            };
            order.venue_order_id = Some(venue_order.order_id.clone());
            order.submitted_at = Some(Utc::now());
            if order.transition(OrderEvent::Ack, Utc::now()).is_err() {
                return;
            }
            let intent = order.intent.clone();
            state
                .by_venue_id
                .insert(venue_order.order_id.clone(), client_id);

            let _ = self.event_tx.send(TradingEvent::OrderSubmitted {
                signal_id: intent.signal_id,
                order_id: venue_order.order_id.clone(),
                symbol: intent.symbol.clone(),
                side: intent.side,
                amount: intent.amount,
                price: intent.price,
                priority: intent.priority,
                timestamp: Utc::now(),
            });
            state.deferred_cancels.remove(&client_id)
        };

        // The ack may already carry fills (market orders).
        self.apply_venue_update(venue_order).await;

        if deferred_cancel {
            let _ = self.cancel(client_id).await;
        }
    }

    /// Reconcile one venue-side order report into the local state machine.
    async fn apply_venue_update(&self, venue_order: VenueOrder) {
        let mut fill_event = None;
        {
            let mut state = self.state.lock().await;
            let Some(&client_id) = state.by_venue_id.get(&venue_order.order_id) else {
                return;
            };
            let Some(order) = state.orders.get_mut(&client_id) else {
                return;
            };
            if order.state.is_terminal() {
                return;
            }

            let previously_filled = order.filled_amount;
            order.filled_amount = venue_order.filled_amount;
            if venue_order.avg_fill_price > Decimal::ZERO {
                order.avg_fill_price = venue_order.avg_fill_price;
            }

            match venue_order.status {
                VenueOrderStatus::Unfilled => {}
                VenueOrderStatus::PartiallyFilled => {
                    if venue_order.filled_amount > previously_filled
                        && order.state == OrderState::Working
                    {
                        let _ = order.transition(OrderEvent::PartialFill, Utc::now());
                        debug!(
                            "OrderManager: order {} partial fill {}/{}",
                            client_id, order.filled_amount, order.intent.amount
                        );
                    }
                }
                VenueOrderStatus::FullyFilled => {
                    if order.transition(OrderEvent::Fill, Utc::now()).is_ok() {
                        let liquidity = self.classify_fill(order);
                        let quote = self.fee_model.quote(
                            &order.intent.symbol,
                            liquidity,
                            order.filled_amount,
                            order.avg_fill_price,
                        );
                        order.fee_paid = quote.expected_fee;
                        let signal_id = order.intent.signal_id;
                        let delta = match order.intent.side {
                            crate::domain::trading::types::OrderSide::Buy => order.filled_amount,
                            crate::domain::trading::types::OrderSide::Sell => -order.filled_amount,
                        };
                        fill_event = Some(FillEvent {
                            order_id: venue_order.order_id.clone(),
                            signal_id,
                            symbol: order.intent.symbol.clone(),
                            side: order.intent.side,
                            amount: order.filled_amount,
                            price: order.avg_fill_price,
                            position_delta: delta,
                            fee_paid: order.fee_paid,
                            liquidity,
                            timestamp: Utc::now(),
                        });
                        let _ = self.event_tx.send(TradingEvent::OrderFilled {
                            signal_id,
                            order_id: venue_order.order_id.clone(),
                            symbol: order.intent.symbol.clone(),
                            amount: order.filled_amount,
                            avg_price: order.avg_fill_price,
                            fee_paid: order.fee_paid,
                            timestamp: Utc::now(),
                        });
                        state.in_flight_signals.remove(&signal_id);
                        state.deferred_cancels.remove(&client_id);
                    }
                }
                VenueOrderStatus::CancelledUnfilled
                | VenueOrderStatus::CancelledPartiallyFilled => {
                    if order.state == OrderState::Working {
                        let _ = order.transition(OrderEvent::CancelRequest, Utc::now());
                    }
                    if order.state == OrderState::Cancelling {
                        let _ = order.transition(OrderEvent::CancelAck, Utc::now());
                        let signal_id = order.intent.signal_id;
                        let symbol = order.intent.symbol.clone();
                        state.in_flight_signals.remove(&signal_id);
                        self.emit_cancelled(
                            &mut state,
                            client_id,
                            signal_id,
                            venue_order.order_id.clone(),
                            symbol,
                        );
                    }
                }
                VenueOrderStatus::Expired => {
                    if order.state == OrderState::Working {
                        let _ = order.transition(OrderEvent::Expire, Utc::now());
                        let signal_id = order.intent.signal_id;
                        state.in_flight_signals.remove(&signal_id);
                    }
                }
            }
        }

        if let Some(event) = fill_event {
            info!(
                "OrderManager: order {} filled {} @ {} (fee {})",
                event.order_id, event.amount, event.price, event.fee_paid
            );
            let _ = self.fill_tx.send(event);
        }
    }

    /// Maker/taker attribution for fee accounting: markets take, post-only
    /// rests, and a plain limit that filled at its own price rested.
    fn classify_fill(&self, order: &Order) -> Liquidity {
        match order.intent.order_type {
            OrderType::Market => Liquidity::Taker,
            OrderType::Limit if order.intent.post_only => Liquidity::Maker,
            OrderType::Limit => match order.intent.price {
                Some(price) if order.avg_fill_price == price => Liquidity::Maker,
                _ => Liquidity::Taker,
            },
        }
    }

    async fn poll_reconcile(&self) {
        for symbol in &self.symbols {
            let exchange = Arc::clone(&self.exchange);
            let symbol_owned = symbol.clone();
            let result = self
                .gateway
                .execute(RequestKind::Get, || {
                    let exchange = Arc::clone(&exchange);
                    let symbol = symbol_owned.clone();
                    async move { exchange.fetch_open_orders(&symbol).await }
                })
                .await;
            match result {
                Ok(open_orders) => {
                    for venue_order in open_orders {
                        self.apply_venue_update(venue_order).await;
                    }
                }
                Err(e) => {
                    debug!("OrderManager: reconcile poll failed for {}: {}", symbol, e);
                }
            }
        }
    }

    /// Cancel working orders that outlived the submit timeout.
    async fn sweep_timeouts(&self) {
        let stale: Vec<(Uuid, String, String)> = {
            let mut state = self.state.lock().await;
            let now = Utc::now();
            let timeout = chrono::Duration::from_std(self.config.submit_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
            let mut stale = Vec::new();
            for (client_id, order) in state.orders.iter_mut() {
                if order.state != OrderState::Working {
                    continue;
                }
                let Some(submitted_at) = order.submitted_at else {
                    continue;
                };
                if now - submitted_at >= timeout {
                    warn!("OrderManager: order {} timed out, cancelling", client_id);
                    if order.transition(OrderEvent::Timeout, Utc::now()).is_ok() {
                        stale.push((
                            *client_id,
                            order.venue_order_id.clone().unwrap_or_default(),
                            order.intent.symbol.clone(),
                        ));
                    }
                }
            }
            stale
        };

        for (client_id, venue_id, symbol) in stale {
            self.request_venue_cancel(client_id, &venue_id, &symbol).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::fees::FeeRates;
    use crate::domain::trading::types::{OrderPriority, OrderSide};
    use crate::infrastructure::gateway::GatewayConfig;
    use crate::infrastructure::venue::paper::PaperVenue;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn fee_model() -> Arc<FeeModel> {
        Arc::new(FeeModel::new(
            FeeRates {
                maker: dec!(-0.0002),
                taker: dec!(0.0012),
            },
            0.7,
        ))
    }

    async fn setup() -> (Arc<OrderManager>, PaperVenue, mpsc::UnboundedReceiver<TradingEvent>) {
        let venue = PaperVenue::new();
        venue
            .set_ticker("BTC/JPY", dec!(4999500), dec!(5000500), dec!(5000000))
            .await;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(OrderManager::new(
            OrderManagerConfig {
                poll_interval: Duration::from_millis(50),
                ..OrderManagerConfig::default()
            },
            Arc::new(RateLimitedGateway::new(GatewayConfig::default())),
            Arc::new(venue.clone()),
            fee_model(),
            event_tx,
            vec!["BTC/JPY".to_string()],
        ));
        (manager, venue, event_rx)
    }

    fn intent(signal_id: Uuid, price: Decimal, priority: OrderPriority) -> OrderIntent {
        OrderIntent {
            signal_id,
            symbol: "BTC/JPY".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            amount: dec!(0.01),
            price: Some(price),
            priority,
            post_only: true,
        }
    }

    #[tokio::test]
    async fn test_submit_and_fill_via_updates() {
        let (manager, venue, _events) = setup().await;
        let runner = Arc::clone(&manager);
        let handle = tokio::spawn(async move { runner.run().await });

        let mut fills = manager.subscribe_fills();
        let signal_id = Uuid::new_v4();
        let client_id = manager
            .submit(intent(signal_id, dec!(4999000), OrderPriority::Medium))
            .await
            .unwrap();

        // Wait for the ack to land, then cross the book.
        tokio::time::sleep(Duration::from_millis(100)).await;
        venue
            .set_ticker("BTC/JPY", dec!(4998000), dec!(4999000), dec!(4998500))
            .await;

        let fill = tokio::time::timeout(Duration::from_secs(2), fills.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fill.signal_id, signal_id);
        assert_eq!(fill.amount, dec!(0.01));
        assert_eq!(fill.liquidity, Liquidity::Maker);
        // Maker rebate on 0.01 @ 4999000.
        assert_eq!(fill.fee_paid, dec!(-9.998));

        let order = manager.order(client_id).await.unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.filled_amount, order.intent.amount);
        handle.abort();
    }

    #[tokio::test]
    async fn test_duplicate_signal_rejected_until_terminal() {
        let (manager, venue, _events) = setup().await;
        let runner = Arc::clone(&manager);
        let handle = tokio::spawn(async move { runner.run().await });

        let signal_id = Uuid::new_v4();
        let client_id = manager
            .submit(intent(signal_id, dec!(4999000), OrderPriority::Medium))
            .await
            .unwrap();

        let err = manager
            .submit(intent(signal_id, dec!(4998000), OrderPriority::Medium))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::DuplicateInFlight { .. }));
        assert_eq!(manager.live_orders_for_signal(signal_id).await, 1);

        // Fill it, then the same signal id is accepted again.
        tokio::time::sleep(Duration::from_millis(100)).await;
        venue
            .set_ticker("BTC/JPY", dec!(4998000), dec!(4999000), dec!(4998500))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.live_orders_for_signal(signal_id).await, 0);

        let second = manager
            .submit(intent(signal_id, dec!(4998000), OrderPriority::Medium))
            .await
            .unwrap();
        assert_ne!(second, client_id);
        handle.abort();
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_with_one_event() {
        let (manager, _venue, mut events) = setup().await;
        let runner = Arc::clone(&manager);
        let handle = tokio::spawn(async move { runner.run().await });

        let client_id = manager
            .submit(intent(Uuid::new_v4(), dec!(4990000), OrderPriority::Low))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let first = manager.cancel(client_id).await.unwrap();
        // Allow the cancel round trip to finish, then cancel repeatedly.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = manager.cancel(client_id).await.unwrap();
        let third = manager.cancel(client_id).await.unwrap();
        assert!(matches!(first, OrderState::Cancelling | OrderState::Cancelled));
        assert_eq!(second, OrderState::Cancelled);
        assert_eq!(third, OrderState::Cancelled);

        let mut cancelled_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TradingEvent::OrderCancelled { .. }) {
                cancelled_events += 1;
            }
        }
        assert_eq!(cancelled_events, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_priority_order_of_submission() {
        let (manager, venue, mut events) = setup().await;

        // Enqueue low first, then critical; drain must send critical first.
        manager
            .submit(intent(Uuid::new_v4(), dec!(4990000), OrderPriority::Low))
            .await
            .unwrap();
        manager
            .submit(intent(Uuid::new_v4(), dec!(4991000), OrderPriority::Critical))
            .await
            .unwrap();
        manager.drain_queue().await;

        let mut submitted_prices = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TradingEvent::OrderSubmitted { price, .. } = event {
                submitted_prices.push(price.unwrap());
            }
        }
        assert_eq!(submitted_prices, vec![dec!(4991000), dec!(4990000)]);
        assert_eq!(venue.fetch_open_orders("BTC/JPY").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_server_reject_is_terminal() {
        let (manager, venue, _events) = setup().await;
        venue
            .inject_failure(crate::domain::errors::ExchangeError::InvalidOrder {
                reason: "amount below minimum".to_string(),
            })
            .await;

        let client_id = manager
            .submit(intent(Uuid::new_v4(), dec!(4990000), OrderPriority::Medium))
            .await
            .unwrap();
        manager.drain_queue().await;

        let order = manager.order(client_id).await.unwrap();
        assert_eq!(order.state, OrderState::Rejected);
        assert!(order.last_error.is_some());
        // Terminal rejection released the idempotency lock.
        assert_eq!(
            manager.live_orders_for_signal(order.intent.signal_id).await,
            0
        );
    }

    #[tokio::test]
    async fn test_partial_fills_accumulate_then_complete() {
        let (manager, venue, _events) = setup().await;
        let mut fills = manager.subscribe_fills();

        let client_id = manager
            .submit(intent(Uuid::new_v4(), dec!(4990000), OrderPriority::Medium))
            .await
            .unwrap();
        manager.drain_queue().await;
        let venue_id = manager.order(client_id).await.unwrap().venue_order_id.unwrap();

        venue.partial_fill(&venue_id, dec!(0.004), dec!(4990000)).await;
        // The update channel is only read by the run loop; reconcile directly.
        let update = venue.order(&venue_id).await.unwrap();
        manager.apply_venue_update(update).await;

        let order = manager.order(client_id).await.unwrap();
        assert_eq!(order.state, OrderState::Working);
        assert_eq!(order.filled_amount, dec!(0.004));

        venue.partial_fill(&venue_id, dec!(0.006), dec!(4990000)).await;
        let update = venue.order(&venue_id).await.unwrap();
        manager.apply_venue_update(update).await;

        let order = manager.order(client_id).await.unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.filled_amount, order.intent.amount);

        // Exactly one fill event, for the completed amount.
        let fill = fills.try_recv().unwrap();
        assert_eq!(fill.amount, dec!(0.01));
        assert!(fills.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_starved_low_priority_gets_boosted() {
        let venue = PaperVenue::new();
        venue
            .set_ticker("BTC/JPY", dec!(4999500), dec!(5000500), dec!(5000000))
            .await;
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let manager = Arc::new(OrderManager::new(
            OrderManagerConfig {
                max_wait: Duration::from_millis(50),
                ..OrderManagerConfig::default()
            },
            Arc::new(RateLimitedGateway::new(GatewayConfig::default())),
            Arc::new(venue.clone()),
            fee_model(),
            event_tx,
            vec!["BTC/JPY".to_string()],
        ));

        manager
            .submit(intent(Uuid::new_v4(), dec!(4990000), OrderPriority::Low))
            .await
            .unwrap();
        // Let the low-tier intent age past max_wait, then stack critical work.
        tokio::time::sleep(Duration::from_millis(80)).await;
        manager
            .submit(intent(Uuid::new_v4(), dec!(4991000), OrderPriority::Critical))
            .await
            .unwrap();
        manager.drain_queue().await;

        let mut submitted_prices = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TradingEvent::OrderSubmitted { price, .. } = event {
                submitted_prices.push(price.unwrap());
            }
        }
        // The starved low-priority intent jumps the critical one.
        assert_eq!(submitted_prices, vec![dec!(4990000), dec!(4991000)]);
    }

    #[tokio::test]
    async fn test_queued_cancel_never_reaches_venue() {
        let (manager, venue, _events) = setup().await;
        let client_id = manager
            .submit(intent(Uuid::new_v4(), dec!(4990000), OrderPriority::Medium))
            .await
            .unwrap();
        // Cancel while still queued (no run loop draining).
        let state = manager.cancel(client_id).await.unwrap();
        assert_eq!(state, OrderState::Cancelled);
        manager.drain_queue().await;
        assert!(venue.fetch_open_orders("BTC/JPY").await.unwrap().is_empty());
    }
}
