use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify, Semaphore, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::execution::order_manager::OrderManager;
use crate::application::execution::taker_avoidance::{AvoidanceStrategy, TakerAvoidancePlanner};
use crate::application::position::tracker::PositionTracker;
use crate::domain::errors::{OrderError, SubmitError};
use crate::domain::events::TradingEvent;
use crate::domain::market::types::MarketSnapshot;
use crate::domain::ports::ExchangeClient;
use crate::domain::risk::evaluator::{RiskDecision, RiskEvaluator};
use crate::domain::trading::fees::{FeeModel, FeePerformance};
use crate::domain::trading::types::{
    FillEvent, Liquidity, OrderIntent, OrderPriority, OrderType, TradeRecord, TradeSignal,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::gateway::{RateLimitedGateway, RequestKind};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_executions: usize,
    pub execution_timeout: Duration,
    pub submission_queue_capacity: usize,
    /// Urgency at or above this maps straight to a market order.
    pub taker_urgency_threshold: f64,
    pub candle_history: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
            execution_timeout: Duration::from_secs(300),
            submission_queue_capacity: 32,
            taker_urgency_threshold: 0.7,
            candle_history: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Denied,
    Failed,
    Cancelled,
    TimedOut,
}

/// Final account of one execution, also published as a
/// `CompletedExecution` event.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub execution_id: Uuid,
    pub signal_id: Uuid,
    pub status: ExecutionStatus,
    pub duration: Duration,
    pub fee_saved: Decimal,
    pub fill: Option<FillEvent>,
    pub reasons: Vec<String>,
}

/// Handle returned by `submit`. Supports cooperative cancellation and
/// awaiting the outcome.
#[derive(Debug)]
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    outcome: oneshot::Receiver<ExecutionOutcome>,
}

impl ExecutionHandle {
    /// Request cancellation. The running phases observe it at their next
    /// suspension point; any in-flight order is cancelled. A permit is
    /// stored, so cancelling before the execution is dispatched also works.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_one();
    }

    pub async fn outcome(self) -> Option<ExecutionOutcome> {
        self.outcome.await.ok()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub denied: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub total_fee_saved: Decimal,
    pub avg_execution_ms: f64,
}

struct ExecutionJob {
    execution_id: Uuid,
    signal: TradeSignal,
    cancel: Arc<Notify>,
    outcome_tx: oneshot::Sender<ExecutionOutcome>,
}

/// End-to-end pipeline: signal → risk → fee optimisation → taker avoidance →
/// rate-limited submission → position tracking → completion event.
pub struct ExecutionOrchestrator {
    config: OrchestratorConfig,
    evaluator: Arc<Mutex<RiskEvaluator>>,
    fee_model: Arc<FeeModel>,
    planner: Arc<TakerAvoidancePlanner>,
    order_manager: Arc<OrderManager>,
    tracker: Arc<PositionTracker>,
    gateway: Arc<RateLimitedGateway>,
    exchange: Arc<dyn ExchangeClient>,
    event_bus: EventBus,
    event_tx: UnboundedSender<TradingEvent>,
    job_tx: mpsc::Sender<ExecutionJob>,
    job_rx: Mutex<Option<mpsc::Receiver<ExecutionJob>>>,
    event_rx: Mutex<Option<UnboundedReceiver<TradingEvent>>>,
    record_rx: Mutex<Option<UnboundedReceiver<TradeRecord>>>,
    permits: Arc<Semaphore>,
    shutting_down: AtomicBool,
    metrics: Mutex<ExecutionMetrics>,
    fee_performance: Mutex<FeePerformance>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ExecutionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        evaluator: RiskEvaluator,
        fee_model: Arc<FeeModel>,
        planner: Arc<TakerAvoidancePlanner>,
        order_manager: Arc<OrderManager>,
        tracker: Arc<PositionTracker>,
        gateway: Arc<RateLimitedGateway>,
        exchange: Arc<dyn ExchangeClient>,
        event_bus: EventBus,
        event_tx: UnboundedSender<TradingEvent>,
        event_rx: UnboundedReceiver<TradingEvent>,
        record_rx: UnboundedReceiver<TradeRecord>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.submission_queue_capacity);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_executions));
        Self {
            config,
            evaluator: Arc::new(Mutex::new(evaluator)),
            fee_model,
            planner,
            order_manager,
            tracker,
            gateway,
            exchange,
            event_bus,
            event_tx,
            job_tx,
            job_rx: Mutex::new(Some(job_rx)),
            event_rx: Mutex::new(Some(event_rx)),
            record_rx: Mutex::new(Some(record_rx)),
            permits,
            shutting_down: AtomicBool::new(false),
            metrics: Mutex::new(ExecutionMetrics::default()),
            fee_performance: Mutex::new(FeePerformance::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the background machinery: order manager, position tracker,
    /// event forwarding, and the execution dispatcher.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;

        let manager = Arc::clone(&self.order_manager);
        tasks.push(tokio::spawn(manager.run()));

        let tracker = Arc::clone(&self.tracker);
        tasks.push(tokio::spawn(tracker.run()));

        if let Some(event_rx) = self.event_rx.lock().await.take() {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                this.forward_events(event_rx).await;
            }));
        }
        if let Some(record_rx) = self.record_rx.lock().await.take() {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                this.consume_trade_records(record_rx).await;
            }));
        }
        if let Some(job_rx) = self.job_rx.lock().await.take() {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                this.dispatch_jobs(job_rx).await;
            }));
        }
        info!("ExecutionOrchestrator: started");
    }

    /// Structured shutdown: stop intake, drain running executions, stop the
    /// background tasks, persist state last.
    pub async fn stop(self: &Arc<Self>) {
        info!("ExecutionOrchestrator: shutting down");
        self.shutting_down.store(true, Ordering::SeqCst);

        // Wait for active executions to finish, bounded by the timeout.
        let drain = self
            .permits
            .clone()
            .acquire_many_owned(self.config.max_concurrent_executions as u32);
        if tokio::time::timeout(self.config.execution_timeout, drain)
            .await
            .is_err()
        {
            warn!("ExecutionOrchestrator: executions still running at shutdown deadline");
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.evaluator.lock().await.drawdown_mut().save();
        info!("ExecutionOrchestrator: stopped");
    }

    /// Accept a signal for execution. Returns a typed queue-full error under
    /// backpressure; the strategy layer decides whether to drop or delay.
    pub async fn submit(&self, signal: TradeSignal) -> Result<ExecutionHandle, SubmitError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SubmitError::ShuttingDown);
        }
        let execution_id = Uuid::new_v4();
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let _ = self.event_tx.send(TradingEvent::SignalReceived {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            source: signal.source.clone(),
            timestamp: Utc::now(),
        });

        let job = ExecutionJob {
            execution_id,
            signal,
            cancel: Arc::clone(&cancel),
            outcome_tx,
        };
        self.job_tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull {
                capacity: self.config.submission_queue_capacity,
            },
            mpsc::error::TrySendError::Closed(_) => SubmitError::ShuttingDown,
        })?;

        self.metrics.lock().await.submitted += 1;
        Ok(ExecutionHandle {
            execution_id,
            cancel,
            cancelled,
            outcome: outcome_rx,
        })
    }

    pub async fn metrics(&self) -> ExecutionMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn fee_performance(&self) -> FeePerformance {
        self.fee_performance.lock().await.clone()
    }

    /// Unexpected invariant violation: force-close everything at critical
    /// priority, then stop accepting risk.
    pub async fn emergency_stop(&self, reason: &str) {
        error!("ExecutionOrchestrator: EMERGENCY STOP ({})", reason);
        self.tracker
            .close_all(OrderPriority::Critical, "emergency stop")
            .await;
        let mut evaluator = self.evaluator.lock().await;
        evaluator.drawdown_mut().emergency_stop();
        let state = evaluator.drawdown().state();
        let _ = self.event_tx.send(TradingEvent::DrawdownStateChanged {
            status: state.status,
            drawdown: evaluator.drawdown().current_drawdown(),
            consecutive_losses: state.consecutive_losses,
            timestamp: Utc::now(),
        });
    }

    async fn dispatch_jobs(self: Arc<Self>, mut job_rx: mpsc::Receiver<ExecutionJob>) {
        while let Some(job) = job_rx.recv().await {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                this.run_execution(job).await;
            });
        }
    }

    async fn run_execution(&self, job: ExecutionJob) {
        let started = Instant::now();
        let execution_id = job.execution_id;
        let signal = job.signal.clone();
        info!(
            "ExecutionOrchestrator: execution {} for signal {} started",
            execution_id, signal.id
        );

        let current_order: Arc<Mutex<Option<Uuid>>> = Arc::new(Mutex::new(None));
        let phases = self.run_phases(&signal, Arc::clone(&current_order));

        let status = tokio::select! {
            result = tokio::time::timeout(self.config.execution_timeout, phases) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("ExecutionOrchestrator: execution {} timed out", execution_id);
                        self.cancel_current(&current_order).await;
                        PhaseResult::failed(ExecutionStatus::TimedOut, "execution timeout")
                    }
                }
            }
            _ = job.cancel.notified() => {
                info!("ExecutionOrchestrator: execution {} cancelled", execution_id);
                self.cancel_current(&current_order).await;
                PhaseResult::failed(ExecutionStatus::Cancelled, "cancelled by caller")
            }
        };
        let duration = started.elapsed();
        let outcome = ExecutionOutcome {
            execution_id,
            signal_id: signal.id,
            status: status.status,
            duration,
            fee_saved: status.fee_saved,
            fill: status.fill,
            reasons: status.reasons,
        };
        self.finish_execution(&outcome).await;
        let _ = job.outcome_tx.send(outcome);
    }

    async fn finish_execution(&self, outcome: &ExecutionOutcome) {
        {
            let mut metrics = self.metrics.lock().await;
            match outcome.status {
                ExecutionStatus::Completed => metrics.completed += 1,
                ExecutionStatus::Denied => metrics.denied += 1,
                ExecutionStatus::Failed => metrics.failed += 1,
                ExecutionStatus::Cancelled => metrics.cancelled += 1,
                ExecutionStatus::TimedOut => metrics.timed_out += 1,
            }
            metrics.total_fee_saved += outcome.fee_saved;
            let done = (metrics.completed
                + metrics.denied
                + metrics.failed
                + metrics.cancelled
                + metrics.timed_out) as f64;
            metrics.avg_execution_ms = metrics.avg_execution_ms
                + (outcome.duration.as_millis() as f64 - metrics.avg_execution_ms) / done.max(1.0);
        }
        if outcome.fee_saved != Decimal::ZERO {
            self.fee_performance
                .lock()
                .await
                .record_saving(outcome.fee_saved);
        }
        let _ = self.event_tx.send(TradingEvent::CompletedExecution {
            execution_id: outcome.execution_id,
            signal_id: outcome.signal_id,
            success: outcome.status == ExecutionStatus::Completed,
            duration_ms: outcome.duration.as_millis() as u64,
            fee_saved: outcome.fee_saved,
            timestamp: Utc::now(),
        });
        info!(
            "ExecutionOrchestrator: execution {} finished: {:?} in {:?}",
            outcome.execution_id, outcome.status, outcome.duration
        );
    }

    async fn cancel_current(&self, current_order: &Arc<Mutex<Option<Uuid>>>) {
        let client_id = *current_order.lock().await;
        if let Some(client_id) = client_id {
            if let Err(e) = self.order_manager.cancel(client_id).await {
                warn!("ExecutionOrchestrator: cancel of {} failed: {}", client_id, e);
            }
        }
    }

    /// Phases 1-4: risk assessment, optimisation, execution, monitoring.
    async fn run_phases(
        &self,
        signal: &TradeSignal,
        current_order: Arc<Mutex<Option<Uuid>>>,
    ) -> PhaseResult {
        // Phase 1: market snapshot and risk assessment.
        let snapshot = match self.fetch_snapshot(&signal.symbol).await {
            Ok(snapshot) => snapshot,
            Err(reason) => return PhaseResult::failed(ExecutionStatus::Failed, &reason),
        };
        let balance = self.fetch_balance_jpy().await;
        let latency = self.gateway.last_latency_ms().await;

        let verdict = {
            let mut evaluator = self.evaluator.lock().await;
            evaluator.evaluate(signal, &snapshot, balance, latency, Utc::now())
        };
        for alert in &verdict.alerts {
            let _ = self.event_tx.send(TradingEvent::AnomalyRaised {
                symbol: signal.symbol.clone(),
                kind: format!("{:?}", alert.kind),
                level: format!("{:?}", alert.level),
                message: alert.message.clone(),
                timestamp: alert.timestamp,
            });
        }
        let _ = self.event_tx.send(TradingEvent::RiskDecision {
            signal_id: signal.id,
            decision: verdict.decision,
            risk_score: verdict.risk_score,
            position_size: verdict.position_size,
            reasons: verdict.reasons.clone(),
            timestamp: Utc::now(),
        });
        if verdict.decision == RiskDecision::Denied {
            return PhaseResult {
                status: ExecutionStatus::Denied,
                fee_saved: Decimal::ZERO,
                fill: None,
                reasons: verdict.reasons,
            };
        }

        let Some(side) = signal.side.as_order_side() else {
            return PhaseResult::failed(ExecutionStatus::Denied, "hold signal");
        };
        let amount = if verdict.position_size > Decimal::ZERO {
            verdict.position_size
        } else {
            signal.amount
        };
        let priority = if signal.urgency >= 0.8 {
            OrderPriority::High
        } else {
            OrderPriority::Medium
        };

        // Phase 2: fee optimisation.
        let classification = self.fee_model.classify(signal, &snapshot.ticker);

        // Phases 3-4: execution and monitoring.
        match classification {
            Liquidity::Maker => {
                self.execute_direct(
                    signal,
                    side,
                    amount,
                    OrderType::Limit,
                    Some(signal.target_price),
                    true,
                    priority,
                    &snapshot,
                    current_order,
                )
                .await
            }
            Liquidity::Taker if signal.urgency < self.config.taker_urgency_threshold => {
                // Phase 2b: taker avoidance.
                match self
                    .planner
                    .execute(signal, side, amount, priority, &snapshot.ticker, &self.order_manager)
                    .await
                {
                    Ok(report) => {
                        if report.strategy == AvoidanceStrategy::MakerSubstitution {
                            debug!(
                                "ExecutionOrchestrator: taker avoided for {} (saved {})",
                                signal.id, report.fee_delta
                            );
                        }
                        let status = if report.fill.is_some() {
                            ExecutionStatus::Completed
                        } else {
                            ExecutionStatus::Failed
                        };
                        PhaseResult {
                            status,
                            fee_saved: report.fee_delta,
                            fill: report.fill,
                            reasons: Vec::new(),
                        }
                    }
                    Err(OrderError::InvalidTransition { .. }) => {
                        self.emergency_stop("order state machine violation").await;
                        PhaseResult::failed(ExecutionStatus::Failed, "invariant violation")
                    }
                    Err(e) => PhaseResult::failed(ExecutionStatus::Failed, &e.to_string()),
                }
            }
            Liquidity::Taker => {
                self.execute_direct(
                    signal,
                    side,
                    amount,
                    OrderType::Market,
                    None,
                    false,
                    priority,
                    &snapshot,
                    current_order,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_direct(
        &self,
        signal: &TradeSignal,
        side: crate::domain::trading::types::OrderSide,
        amount: Decimal,
        order_type: OrderType,
        price: Option<Decimal>,
        post_only: bool,
        priority: OrderPriority,
        snapshot: &MarketSnapshot,
        current_order: Arc<Mutex<Option<Uuid>>>,
    ) -> PhaseResult {
        let mut fills = self.order_manager.subscribe_fills();
        let intent = OrderIntent {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            side,
            order_type,
            amount,
            price,
            priority,
            post_only,
        };
        let client_id = match self.order_manager.submit(intent).await {
            Ok(client_id) => client_id,
            Err(OrderError::InvalidTransition { .. }) => {
                self.emergency_stop("order state machine violation").await;
                return PhaseResult::failed(ExecutionStatus::Failed, "invariant violation");
            }
            Err(e) => {
                return PhaseResult::failed(ExecutionStatus::Failed, &e.to_string());
            }
        };
        *current_order.lock().await = Some(client_id);

        // Monitoring: wait for the fill that belongs to this signal. The
        // enclosing execution timeout bounds this wait; a terminal order
        // without a fill (rejected, cancelled, expired) fails fast.
        let mut watch = tokio::time::interval(Duration::from_millis(200));
        loop {
            let received = tokio::select! {
                fill = fills.recv() => Some(fill),
                _ = watch.tick() => None,
            };
            let Some(received) = received else {
                if let Some(order) = self.order_manager.order(client_id).await {
                    if order.state.is_terminal()
                        && order.state != crate::domain::trading::types::OrderState::Filled
                    {
                        return PhaseResult::failed(
                            ExecutionStatus::Failed,
                            &format!("order ended {} without a fill", order.state),
                        );
                    }
                }
                continue;
            };
            match received {
                Ok(fill) if fill.signal_id == signal.id => {
                    let fee_saved = match order_type {
                        OrderType::Limit => {
                            let touch = match side {
                                crate::domain::trading::types::OrderSide::Buy => {
                                    snapshot.ticker.ask
                                }
                                crate::domain::trading::types::OrderSide::Sell => {
                                    snapshot.ticker.bid
                                }
                            };
                            let baseline = self
                                .fee_model
                                .quote(&signal.symbol, Liquidity::Taker, fill.amount, touch)
                                .expected_fee;
                            baseline - fill.fee_paid
                        }
                        OrderType::Market => Decimal::ZERO,
                    };
                    return PhaseResult {
                        status: ExecutionStatus::Completed,
                        fee_saved,
                        fill: Some(fill),
                        reasons: Vec::new(),
                    };
                }
                Ok(_) => continue,
                Err(_) => {
                    return PhaseResult::failed(
                        ExecutionStatus::Failed,
                        "fill stream closed before completion",
                    );
                }
            }
        }
    }

    async fn fetch_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, String> {
        let exchange = Arc::clone(&self.exchange);
        let symbol_owned = symbol.to_string();
        let ticker = self
            .gateway
            .execute(RequestKind::Get, || {
                let exchange = Arc::clone(&exchange);
                let symbol = symbol_owned.clone();
                async move { exchange.fetch_ticker(&symbol).await }
            })
            .await
            .map_err(|e| format!("ticker fetch failed: {}", e))?;

        let exchange = Arc::clone(&self.exchange);
        let symbol_owned = symbol.to_string();
        let limit = self.config.candle_history;
        let recent = self
            .gateway
            .execute(RequestKind::Get, || {
                let exchange = Arc::clone(&exchange);
                let symbol = symbol_owned.clone();
                async move { exchange.fetch_ohlcv(&symbol, "1min", limit).await }
            })
            .await
            .unwrap_or_default();

        Ok(MarketSnapshot { ticker, recent })
    }

    async fn fetch_balance_jpy(&self) -> Decimal {
        let exchange = Arc::clone(&self.exchange);
        let balances = self
            .gateway
            .execute(RequestKind::Get, || {
                let exchange = Arc::clone(&exchange);
                async move { exchange.fetch_balance().await }
            })
            .await;
        match balances {
            Ok(balances) => balances
                .iter()
                .find(|b| b.asset == "JPY")
                .map(|b| b.total())
                .unwrap_or(Decimal::ZERO),
            Err(e) => {
                warn!("ExecutionOrchestrator: balance fetch failed: {}", e);
                self.evaluator.lock().await.drawdown().state().current_balance
            }
        }
    }

    /// Forward component events to the bus, tracking committed capital from
    /// position lifecycle events along the way.
    async fn forward_events(&self, mut event_rx: UnboundedReceiver<TradingEvent>) {
        let mut open_notional: HashMap<Uuid, Decimal> = HashMap::new();
        while let Some(event) = event_rx.recv().await {
            match &event {
                TradingEvent::PositionOpened {
                    position_id,
                    amount,
                    entry_price,
                    ..
                } => {
                    let notional = *amount * *entry_price;
                    open_notional.insert(*position_id, notional);
                    self.evaluator.lock().await.reserve_capital(notional);
                }
                TradingEvent::PositionClosed { position_id, .. } => {
                    if let Some(notional) = open_notional.remove(position_id) {
                        self.evaluator.lock().await.release_capital(notional);
                    }
                }
                TradingEvent::OrderFilled { fee_paid, .. } => {
                    // Liquidity split is tracked on the fill stream; here we
                    // only keep the running fee totals coherent.
                    let liquidity = if *fee_paid < Decimal::ZERO {
                        Liquidity::Maker
                    } else {
                        Liquidity::Taker
                    };
                    self.fee_performance
                        .lock()
                        .await
                        .record_fill(liquidity, *fee_paid);
                }
                _ => {}
            }
            self.event_bus.publish(event).await;
        }
    }

    /// Feed realised results back into the risk layer, publishing drawdown
    /// state transitions.
    async fn consume_trade_records(&self, mut record_rx: UnboundedReceiver<TradeRecord>) {
        while let Some(record) = record_rx.recv().await {
            let changed = {
                let mut evaluator = self.evaluator.lock().await;
                evaluator.record_trade_result(record)
            };
            if let Some(status) = changed {
                let (drawdown, losses) = {
                    let evaluator = self.evaluator.lock().await;
                    (
                        evaluator.drawdown().current_drawdown(),
                        evaluator.drawdown().state().consecutive_losses,
                    )
                };
                let _ = self.event_tx.send(TradingEvent::DrawdownStateChanged {
                    status,
                    drawdown,
                    consecutive_losses: losses,
                    timestamp: Utc::now(),
                });
            }
        }
    }
}

struct PhaseResult {
    status: ExecutionStatus,
    fee_saved: Decimal,
    fill: Option<FillEvent>,
    reasons: Vec<String>,
}

impl PhaseResult {
    fn failed(status: ExecutionStatus, reason: &str) -> Self {
        Self {
            status,
            fee_saved: Decimal::ZERO,
            fill: None,
            reasons: vec![reason.to_string()],
        }
    }
}
