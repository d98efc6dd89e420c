use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::application::execution::order_manager::OrderManager;
use crate::application::execution::orchestrator::{ExecutionHandle, ExecutionOrchestrator};
use crate::application::execution::taker_avoidance::TakerAvoidancePlanner;
use crate::application::position::tracker::PositionTracker;
use crate::config::{Config, Mode};
use crate::domain::errors::SubmitError;
use crate::domain::events::EventListener;
use crate::domain::ports::ExchangeClient;
use crate::domain::repositories::StateRepository;
use crate::domain::risk::anomaly::AnomalyDetector;
use crate::domain::risk::drawdown::DrawdownGuard;
use crate::domain::risk::evaluator::RiskEvaluator;
use crate::domain::risk::fee_guard::FeeGuard;
use crate::domain::risk::kelly::KellySizer;
use crate::domain::trading::types::TradeSignal;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::gateway::RateLimitedGateway;
use crate::infrastructure::persistence::state_store::JsonStateStore;
use rust_decimal::Decimal;

/// Fully wired execution core. Construction is pure assembly; `start` spawns
/// the background tasks and `stop` tears them down in order.
pub struct TradingSystem {
    orchestrator: Arc<ExecutionOrchestrator>,
    event_bus: EventBus,
    pub order_manager: Arc<OrderManager>,
    pub tracker: Arc<PositionTracker>,
    pub gateway: Arc<RateLimitedGateway>,
}

impl TradingSystem {
    /// Assemble the core around an exchange client. The client decides the
    /// venue flavour (live, paper, backtest); everything else follows the
    /// configuration document.
    pub fn build(
        config: &Config,
        exchange: Arc<dyn ExchangeClient>,
        initial_balance: Decimal,
    ) -> Result<Self> {
        let mode = config.mode()?;
        let persistence_enabled = mode != Mode::Backtest;
        let store: Arc<dyn StateRepository> = Arc::new(JsonStateStore::new(
            &config.state.persistence_path,
            persistence_enabled,
        ));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (record_tx, record_rx) = mpsc::unbounded_channel();
        let event_bus = EventBus::new();

        let gateway = Arc::new(
            RateLimitedGateway::new(config.gateway_config()).with_event_sink(event_tx.clone()),
        );
        let fee_model = Arc::new(config.fee_model());

        let evaluator = RiskEvaluator::new(
            config.evaluator_config(),
            AnomalyDetector::new(config.anomaly_config()),
            KellySizer::new(config.kelly_config()),
            DrawdownGuard::new(
                config.drawdown_config(),
                initial_balance,
                Some(Arc::clone(&store)),
            ),
            FeeGuard::new(config.fee_guard_config()),
            config.fee_model(),
        );

        let order_manager = Arc::new(OrderManager::new(
            config.order_manager_config(),
            Arc::clone(&gateway),
            Arc::clone(&exchange),
            Arc::clone(&fee_model),
            event_tx.clone(),
            vec![config.exchange.symbol.clone()],
        ));

        let tracker = Arc::new(PositionTracker::new(
            config.tracker_config()?,
            Arc::clone(&order_manager),
            event_tx.clone(),
            record_tx,
            Some(Arc::clone(&store)),
            Utc::now(),
        ));

        let planner = Arc::new(TakerAvoidancePlanner::new(
            config.taker_avoidance_config(),
            Arc::clone(&fee_model),
            Arc::clone(&gateway),
            Arc::clone(&exchange),
        ));

        let orchestrator = Arc::new(ExecutionOrchestrator::new(
            config.orchestrator_config(),
            evaluator,
            fee_model,
            planner,
            Arc::clone(&order_manager),
            Arc::clone(&tracker),
            Arc::clone(&gateway),
            exchange,
            event_bus.clone(),
            event_tx,
            event_rx,
            record_rx,
        ));

        info!("TradingSystem: assembled ({:?} mode)", mode);
        Ok(Self {
            orchestrator,
            event_bus,
            order_manager,
            tracker,
            gateway,
        })
    }

    pub async fn start(&self) {
        self.orchestrator.start().await;
    }

    pub async fn stop(&self) {
        self.orchestrator.stop().await;
    }

    pub async fn submit(&self, signal: TradeSignal) -> Result<ExecutionHandle, SubmitError> {
        self.orchestrator.submit(signal).await
    }

    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.event_bus.subscribe(listener).await;
    }

    /// Subscribe a transport to specific event kinds only.
    pub async fn subscribe_to(&self, listener: Arc<dyn EventListener>, kinds: &[&'static str]) {
        self.event_bus.subscribe_to(listener, kinds).await;
    }

    pub fn orchestrator(&self) -> &Arc<ExecutionOrchestrator> {
        &self.orchestrator
    }
}
