use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::domain::risk::drawdown::TradingStatus;
use crate::domain::risk::evaluator::RiskDecision;
use crate::domain::trading::types::{OrderPriority, OrderSide};

/// Every observable state transition in the core. Each variant carries the
/// correlation identifiers a downstream transport needs to stitch a story
/// together; transports (logs, notifiers) subscribe through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TradingEvent {
    SignalReceived {
        signal_id: Uuid,
        symbol: String,
        source: String,
        timestamp: DateTime<Utc>,
    },
    RiskDecision {
        signal_id: Uuid,
        decision: RiskDecision,
        risk_score: f64,
        position_size: Decimal,
        reasons: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    OrderSubmitted {
        signal_id: Uuid,
        order_id: String,
        symbol: String,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
        priority: OrderPriority,
        timestamp: DateTime<Utc>,
    },
    OrderFilled {
        signal_id: Uuid,
        order_id: String,
        symbol: String,
        amount: Decimal,
        avg_price: Decimal,
        fee_paid: Decimal,
        timestamp: DateTime<Utc>,
    },
    OrderCancelled {
        signal_id: Uuid,
        order_id: String,
        symbol: String,
        timestamp: DateTime<Utc>,
    },
    PositionOpened {
        position_id: Uuid,
        symbol: String,
        side: OrderSide,
        amount: Decimal,
        entry_price: Decimal,
        timestamp: DateTime<Utc>,
    },
    PositionClosed {
        position_id: Uuid,
        symbol: String,
        realised_pnl: Decimal,
        timestamp: DateTime<Utc>,
    },
    AnomalyRaised {
        symbol: String,
        kind: String,
        level: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    CircuitBreakerChanged {
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
    DrawdownStateChanged {
        status: TradingStatus,
        drawdown: f64,
        consecutive_losses: u32,
        timestamp: DateTime<Utc>,
    },
    ForcedCloseTriggered {
        reason: String,
        positions: usize,
        timestamp: DateTime<Utc>,
    },
    CompletedExecution {
        execution_id: Uuid,
        signal_id: Uuid,
        success: bool,
        duration_ms: u64,
        fee_saved: Decimal,
        timestamp: DateTime<Utc>,
    },
}

impl TradingEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TradingEvent::SignalReceived { timestamp, .. }
            | TradingEvent::RiskDecision { timestamp, .. }
            | TradingEvent::OrderSubmitted { timestamp, .. }
            | TradingEvent::OrderFilled { timestamp, .. }
            | TradingEvent::OrderCancelled { timestamp, .. }
            | TradingEvent::PositionOpened { timestamp, .. }
            | TradingEvent::PositionClosed { timestamp, .. }
            | TradingEvent::AnomalyRaised { timestamp, .. }
            | TradingEvent::CircuitBreakerChanged { timestamp, .. }
            | TradingEvent::DrawdownStateChanged { timestamp, .. }
            | TradingEvent::ForcedCloseTriggered { timestamp, .. }
            | TradingEvent::CompletedExecution { timestamp, .. } => *timestamp,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TradingEvent::SignalReceived { .. } => "signal_received",
            TradingEvent::RiskDecision { .. } => "risk_decision",
            TradingEvent::OrderSubmitted { .. } => "order_submitted",
            TradingEvent::OrderFilled { .. } => "order_filled",
            TradingEvent::OrderCancelled { .. } => "order_cancelled",
            TradingEvent::PositionOpened { .. } => "position_opened",
            TradingEvent::PositionClosed { .. } => "position_closed",
            TradingEvent::AnomalyRaised { .. } => "anomaly_raised",
            TradingEvent::CircuitBreakerChanged { .. } => "circuit_breaker_changed",
            TradingEvent::DrawdownStateChanged { .. } => "drawdown_state_changed",
            TradingEvent::ForcedCloseTriggered { .. } => "forced_close_triggered",
            TradingEvent::CompletedExecution { .. } => "completed_execution",
        }
    }
}

/// Implemented by downstream transports. Listeners must not block.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &TradingEvent);
}

/// Default listener that mirrors the stream into tracing.
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &TradingEvent) {
        info!("event [{}]: {:?}", event.kind(), event);
    }
}
