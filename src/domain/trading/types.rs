use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::OrderError;

/// Direction of a strategy signal. `Hold` never reaches the order layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Buy,
    Sell,
    Hold,
}

impl SignalSide {
    pub fn as_order_side(&self) -> Option<OrderSide> {
        match self {
            SignalSide::Buy => Some(OrderSide::Buy),
            SignalSide::Sell => Some(OrderSide::Sell),
            SignalSide::Hold => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

/// Which side of the book a fill takes. Maker rests and may earn a rebate,
/// taker crosses the spread and pays the fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    Maker,
    Taker,
}

impl fmt::Display for Liquidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liquidity::Maker => write!(f, "maker"),
            Liquidity::Taker => write!(f, "taker"),
        }
    }
}

/// Scheduling tier shared by the order queue and position monitoring.
/// Ordering: `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for OrderPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderPriority::Low => write!(f, "low"),
            OrderPriority::Medium => write!(f, "medium"),
            OrderPriority::High => write!(f, "high"),
            OrderPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A trade signal produced by the strategy layer. Immutable once created;
/// `id` is the idempotency key for everything downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: Uuid,
    pub symbol: String,
    pub side: SignalSide,
    pub amount: Decimal,
    pub target_price: Decimal,
    /// ML/strategy confidence in [0, 1].
    pub confidence: f64,
    /// How quickly the signal decays, in [0, 1]; high urgency forbids resting orders.
    pub urgency: f64,
    /// Expected profit in quote currency if the trade plays out.
    pub expected_profit: Decimal,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// A concrete, risk-approved plan for one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub signal_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    /// Required for limit orders.
    pub price: Option<Decimal>,
    pub priority: OrderPriority,
    pub post_only: bool,
}

/// Lifecycle state of an order. `Working` covers the post-ack state,
/// including partial fills (`filled_amount > 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Pending,
    Submitted,
    Working,
    Cancelling,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Expired
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::Pending => "pending",
            OrderState::Submitted => "submitted",
            OrderState::Working => "working",
            OrderState::Cancelling => "cancelling",
            OrderState::Filled => "filled",
            OrderState::Cancelled => "cancelled",
            OrderState::Rejected => "rejected",
            OrderState::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// Events that drive the order state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Submit,
    Ack,
    PartialFill,
    Fill,
    CancelRequest,
    CancelAck,
    ServerReject,
    Timeout,
    Expire,
    /// Retriable pre-ack transport failure; the order returns to the queue.
    NetworkError,
}

impl OrderState {
    /// The only legal transitions. Anything else is a bug surfaced as
    /// `OrderError::InvalidTransition`.
    pub fn apply(self, event: OrderEvent) -> Result<OrderState, OrderError> {
        use OrderEvent as E;
        use OrderState as S;

        let next = match (self, event) {
            (S::Pending, E::Submit) => S::Submitted,
            // A queued intent that was never sent to the venue cancels locally.
            (S::Pending, E::CancelRequest) => S::Cancelled,
            (S::Submitted, E::Ack) => S::Working,
            (S::Submitted, E::ServerReject) => S::Rejected,
            (S::Working, E::PartialFill) => S::Working,
            (S::Working, E::Fill) => S::Filled,
            (S::Working, E::CancelRequest) => S::Cancelling,
            (S::Working, E::ServerReject) => S::Rejected,
            (S::Working, E::Timeout) => S::Cancelling,
            (S::Working, E::Expire) => S::Expired,
            (S::Cancelling, E::CancelAck) => S::Cancelled,
            // A cancel request can race the final fill; the fill wins.
            (S::Cancelling, E::Fill) => S::Filled,
            (s, E::NetworkError) if !s.is_terminal() => S::Pending,
            (from, _) => {
                return Err(OrderError::InvalidTransition {
                    from,
                    event: format!("{:?}", event),
                });
            }
        };
        Ok(next)
    }
}

/// A tracked order. Owned exclusively by the order manager; everything else
/// sees clones or the venue `order_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Local id, assigned when the intent is accepted.
    pub client_id: Uuid,
    /// Venue id, assigned on first acceptance by the exchange.
    pub venue_order_id: Option<String>,
    pub intent: OrderIntent,
    pub state: OrderState,
    pub filled_amount: Decimal,
    pub avg_fill_price: Decimal,
    pub fee_paid: Decimal,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_update_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl Order {
    pub fn new(intent: OrderIntent, now: DateTime<Utc>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            venue_order_id: None,
            intent,
            state: OrderState::Pending,
            filled_amount: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            fee_paid: Decimal::ZERO,
            submitted_at: None,
            last_update_at: now,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn transition(&mut self, event: OrderEvent, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.state = self.state.apply(event)?;
        self.last_update_at = now;
        Ok(())
    }

    pub fn remaining(&self) -> Decimal {
        (self.intent.amount - self.filled_amount).max(Decimal::ZERO)
    }
}

/// Emitted by the order manager when an order fills. `position_delta` is
/// signed: positive for buys, negative for sells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: String,
    pub signal_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub position_delta: Decimal,
    pub fee_paid: Decimal,
    pub liquidity: Liquidity,
    pub timestamp: DateTime<Utc>,
}

/// One realised trade outcome, appended to the shared history that feeds
/// Kelly sizing and the drawdown guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub pnl: Decimal,
    pub strategy: String,
    pub confidence_at_entry: f64,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn intent() -> OrderIntent {
        OrderIntent {
            signal_id: Uuid::new_v4(),
            symbol: "BTC/JPY".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            amount: dec!(0.01),
            price: Some(dec!(5000000)),
            priority: OrderPriority::Medium,
            post_only: true,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut order = Order::new(intent(), Utc::now());
        for event in [
            OrderEvent::Submit,
            OrderEvent::Ack,
            OrderEvent::PartialFill,
            OrderEvent::Fill,
        ] {
            order.transition(event, Utc::now()).unwrap();
        }
        assert_eq!(order.state, OrderState::Filled);
        assert!(order.state.is_terminal());
    }

    #[test]
    fn test_cancel_path() {
        let mut order = Order::new(intent(), Utc::now());
        order.transition(OrderEvent::Submit, Utc::now()).unwrap();
        order.transition(OrderEvent::Ack, Utc::now()).unwrap();
        order.transition(OrderEvent::CancelRequest, Utc::now()).unwrap();
        assert_eq!(order.state, OrderState::Cancelling);
        order.transition(OrderEvent::CancelAck, Utc::now()).unwrap();
        assert_eq!(order.state, OrderState::Cancelled);
    }

    #[test]
    fn test_network_error_returns_to_pending() {
        let mut order = Order::new(intent(), Utc::now());
        order.transition(OrderEvent::Submit, Utc::now()).unwrap();
        order.transition(OrderEvent::NetworkError, Utc::now()).unwrap();
        assert_eq!(order.state, OrderState::Pending);
    }

    #[test]
    fn test_illegal_transition_is_an_error() {
        let mut order = Order::new(intent(), Utc::now());
        let err = order.transition(OrderEvent::Fill, Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
        assert_eq!(order.state, OrderState::Pending);
    }

    #[test]
    fn test_terminal_states_reject_network_error() {
        let mut order = Order::new(intent(), Utc::now());
        order.transition(OrderEvent::Submit, Utc::now()).unwrap();
        order.transition(OrderEvent::Ack, Utc::now()).unwrap();
        order.transition(OrderEvent::Fill, Utc::now()).unwrap();
        assert!(order.transition(OrderEvent::NetworkError, Utc::now()).is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(OrderPriority::Critical > OrderPriority::High);
        assert!(OrderPriority::High > OrderPriority::Medium);
        assert!(OrderPriority::Medium > OrderPriority::Low);
    }

    #[test]
    fn test_remaining_amount() {
        let mut order = Order::new(intent(), Utc::now());
        order.filled_amount = dec!(0.004);
        assert_eq!(order.remaining(), dec!(0.006));
    }
}
