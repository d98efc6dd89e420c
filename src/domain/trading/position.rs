use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::trading::types::{OrderPriority, OrderSide};

/// An open position. Owned exclusively by the position tracker; the rest of
/// the system reads snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    /// Remaining amount; monotonically decreases from `opened_amount`.
    pub amount: Decimal,
    pub opened_amount: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub expected_exit_time: Option<DateTime<Utc>>,
    pub realised_pnl: Decimal,
    pub priority: OrderPriority,
    pub strategy_tag: String,
    pub margin: bool,
}

impl Position {
    pub fn open(
        symbol: impl Into<String>,
        side: OrderSide,
        amount: Decimal,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
        strategy_tag: impl Into<String>,
        margin: bool,
    ) -> Self {
        Self {
            position_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            amount,
            opened_amount: amount,
            entry_price,
            entry_time,
            stop_loss: None,
            take_profit: None,
            expected_exit_time: None,
            realised_pnl: Decimal::ZERO,
            priority: OrderPriority::Medium,
            strategy_tag: strategy_tag.into(),
            margin,
        }
    }

    /// Unrealised P&L at `price` on the remaining amount.
    pub fn unrealised_pnl(&self, price: Decimal) -> Decimal {
        match self.side {
            OrderSide::Buy => (price - self.entry_price) * self.amount,
            OrderSide::Sell => (self.entry_price - price) * self.amount,
        }
    }

    pub fn notional(&self) -> Decimal {
        self.entry_price * self.amount
    }

    /// Reduce the position by a closing fill at `price`, returning the
    /// realised P&L of the closed tranche. Amounts beyond the remaining size
    /// are clamped; the remainder never goes negative.
    pub fn reduce(&mut self, amount: Decimal, price: Decimal) -> Decimal {
        let closed = amount.min(self.amount);
        let pnl = match self.side {
            OrderSide::Buy => (price - self.entry_price) * closed,
            OrderSide::Sell => (self.entry_price - price) * closed,
        };
        self.amount -= closed;
        self.realised_pnl += pnl;
        pnl
    }

    pub fn is_closed(&self) -> bool {
        self.amount.is_zero()
    }

    /// Fold an execution fee into realised P&L (a rebate adds).
    pub fn fee_adjust(&mut self, fee: Decimal) {
        self.realised_pnl -= fee;
    }
}

/// Margin-loan interest schedule, attached 1:1 to a margin position.
/// Invariant: `avoidance_deadline < next_accrual_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestSchedule {
    pub daily_rate: Decimal,
    pub next_accrual_at: DateTime<Utc>,
    pub accrued_so_far: Decimal,
    pub avoidance_deadline: DateTime<Utc>,
}

impl InterestSchedule {
    pub fn new(daily_rate: Decimal, first_accrual: DateTime<Utc>, avoidance_lead: Duration) -> Self {
        Self {
            daily_rate,
            next_accrual_at: first_accrual,
            accrued_so_far: Decimal::ZERO,
            avoidance_deadline: first_accrual - avoidance_lead,
        }
    }

    /// Apply every accrual due at `now`, advancing the schedule one day per
    /// accrual. Returns the newly accrued interest.
    pub fn accrue_due(
        &mut self,
        notional: Decimal,
        now: DateTime<Utc>,
        avoidance_lead: Duration,
    ) -> Decimal {
        let mut accrued = Decimal::ZERO;
        while now >= self.next_accrual_at {
            accrued += notional * self.daily_rate;
            self.next_accrual_at += Duration::days(1);
            self.avoidance_deadline = self.next_accrual_at - avoidance_lead;
        }
        self.accrued_so_far += accrued;
        accrued
    }

    /// Projected cost of holding through the next accrual.
    pub fn projected(&self, notional: Decimal) -> Decimal {
        notional * self.daily_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_pnl_round_trip() {
        let mut pos = Position::open(
            "BTC/JPY",
            OrderSide::Buy,
            dec!(0.01),
            dec!(5000000),
            Utc::now(),
            "scalp",
            true,
        );
        assert_eq!(pos.unrealised_pnl(dec!(5050000)), dec!(500));
        let pnl = pos.reduce(dec!(0.01), dec!(5050000));
        assert_eq!(pnl, dec!(500));
        assert!(pos.is_closed());
    }

    #[test]
    fn test_sell_pnl_sign_convention() {
        let mut pos = Position::open(
            "BTC/JPY",
            OrderSide::Sell,
            dec!(0.02),
            dec!(5000000),
            Utc::now(),
            "scalp",
            true,
        );
        assert_eq!(pos.unrealised_pnl(dec!(4950000)), dec!(1000));
        let pnl = pos.reduce(dec!(0.02), dec!(5100000));
        assert_eq!(pnl, dec!(-2000));
    }

    #[test]
    fn test_partial_reduce_keeps_remainder() {
        let mut pos = Position::open(
            "BTC/JPY",
            OrderSide::Buy,
            dec!(0.03),
            dec!(5000000),
            Utc::now(),
            "swing",
            false,
        );
        pos.reduce(dec!(0.01), dec!(5010000));
        assert_eq!(pos.amount, dec!(0.02));
        assert!(!pos.is_closed());
        // Over-closing clamps to the remainder.
        pos.reduce(dec!(0.05), dec!(5010000));
        assert!(pos.is_closed());
        assert_eq!(pos.realised_pnl, dec!(300));
    }

    #[test]
    fn test_interest_accrual_soundness() {
        let first = Utc::now() + Duration::hours(1);
        let mut schedule = InterestSchedule::new(dec!(0.0004), first, Duration::hours(2));
        assert!(schedule.avoidance_deadline < schedule.next_accrual_at);

        // Three days due at once: accrued = 3 * notional * rate.
        let accrued = schedule.accrue_due(
            dec!(50000),
            first + Duration::days(2),
            Duration::hours(2),
        );
        assert_eq!(accrued, dec!(60));
        assert_eq!(schedule.accrued_so_far, dec!(60));
        assert!(schedule.next_accrual_at > first + Duration::days(2));
        assert!(schedule.avoidance_deadline < schedule.next_accrual_at);
    }

    #[test]
    fn test_accrual_not_due_is_zero() {
        let first = Utc::now() + Duration::hours(5);
        let mut schedule = InterestSchedule::new(dec!(0.0004), first, Duration::hours(2));
        let accrued = schedule.accrue_due(dec!(50000), Utc::now(), Duration::hours(2));
        assert_eq!(accrued, Decimal::ZERO);
    }
}
