use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::repositories::StateRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStatus {
    Active,
    PausedDrawdown,
    PausedConsecutiveLoss,
    EmergencyStop,
}

/// The process-wide equity picture. Owned by the drawdown guard; every
/// mutation flows through `record_trade_result` and is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityState {
    pub initial_balance: Decimal,
    pub peak_balance: Decimal,
    pub current_balance: Decimal,
    pub consecutive_losses: u32,
    pub status: TradingStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl EquityState {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            peak_balance: initial_balance,
            current_balance: initial_balance,
            consecutive_losses: 0,
            status: TradingStatus::Active,
            cooldown_until: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DrawdownConfig {
    pub max_drawdown_ratio: Decimal,
    pub consecutive_loss_limit: u32,
    pub cooldown_hours: i64,
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self {
            max_drawdown_ratio: Decimal::new(20, 2),
            consecutive_loss_limit: 8,
            cooldown_hours: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownStatistics {
    pub initial_balance: Decimal,
    pub peak_balance: Decimal,
    pub current_balance: Decimal,
    pub current_drawdown: f64,
    pub consecutive_losses: u32,
    pub status: TradingStatus,
    pub trading_allowed: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub trades_recorded: u64,
}

/// Capital-preservation guard: tracks the equity peak, pauses trading on
/// excessive drawdown or loss streaks, and enforces the cooldown window.
pub struct DrawdownGuard {
    config: DrawdownConfig,
    state: EquityState,
    store: Option<Arc<dyn StateRepository>>,
    trades_recorded: u64,
}

impl DrawdownGuard {
    /// Restore persisted state when a store is attached; a missing or broken
    /// document falls back to a fresh state with a logged warning.
    pub fn new(
        config: DrawdownConfig,
        initial_balance: Decimal,
        store: Option<Arc<dyn StateRepository>>,
    ) -> Self {
        let state = match store.as_ref().map(|s| s.load_equity()) {
            Some(Ok(Some(persisted))) => {
                info!(
                    "DrawdownGuard: restored state (balance={}, status={:?})",
                    persisted.current_balance, persisted.status
                );
                persisted
            }
            Some(Err(e)) => {
                warn!("DrawdownGuard: failed to restore state, starting fresh: {}", e);
                EquityState::new(initial_balance)
            }
            _ => EquityState::new(initial_balance),
        };
        Self {
            config,
            state,
            store,
            trades_recorded: 0,
        }
    }

    pub fn state(&self) -> &EquityState {
        &self.state
    }

    pub fn status(&self) -> TradingStatus {
        self.state.status
    }

    pub fn initialize_balance(&mut self, initial_balance: Decimal) {
        self.state = EquityState::new(initial_balance);
        self.persist();
        info!("DrawdownGuard: balance initialised to {}", initial_balance);
    }

    pub fn update_balance(&mut self, current_balance: Decimal) {
        self.state.current_balance = current_balance;
        if current_balance > self.state.peak_balance {
            self.state.peak_balance = current_balance;
            debug!("DrawdownGuard: new peak balance {}", current_balance);
        }
    }

    /// (peak − current) / peak, floored at zero.
    pub fn current_drawdown(&self) -> f64 {
        if self.state.peak_balance <= Decimal::ZERO {
            return 0.0;
        }
        let dd = (self.state.peak_balance - self.state.current_balance)
            / self.state.peak_balance;
        dd.to_f64().unwrap_or(0.0).max(0.0)
    }

    /// Record a realised result. Returns the new status when the guard enters
    /// a paused state, so the caller can publish the transition.
    pub fn record_trade_result(
        &mut self,
        pnl: Decimal,
        now: DateTime<Utc>,
    ) -> Option<TradingStatus> {
        self.trades_recorded += 1;

        if pnl < Decimal::ZERO {
            self.state.consecutive_losses += 1;
            warn!(
                "DrawdownGuard: consecutive losses {}/{}",
                self.state.consecutive_losses, self.config.consecutive_loss_limit
            );
        } else {
            if self.state.consecutive_losses > 0 {
                info!("DrawdownGuard: loss streak reset");
            }
            self.state.consecutive_losses = 0;
        }

        self.update_balance(self.state.current_balance + pnl);

        let drawdown = Decimal::from_f64_retain(self.current_drawdown()).unwrap_or(Decimal::ZERO);
        let changed = if drawdown >= self.config.max_drawdown_ratio {
            self.enter_cooldown(TradingStatus::PausedDrawdown, now);
            Some(TradingStatus::PausedDrawdown)
        } else if self.state.consecutive_losses >= self.config.consecutive_loss_limit {
            self.enter_cooldown(TradingStatus::PausedConsecutiveLoss, now);
            Some(TradingStatus::PausedConsecutiveLoss)
        } else {
            None
        };

        self.persist();
        changed
    }

    /// True iff trading may proceed. Exiting an elapsed cooldown resets the
    /// status to active and zeroes the loss streak.
    pub fn check_trading_allowed(&mut self, now: DateTime<Utc>) -> bool {
        if self.state.status == TradingStatus::EmergencyStop {
            return false;
        }
        if let Some(until) = self.state.cooldown_until {
            if now < until {
                debug!(
                    "DrawdownGuard: in cooldown, {:.1}h remaining",
                    (until - now).num_minutes() as f64 / 60.0
                );
                return false;
            }
            self.exit_cooldown();
        }
        self.state.status == TradingStatus::Active
    }

    /// Flip to emergency stop. Only an operator restart clears this.
    pub fn emergency_stop(&mut self) {
        warn!("DrawdownGuard: EMERGENCY STOP");
        self.state.status = TradingStatus::EmergencyStop;
        self.state.cooldown_until = None;
        self.persist();
    }

    pub fn statistics(&self, now: DateTime<Utc>) -> DrawdownStatistics {
        let allowed = match self.state.status {
            TradingStatus::Active => true,
            TradingStatus::EmergencyStop => false,
            _ => self
                .state
                .cooldown_until
                .map(|until| now >= until)
                .unwrap_or(false),
        };
        DrawdownStatistics {
            initial_balance: self.state.initial_balance,
            peak_balance: self.state.peak_balance,
            current_balance: self.state.current_balance,
            current_drawdown: self.current_drawdown(),
            consecutive_losses: self.state.consecutive_losses,
            status: self.state.status,
            trading_allowed: allowed,
            cooldown_until: self.state.cooldown_until,
            trades_recorded: self.trades_recorded,
        }
    }

    fn enter_cooldown(&mut self, status: TradingStatus, now: DateTime<Utc>) {
        self.state.status = status;
        self.state.cooldown_until = Some(now + Duration::hours(self.config.cooldown_hours));
        warn!(
            "DrawdownGuard: cooldown started ({:?}) until {:?}",
            status, self.state.cooldown_until
        );
    }

    fn exit_cooldown(&mut self) {
        info!("DrawdownGuard: cooldown elapsed, trading resumed");
        self.state.status = TradingStatus::Active;
        self.state.cooldown_until = None;
        self.state.consecutive_losses = 0;
        self.persist();
    }

    /// Force a persistence write (used by structured shutdown).
    pub fn save(&self) {
        self.persist();
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_equity(&self.state) {
                warn!("DrawdownGuard: state persistence failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn guard() -> DrawdownGuard {
        DrawdownGuard::new(DrawdownConfig::default(), dec!(1000000), None)
    }

    #[test]
    fn test_peak_is_monotone() {
        let mut g = guard();
        g.record_trade_result(dec!(50000), Utc::now());
        assert_eq!(g.state().peak_balance, dec!(1050000));
        g.record_trade_result(dec!(-30000), Utc::now());
        assert_eq!(g.state().peak_balance, dec!(1050000));
        assert_eq!(g.state().current_balance, dec!(1020000));
    }

    #[test]
    fn test_drawdown_pause_at_threshold() {
        let mut g = guard();
        let now = Utc::now();
        assert!(g.record_trade_result(dec!(-60000), now).is_none());
        assert!(g.record_trade_result(dec!(-80000), now).is_none());
        // Third loss brings the drawdown to 22% >= 20%.
        let change = g.record_trade_result(dec!(-80000), now);
        assert_eq!(change, Some(TradingStatus::PausedDrawdown));
        assert!(!g.check_trading_allowed(now));
        // Still paused just before the cooldown ends.
        assert!(!g.check_trading_allowed(now + Duration::hours(5)));
        // Allowed again afterwards, with the streak cleared.
        assert!(g.check_trading_allowed(now + Duration::hours(7)));
        assert_eq!(g.state().consecutive_losses, 0);
        assert_eq!(g.status(), TradingStatus::Active);
    }

    #[test]
    fn test_consecutive_loss_pause() {
        let mut g = guard();
        let now = Utc::now();
        let mut change = None;
        for _ in 0..8 {
            change = g.record_trade_result(dec!(-1000), now);
        }
        assert_eq!(change, Some(TradingStatus::PausedConsecutiveLoss));
        assert!(!g.check_trading_allowed(now));
    }

    #[test]
    fn test_win_resets_streak() {
        let mut g = guard();
        let now = Utc::now();
        for _ in 0..7 {
            g.record_trade_result(dec!(-1000), now);
        }
        g.record_trade_result(dec!(500), now);
        assert_eq!(g.state().consecutive_losses, 0);
        assert_eq!(g.status(), TradingStatus::Active);
    }

    #[test]
    fn test_emergency_stop_never_auto_clears() {
        let mut g = guard();
        g.emergency_stop();
        assert!(!g.check_trading_allowed(Utc::now() + Duration::days(30)));
    }

    #[test]
    fn test_statistics_snapshot() {
        let mut g = guard();
        let now = Utc::now();
        g.record_trade_result(dec!(-60000), now);
        let stats = g.statistics(now);
        assert_eq!(stats.consecutive_losses, 1);
        assert!(stats.trading_allowed);
        assert!((stats.current_drawdown - 0.06).abs() < 1e-9);
    }
}
