//! Configuration for the execution core.
//!
//! Loaded once per process from a TOML document and injected into components
//! through their constructors; nothing reads configuration ambiently.

mod anomaly_config;
mod exchange_config;
mod execution_config;
mod risk_config;
mod schedule_config;

pub use anomaly_config::AnomalyConfigSection;
pub use exchange_config::ExchangeConfig;
pub use execution_config::ExecutionConfig;
pub use risk_config::RiskConfig;
pub use schedule_config::ScheduleConfig;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::application::execution::order_manager::OrderManagerConfig;
use crate::application::execution::orchestrator::OrchestratorConfig;
use crate::application::execution::taker_avoidance::TakerAvoidanceConfig;
use crate::application::position::tracker::PositionTrackerConfig;
use crate::domain::risk::anomaly::AnomalyConfig;
use crate::domain::risk::drawdown::DrawdownConfig;
use crate::domain::risk::evaluator::EvaluatorConfig;
use crate::domain::risk::fee_guard::FeeGuardConfig;
use crate::domain::risk::kelly::KellyConfig;
use crate::domain::trading::fees::{FeeModel, FeeRates};
use crate::infrastructure::gateway::GatewayConfig;

/// Process execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Paper,
    Backtest,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "paper" => Ok(Mode::Paper),
            "backtest" => Ok(Mode::Backtest),
            _ => anyhow::bail!("Invalid mode: {}. Must be 'live', 'paper', or 'backtest'", s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub persistence_path: String,
    pub mode: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            persistence_path: "state/equity_state.json".to_string(),
            mode: "paper".to_string(),
        }
    }
}

/// Aggregate configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub risk: RiskConfig,
    pub anomaly: AnomalyConfigSection,
    pub execution: ExecutionConfig,
    pub schedule: ScheduleConfig,
    pub state: StateConfig,
}

impl Config {
    /// Load and validate the document. Any error here is fatal at start-up.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).context("failed to parse config document")?;
        config.validate()?;
        Ok(config)
    }

    pub fn mode(&self) -> Result<Mode> {
        self.state.mode.parse()
    }

    fn validate(&self) -> Result<()> {
        self.mode()?;
        self.schedule.interest_accrual()?;
        self.schedule.forced_close()?;
        anyhow::ensure!(
            self.exchange.rate_limit_get > 0 && self.exchange.rate_limit_post > 0,
            "rate limits must be positive"
        );
        anyhow::ensure!(
            self.risk.min_ml_confidence >= 0.0 && self.risk.min_ml_confidence <= 1.0,
            "min_ml_confidence must be in [0, 1]"
        );
        anyhow::ensure!(
            self.execution.max_concurrent_executions > 0,
            "max_concurrent_executions must be positive"
        );
        Ok(())
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            get_limit: self.exchange.rate_limit_get,
            post_limit: self.exchange.rate_limit_post,
            window: Duration::from_secs(self.exchange.rate_limit_window_s),
            max_retries: self.execution.max_retries,
            breaker_failure_threshold: self.execution.breaker_failure_threshold,
            breaker_recovery_timeout: Duration::from_secs(
                self.execution.breaker_recovery_timeout_s,
            ),
            backoff_initial: Duration::from_millis(self.execution.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.execution.backoff_max_ms),
            backoff_multiplier: self.execution.backoff_multiplier,
            call_timeout: Duration::from_secs(self.execution.gateway_timeout_s),
        }
    }

    pub fn fee_model(&self) -> FeeModel {
        FeeModel::new(
            FeeRates {
                maker: self.exchange.fee_rate_maker,
                taker: self.exchange.fee_rate_taker,
            },
            self.risk.maker_urgency_threshold,
        )
    }

    pub fn kelly_config(&self) -> KellyConfig {
        KellyConfig {
            safety_factor: self.risk.kelly_safety_factor,
            cap: self.risk.kelly_cap,
            min_trades: self.risk.min_trades_for_kelly,
            lookback_days: self.risk.kelly_lookback_days,
            initial_lot: self.exchange.min_lot,
            initial_position_size: self.risk.initial_position_size,
            target_volatility: self.risk.target_volatility,
            max_vol_scale: self.risk.max_vol_scale,
            stop_atr_multiplier: self.risk.stop_atr_multiplier,
            safe_balance_ratio: self.risk.safe_balance_ratio,
        }
    }

    pub fn drawdown_config(&self) -> DrawdownConfig {
        DrawdownConfig {
            max_drawdown_ratio: self.risk.max_drawdown_ratio,
            consecutive_loss_limit: self.risk.consecutive_loss_limit,
            cooldown_hours: self.risk.cooldown_hours,
        }
    }

    pub fn anomaly_config(&self) -> AnomalyConfig {
        AnomalyConfig {
            spread_warning: self.anomaly.spread_warning,
            spread_critical: self.anomaly.spread_critical,
            latency_warning_ms: self.anomaly.latency_warning_ms,
            latency_critical_ms: self.anomaly.latency_critical_ms,
            zscore_threshold: self.anomaly.zscore_threshold,
            window_bars: self.anomaly.window_bars,
        }
    }

    pub fn fee_guard_config(&self) -> FeeGuardConfig {
        FeeGuardConfig {
            safety_multiplier: self.risk.fee_safety_multiplier,
        }
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        use rust_decimal::prelude::ToPrimitive;
        EvaluatorConfig {
            min_ml_confidence: self.risk.min_ml_confidence,
            max_capital_usage: self.risk.max_capital_usage,
            deny_threshold: self.risk.risk_deny_threshold,
            conditional_threshold: self.risk.risk_conditional_threshold,
            take_profit_ratio: self.risk.take_profit_ratio,
            max_drawdown_ratio: self.risk.max_drawdown_ratio.to_f64().unwrap_or(0.20),
        }
    }

    pub fn order_manager_config(&self) -> OrderManagerConfig {
        OrderManagerConfig {
            submit_timeout: Duration::from_secs(self.execution.submit_timeout_s),
            max_wait: Duration::from_secs(self.execution.max_wait_s),
            poll_interval: Duration::from_millis(self.execution.poll_interval_ms),
            max_requeues: self.execution.max_requeues,
            margin_mode: self.exchange.margin_mode,
        }
    }

    pub fn taker_avoidance_config(&self) -> TakerAvoidanceConfig {
        TakerAvoidanceConfig {
            deadline: Duration::from_secs(self.execution.taker_avoid_deadline_s),
            poll_interval: Duration::from_secs(self.execution.taker_avoid_poll_s),
            adverse_tolerance: self.execution.taker_avoid_tolerance,
            price_tick: self.exchange.price_tick,
        }
    }

    pub fn tracker_config(&self) -> Result<PositionTrackerConfig> {
        Ok(PositionTrackerConfig {
            symbol: self.exchange.symbol.clone(),
            margin_mode: self.exchange.margin_mode,
            daily_interest_rate: self.schedule.daily_interest_rate,
            interest_accrual_time: self.schedule.interest_accrual()?,
            avoidance_lead: ChronoDuration::hours(self.schedule.avoidance_lead_hours),
            forced_close_time: self.schedule.forced_close()?,
            utc_offset_hours: self.exchange.utc_offset_hours,
            monitor_interval: Duration::from_secs(self.schedule.monitor_interval_s),
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_executions: self.execution.max_concurrent_executions,
            execution_timeout: Duration::from_secs(self.execution.execution_timeout_s),
            submission_queue_capacity: self.execution.submission_queue_capacity,
            taker_urgency_threshold: self.risk.maker_urgency_threshold,
            candle_history: self.execution.candle_history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_match_venue_limits() {
        let config = Config::default();
        assert_eq!(config.exchange.rate_limit_get, 10);
        assert_eq!(config.exchange.rate_limit_post, 6);
        assert_eq!(config.risk.consecutive_loss_limit, 8);
        assert_eq!(config.risk.kelly_cap, dec!(0.03));
        assert_eq!(config.execution.execution_timeout_s, 300);
        assert_eq!(config.mode().unwrap(), Mode::Paper);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [exchange]
            symbol = "XRP/JPY"
            fee_rate_taker = 0.0015

            [risk]
            max_drawdown_ratio = 0.15

            [state]
            mode = "backtest"
            "#,
        )
        .unwrap();
        assert_eq!(config.exchange.symbol, "XRP/JPY");
        assert_eq!(config.exchange.rate_limit_post, 6);
        assert_eq!(config.risk.max_drawdown_ratio, dec!(0.15));
        assert_eq!(config.risk.consecutive_loss_limit, 8);
        assert_eq!(config.mode().unwrap(), Mode::Backtest);
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let result = Config::from_toml_str(
            r#"
            [state]
            mode = "simulation"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_schedule_time_rejected() {
        let result = Config::from_toml_str(
            r#"
            [schedule]
            forced_close_time = "not a time"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_component_config_mapping() {
        let config = Config::default();
        let gateway = config.gateway_config();
        assert_eq!(gateway.get_limit, 10);
        assert_eq!(gateway.post_limit, 6);
        let kelly = config.kelly_config();
        assert_eq!(kelly.cap, dec!(0.03));
        assert_eq!(kelly.initial_lot, dec!(0.0001));
        let tracker = config.tracker_config().unwrap();
        assert_eq!(tracker.utc_offset_hours, 9);
        assert_eq!(tracker.avoidance_lead, ChronoDuration::hours(2));
    }
}
