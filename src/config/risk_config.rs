use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_drawdown_ratio: Decimal,
    pub consecutive_loss_limit: u32,
    pub cooldown_hours: i64,
    pub kelly_safety_factor: Decimal,
    pub kelly_cap: Decimal,
    pub kelly_lookback_days: i64,
    pub min_trades_for_kelly: usize,
    pub min_ml_confidence: f64,
    pub max_capital_usage: Decimal,
    pub initial_position_size: Decimal,
    pub fee_safety_multiplier: Decimal,
    pub risk_deny_threshold: f64,
    pub risk_conditional_threshold: f64,
    /// Signals at or above this urgency never try to rest on the book.
    pub maker_urgency_threshold: f64,
    pub take_profit_ratio: Decimal,
    pub target_volatility: Decimal,
    pub max_vol_scale: Decimal,
    pub stop_atr_multiplier: Decimal,
    pub safe_balance_ratio: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_ratio: dec!(0.20),
            consecutive_loss_limit: 8,
            cooldown_hours: 6,
            kelly_safety_factor: dec!(0.7),
            kelly_cap: dec!(0.03),
            kelly_lookback_days: 30,
            min_trades_for_kelly: 5,
            min_ml_confidence: 0.25,
            max_capital_usage: dec!(0.30),
            initial_position_size: dec!(0.01),
            fee_safety_multiplier: dec!(1.5),
            risk_deny_threshold: 0.8,
            risk_conditional_threshold: 0.6,
            maker_urgency_threshold: 0.7,
            take_profit_ratio: dec!(0.02),
            target_volatility: dec!(0.01),
            max_vol_scale: dec!(3.0),
            stop_atr_multiplier: dec!(2.0),
            safe_balance_ratio: dec!(0.3),
        }
    }
}
