use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfigSection {
    pub spread_warning: Decimal,
    pub spread_critical: Decimal,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub zscore_threshold: f64,
    pub window_bars: usize,
}

impl Default for AnomalyConfigSection {
    fn default() -> Self {
        Self {
            spread_warning: dec!(0.003),
            spread_critical: dec!(0.005),
            latency_warning_ms: 1000.0,
            latency_critical_ms: 3000.0,
            zscore_threshold: 3.0,
            window_bars: 20,
        }
    }
}
