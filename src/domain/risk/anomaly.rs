use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::warn;

use crate::domain::market::types::MarketSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Spread,
    Latency,
    PriceSpike,
    VolumeSpike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub kind: AnomalyKind,
    pub level: AnomalyLevel,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Observed value and the threshold it breached.
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub spread_warning: Decimal,
    pub spread_critical: Decimal,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub zscore_threshold: f64,
    /// Rolling window used for the z-score checks.
    pub window_bars: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            spread_warning: Decimal::new(3, 3),
            spread_critical: Decimal::new(5, 3),
            latency_warning_ms: 1000.0,
            latency_critical_ms: 3000.0,
            zscore_threshold: 3.0,
            window_bars: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub total_24h: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

/// Graded market-quality checks over a short rolling window. Alerts never
/// block trading by themselves; they feed the risk evaluator.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    history: Vec<AnomalyAlert>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
        }
    }

    /// Run all four checks against one market snapshot. Results accumulate in
    /// a 24-hour ring for the summary endpoint.
    pub fn check(&mut self, snapshot: &MarketSnapshot, api_latency_ms: f64) -> Vec<AnomalyAlert> {
        let now = snapshot.ticker.timestamp;
        let mut alerts = Vec::new();

        if let Some(alert) = self.check_spread(snapshot, now) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_latency(api_latency_ms, now) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_price_spike(snapshot, now) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_volume_spike(snapshot, now) {
            alerts.push(alert);
        }

        for alert in &alerts {
            warn!(
                "AnomalyDetector: {:?}/{:?} {}",
                alert.kind, alert.level, alert.message
            );
        }

        self.history.extend(alerts.iter().cloned());
        let cutoff = now - Duration::hours(24);
        self.history.retain(|a| a.timestamp >= cutoff);

        alerts
    }

    pub fn summary(&self, now: DateTime<Utc>) -> AnomalySummary {
        let cutoff = now - Duration::hours(24);
        let mut summary = AnomalySummary::default();
        for alert in self.history.iter().filter(|a| a.timestamp >= cutoff) {
            summary.total_24h += 1;
            match alert.level {
                AnomalyLevel::Critical => summary.critical += 1,
                AnomalyLevel::Warning => summary.warning += 1,
                AnomalyLevel::Info => summary.info += 1,
            }
        }
        summary
    }

    fn check_spread(
        &self,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Option<AnomalyAlert> {
        let ticker = &snapshot.ticker;
        if ticker.last <= Decimal::ZERO {
            return None;
        }
        let spread = ticker.spread_pct();
        let spread_f = spread.to_f64().unwrap_or(0.0);
        if spread >= self.config.spread_critical {
            Some(AnomalyAlert {
                kind: AnomalyKind::Spread,
                level: AnomalyLevel::Critical,
                timestamp: now,
                message: format!("dangerous spread: {:.3}%", spread_f * 100.0),
                value: spread_f,
                threshold: self.config.spread_critical.to_f64().unwrap_or(0.0),
            })
        } else if spread >= self.config.spread_warning {
            Some(AnomalyAlert {
                kind: AnomalyKind::Spread,
                level: AnomalyLevel::Warning,
                timestamp: now,
                message: format!("wide spread: {:.3}%", spread_f * 100.0),
                value: spread_f,
                threshold: self.config.spread_warning.to_f64().unwrap_or(0.0),
            })
        } else {
            None
        }
    }

    fn check_latency(&self, latency_ms: f64, now: DateTime<Utc>) -> Option<AnomalyAlert> {
        if latency_ms >= self.config.latency_critical_ms {
            Some(AnomalyAlert {
                kind: AnomalyKind::Latency,
                level: AnomalyLevel::Critical,
                timestamp: now,
                message: format!("severe API latency: {:.0}ms", latency_ms),
                value: latency_ms,
                threshold: self.config.latency_critical_ms,
            })
        } else if latency_ms >= self.config.latency_warning_ms {
            Some(AnomalyAlert {
                kind: AnomalyKind::Latency,
                level: AnomalyLevel::Warning,
                timestamp: now,
                message: format!("API latency: {:.0}ms", latency_ms),
                value: latency_ms,
                threshold: self.config.latency_warning_ms,
            })
        } else {
            None
        }
    }

    fn check_price_spike(
        &self,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Option<AnomalyAlert> {
        let closes = snapshot.closes();
        let z = self.zscore(&closes, snapshot.ticker.last.to_f64()?)?;
        if z >= self.config.zscore_threshold {
            Some(AnomalyAlert {
                kind: AnomalyKind::PriceSpike,
                level: AnomalyLevel::Critical,
                timestamp: now,
                message: format!("price spike: z-score {:.2}", z),
                value: z,
                threshold: self.config.zscore_threshold,
            })
        } else {
            None
        }
    }

    fn check_volume_spike(
        &self,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Option<AnomalyAlert> {
        let volumes = snapshot.volumes();
        let z = self.zscore(&volumes, snapshot.ticker.volume.to_f64()?)?;
        if z >= self.config.zscore_threshold {
            Some(AnomalyAlert {
                kind: AnomalyKind::VolumeSpike,
                level: AnomalyLevel::Warning,
                timestamp: now,
                message: format!("volume anomaly: z-score {:.2}", z),
                value: z,
                threshold: self.config.zscore_threshold,
            })
        } else {
            None
        }
    }

    /// |x − mean| / stdev over the last `window_bars` samples. None when
    /// history is too short or flat.
    fn zscore(&self, series: &[f64], current: f64) -> Option<f64> {
        if series.len() < self.config.window_bars {
            return None;
        }
        let window = &series[series.len() - self.config.window_bars..];
        let mean = window.mean();
        let sd = window.std_dev();
        if !sd.is_finite() || sd <= 0.0 {
            return None;
        }
        Some(((current - mean) / sd).abs())
    }
}
