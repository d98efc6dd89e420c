use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::market::types::MarketSnapshot;
use crate::domain::risk::anomaly::{AnomalyAlert, AnomalyDetector, AnomalyLevel};
use crate::domain::risk::drawdown::{DrawdownGuard, TradingStatus};
use crate::domain::risk::fee_guard::{FeeGuard, FeeGuardDecision};
use crate::domain::risk::kelly::KellySizer;
use crate::domain::trading::fees::FeeModel;
use crate::domain::trading::types::{Liquidity, SignalSide, TradeRecord, TradeSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskDecision {
    Approved,
    Conditional,
    Denied,
}

/// Immutable outcome of one risk evaluation, with the full reason list for
/// auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub signal_id: Uuid,
    pub decision: RiskDecision,
    /// Base-unit position size; zero on denial.
    pub position_size: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    /// Anomaly alerts raised during this evaluation.
    pub alerts: Vec<AnomalyAlert>,
    pub risk_score: f64,
    pub evaluated_at: DateTime<Utc>,
}

impl RiskVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self.decision, RiskDecision::Approved | RiskDecision::Conditional)
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub min_ml_confidence: f64,
    /// Ceiling on cumulative committed notional as a share of initial balance.
    pub max_capital_usage: Decimal,
    pub deny_threshold: f64,
    pub conditional_threshold: f64,
    /// Take-profit distance from the entry price.
    pub take_profit_ratio: Decimal,
    pub max_drawdown_ratio: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            min_ml_confidence: 0.25,
            max_capital_usage: Decimal::new(30, 2),
            deny_threshold: 0.8,
            conditional_threshold: 0.6,
            take_profit_ratio: Decimal::new(2, 2),
            max_drawdown_ratio: 0.20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluatorMetrics {
    pub total_evaluations: u64,
    pub approved: u64,
    pub conditional: u64,
    pub denied: u64,
    pub last_kelly_fraction: Option<Decimal>,
}

/// Single entry point combining the anomaly detector, Kelly sizer, drawdown
/// guard, and fee guard into one APPROVED / CONDITIONAL / DENIED verdict.
pub struct RiskEvaluator {
    config: EvaluatorConfig,
    anomaly: AnomalyDetector,
    kelly: KellySizer,
    drawdown: DrawdownGuard,
    fee_guard: FeeGuard,
    fee_model: FeeModel,
    committed_capital: Decimal,
    metrics: EvaluatorMetrics,
}

impl RiskEvaluator {
    pub fn new(
        config: EvaluatorConfig,
        anomaly: AnomalyDetector,
        kelly: KellySizer,
        drawdown: DrawdownGuard,
        fee_guard: FeeGuard,
        fee_model: FeeModel,
    ) -> Self {
        Self {
            config,
            anomaly,
            kelly,
            drawdown,
            fee_guard,
            fee_model,
            committed_capital: Decimal::ZERO,
            metrics: EvaluatorMetrics::default(),
        }
    }

    /// Evaluate one signal against the current market and equity picture.
    pub fn evaluate(
        &mut self,
        signal: &TradeSignal,
        snapshot: &MarketSnapshot,
        balance: Decimal,
        api_latency_ms: f64,
        now: DateTime<Utc>,
    ) -> RiskVerdict {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        self.drawdown.update_balance(balance);

        if signal.side == SignalSide::Hold {
            reasons.push("signal has no tradable direction".to_string());
        }

        // 1. Drawdown gate.
        let trading_allowed = self.drawdown.check_trading_allowed(now);
        if !trading_allowed {
            reasons.push(format!(
                "drawdown guard: trading paused ({:?})",
                self.drawdown.status()
            ));
        }

        // 2. Market anomalies. Critical denies, warnings are recorded.
        let alerts = self.anomaly.check(snapshot, api_latency_ms);
        let critical_count = alerts
            .iter()
            .filter(|a| a.level == AnomalyLevel::Critical)
            .count();
        let warning_count = alerts
            .iter()
            .filter(|a| a.level == AnomalyLevel::Warning)
            .count();
        for alert in &alerts {
            match alert.level {
                AnomalyLevel::Critical => reasons.push(alert.message.clone()),
                _ => warnings.push(alert.message.clone()),
            }
        }

        // 3. Fee guard on the expected execution style.
        let liquidity = self.fee_model.classify(signal, &snapshot.ticker);
        let quote = self.fee_model.quote(
            &signal.symbol,
            liquidity,
            signal.amount,
            signal.target_price,
        );
        let maker_quote = self.fee_model.quote(
            &signal.symbol,
            Liquidity::Maker,
            signal.amount,
            signal.target_price,
        );
        match self.fee_guard.evaluate(signal.expected_profit, &quote, &maker_quote) {
            FeeGuardDecision::Reject { reason } => reasons.push(format!("fee guard: {}", reason)),
            FeeGuardDecision::Modify { reason, .. } => {
                warnings.push(format!("fee guard suggests maker: {}", reason))
            }
            FeeGuardDecision::Approve => {}
        }

        // 4. Confidence floor.
        if signal.confidence < self.config.min_ml_confidence {
            reasons.push(format!(
                "ML confidence too low: {:.3} < {:.3}",
                signal.confidence, self.config.min_ml_confidence
            ));
        }

        // 5. Position sizing via Kelly, with an ATR stop when history allows.
        let (position_size, stop_loss) = match snapshot.atr(14) {
            Some(atr) => self.kelly.calculate_dynamic_size(
                balance,
                signal.target_price,
                atr,
                signal.confidence,
                now,
            ),
            None => {
                let amount = self
                    .kelly
                    .calculate_optimal_size(signal.confidence, None, now)
                    .to_amount(balance, signal.target_price);
                (amount, signal.target_price * Decimal::new(98, 2))
            }
        };
        let stop_loss = match signal.side {
            SignalSide::Sell => Some(signal.target_price * Decimal::TWO - stop_loss),
            _ => Some(stop_loss),
        };
        let take_profit = match signal.side {
            SignalSide::Buy => {
                Some(signal.target_price * (Decimal::ONE + self.config.take_profit_ratio))
            }
            SignalSide::Sell => {
                Some(signal.target_price * (Decimal::ONE - self.config.take_profit_ratio))
            }
            SignalSide::Hold => None,
        };

        // 6. Capital-usage ceiling against the sized notional.
        let notional = position_size * signal.target_price;
        let initial = self.drawdown.state().initial_balance;
        if initial > Decimal::ZERO {
            let usage = (self.committed_capital + notional) / initial;
            if usage > self.config.max_capital_usage {
                reasons.push(format!(
                    "capital usage {:.1}% exceeds ceiling {:.1}%",
                    usage.to_f64().unwrap_or(0.0) * 100.0,
                    self.config.max_capital_usage.to_f64().unwrap_or(0.0) * 100.0
                ));
            }
        }

        // 7. Weighted risk score.
        let risk_score = self.risk_score(
            signal.confidence,
            critical_count,
            warning_count,
            snapshot.volatility_estimate(),
        );

        let denied_hard = !reasons.is_empty();
        let decision = if denied_hard || risk_score >= self.config.deny_threshold {
            if !denied_hard {
                reasons.push(format!(
                    "risk score {:.2} >= deny threshold {:.2}",
                    risk_score, self.config.deny_threshold
                ));
            }
            RiskDecision::Denied
        } else if risk_score >= self.config.conditional_threshold {
            warnings.push(format!(
                "risk score {:.2} in conditional band",
                risk_score
            ));
            RiskDecision::Conditional
        } else {
            RiskDecision::Approved
        };

        let position_size = if decision == RiskDecision::Denied {
            Decimal::ZERO
        } else {
            position_size
        };

        self.metrics.total_evaluations += 1;
        match decision {
            RiskDecision::Approved => self.metrics.approved += 1,
            RiskDecision::Conditional => self.metrics.conditional += 1,
            RiskDecision::Denied => self.metrics.denied += 1,
        }
        if let Some(kelly) = self.kelly.calculate_from_history(None, now) {
            self.metrics.last_kelly_fraction = Some(kelly.kelly_fraction);
        }

        info!(
            "RiskEvaluator: signal {} -> {:?} (score {:.2}, size {})",
            signal.id, decision, risk_score, position_size
        );

        RiskVerdict {
            signal_id: signal.id,
            decision,
            position_size,
            stop_loss: if decision == RiskDecision::Denied { None } else { stop_loss },
            take_profit: if decision == RiskDecision::Denied { None } else { take_profit },
            reasons,
            warnings,
            alerts,
            risk_score,
            evaluated_at: now,
        }
    }

    /// Weighted composite: ML confidence 30%, anomalies 25%, drawdown 25%,
    /// consecutive losses 10%, volatility 10%.
    fn risk_score(
        &self,
        ml_confidence: f64,
        critical_anomalies: usize,
        warning_anomalies: usize,
        volatility: f64,
    ) -> f64 {
        let ml_risk = 1.0 - ml_confidence.clamp(0.0, 1.0);
        let anomaly_risk =
            (critical_anomalies as f64 * 0.5 + warning_anomalies as f64 * 0.2).min(1.0);
        let drawdown_risk =
            (self.drawdown.current_drawdown() / self.config.max_drawdown_ratio).min(1.0);
        let consecutive_risk = (self.drawdown.state().consecutive_losses as f64 / 5.0).min(1.0);
        let volatility_risk = (volatility / 0.05).min(1.0);

        let total = ml_risk * 0.30
            + anomaly_risk * 0.25
            + drawdown_risk * 0.25
            + consecutive_risk * 0.10
            + volatility_risk * 0.10;
        debug!(
            "RiskEvaluator: score components ml={:.2} anomaly={:.2} dd={:.2} streak={:.2} vol={:.2}",
            ml_risk, anomaly_risk, drawdown_risk, consecutive_risk, volatility_risk
        );
        total.clamp(0.0, 1.0)
    }

    /// Feed one realised result into both consumers of the shared history.
    /// Returns the drawdown status transition, if any, for event publication.
    pub fn record_trade_result(&mut self, record: TradeRecord) -> Option<TradingStatus> {
        self.kelly.record_trade(record.clone());
        self.drawdown.record_trade_result(record.pnl, record.timestamp)
    }

    /// Capital committed to an open position; counts against the usage ceiling.
    pub fn reserve_capital(&mut self, notional: Decimal) {
        self.committed_capital += notional;
    }

    pub fn release_capital(&mut self, notional: Decimal) {
        self.committed_capital = (self.committed_capital - notional).max(Decimal::ZERO);
    }

    pub fn metrics(&self) -> &EvaluatorMetrics {
        &self.metrics
    }

    pub fn drawdown(&self) -> &DrawdownGuard {
        &self.drawdown
    }

    pub fn drawdown_mut(&mut self) -> &mut DrawdownGuard {
        &mut self.drawdown
    }

    pub fn recent_alerts(&mut self, snapshot: &MarketSnapshot, latency_ms: f64) -> Vec<AnomalyAlert> {
        self.anomaly.check(snapshot, latency_ms)
    }
}
