use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::domain::trading::types::TradeRecord;

const HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone)]
pub struct KellyConfig {
    /// Applied to the raw Kelly fraction before the hard cap. Sane range [0.1, 1.0].
    pub safety_factor: Decimal,
    /// Hard cap on the recommended bankroll fraction. Sane range [0.001, 0.1].
    pub cap: Decimal,
    pub min_trades: usize,
    pub lookback_days: i64,
    /// Fixed lot (base units) used until `min_trades` results exist.
    pub initial_lot: Decimal,
    /// Conservative bankroll fraction when history exists but Kelly cannot be computed.
    pub initial_position_size: Decimal,
    pub target_volatility: Decimal,
    pub max_vol_scale: Decimal,
    pub stop_atr_multiplier: Decimal,
    /// Ceiling on any single position as a share of balance.
    pub safe_balance_ratio: Decimal,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            safety_factor: dec!(0.7),
            cap: dec!(0.03),
            min_trades: 5,
            lookback_days: 30,
            initial_lot: dec!(0.0001),
            initial_position_size: dec!(0.01),
            target_volatility: dec!(0.01),
            max_vol_scale: dec!(3.0),
            stop_atr_multiplier: dec!(2.0),
            safe_balance_ratio: dec!(0.3),
        }
    }
}

/// Full Kelly computation over a filtered history window.
#[derive(Debug, Clone)]
pub struct KellyCalculation {
    pub kelly_fraction: Decimal,
    pub win_rate: f64,
    pub avg_win_loss_ratio: Decimal,
    pub safety_adjusted_fraction: Decimal,
    /// `min(safety_factor · f*, cap)`.
    pub recommended_fraction: Decimal,
    pub sample_size: usize,
    /// Confidence in the estimate itself: `min(1, N / (2·min_trades))`.
    pub estimate_confidence: f64,
}

/// What the sizer recommends: a bankroll fraction once history supports
/// Kelly, or a fixed lot while it does not. The caller converts exactly once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeRecommendation {
    Fraction(Decimal),
    FixedLot(Decimal),
}

impl SizeRecommendation {
    pub fn to_amount(&self, balance: Decimal, price: Decimal) -> Decimal {
        match self {
            SizeRecommendation::FixedLot(lot) => *lot,
            SizeRecommendation::Fraction(f) => {
                if price <= Decimal::ZERO {
                    Decimal::ZERO
                } else {
                    balance * f / price
                }
            }
        }
    }

    pub fn fraction(&self) -> Option<Decimal> {
        match self {
            SizeRecommendation::Fraction(f) => Some(*f),
            SizeRecommendation::FixedLot(_) => None,
        }
    }
}

/// Kelly-criterion position sizing over a rolling trade-result history.
///
/// `f* = (p·b − (1−p)) / b` with `b = avg_win / avg_loss`, clamped to [0, 1],
/// then scaled by the safety factor and clipped at the hard cap.
pub struct KellySizer {
    config: KellyConfig,
    history: Vec<TradeRecord>,
}

impl KellySizer {
    pub fn new(config: KellyConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
        }
    }

    pub fn record_trade(&mut self, record: TradeRecord) {
        debug!(
            "KellySizer: recorded trade pnl={} win={}",
            record.pnl,
            record.is_win()
        );
        self.history.push(record);
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_CAP;
            self.history.drain(..excess);
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Raw Kelly fraction. Invalid inputs clamp to zero rather than erroring;
    /// an unusable estimate means "do not size up", never "crash".
    pub fn kelly_fraction(win_rate: f64, avg_win: Decimal, avg_loss: Decimal) -> Decimal {
        if avg_loss <= Decimal::ZERO || avg_win <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        if !(0.0..=1.0).contains(&win_rate) || win_rate == 0.0 || win_rate == 1.0 {
            return Decimal::ZERO;
        }
        let p = Decimal::from_f64_retain(win_rate).unwrap_or(Decimal::ZERO);
        let q = Decimal::ONE - p;
        let b = avg_win / avg_loss;
        if b <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let f = (b * p - q) / b;
        f.clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// Compute Kelly over the lookback window, optionally filtered to one
    /// strategy. Returns None while the sample is too small or one-sided.
    pub fn calculate_from_history(
        &self,
        strategy_filter: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<KellyCalculation> {
        let cutoff = now - Duration::days(self.config.lookback_days);
        let filtered: Vec<&TradeRecord> = self
            .history
            .iter()
            .filter(|t| t.timestamp >= cutoff)
            .filter(|t| strategy_filter.map(|s| t.strategy == s).unwrap_or(true))
            .collect();

        if filtered.len() < self.config.min_trades {
            debug!(
                "KellySizer: insufficient samples ({} < {})",
                filtered.len(),
                self.config.min_trades
            );
            return None;
        }

        let wins: Vec<Decimal> = filtered
            .iter()
            .filter(|t| t.is_win())
            .map(|t| t.pnl)
            .collect();
        let losses: Vec<Decimal> = filtered
            .iter()
            .filter(|t| !t.is_win())
            .map(|t| t.pnl.abs())
            .collect();

        if wins.is_empty() || losses.is_empty() {
            warn!("KellySizer: history is one-sided, no Kelly estimate");
            return None;
        }

        let win_rate = wins.len() as f64 / filtered.len() as f64;
        let avg_win = wins.iter().sum::<Decimal>() / Decimal::from(wins.len());
        let avg_loss = losses.iter().sum::<Decimal>() / Decimal::from(losses.len());

        let kelly_fraction = Self::kelly_fraction(win_rate, avg_win, avg_loss);
        let safety_adjusted = kelly_fraction * self.config.safety_factor;
        let recommended = safety_adjusted.min(self.config.cap);
        let estimate_confidence =
            (filtered.len() as f64 / (2.0 * self.config.min_trades as f64)).min(1.0);

        info!(
            "KellySizer: f*={} adjusted={} recommended={} win_rate={:.1}% samples={}",
            kelly_fraction,
            safety_adjusted,
            recommended,
            win_rate * 100.0,
            filtered.len()
        );

        Some(KellyCalculation {
            kelly_fraction,
            win_rate,
            avg_win_loss_ratio: avg_win / avg_loss,
            safety_adjusted_fraction: safety_adjusted,
            recommended_fraction: recommended,
            sample_size: filtered.len(),
            estimate_confidence,
        })
    }

    /// ML-confidence-weighted recommendation. Until `min_trades` results
    /// exist the sizer returns the fixed initial lot so early trades still
    /// execute deterministically.
    pub fn calculate_optimal_size(
        &self,
        ml_confidence: f64,
        strategy: Option<&str>,
        now: DateTime<Utc>,
    ) -> SizeRecommendation {
        match self.calculate_from_history(strategy, now) {
            Some(kelly) => {
                let conf = Decimal::from_f64_retain(ml_confidence.clamp(0.0, 1.0))
                    .unwrap_or(Decimal::ZERO);
                let estimate = Decimal::from_f64_retain(kelly.estimate_confidence)
                    .unwrap_or(Decimal::ZERO);
                let fraction = (kelly.recommended_fraction * conf * estimate).min(self.config.cap);
                SizeRecommendation::Fraction(fraction)
            }
            None => {
                if self.history.len() < self.config.min_trades {
                    info!(
                        "KellySizer: history too short ({} < {}), using initial lot {}",
                        self.history.len(),
                        self.config.min_trades,
                        self.config.initial_lot
                    );
                    SizeRecommendation::FixedLot(self.config.initial_lot)
                } else {
                    // History exists but Kelly could not be estimated.
                    let conf = Decimal::from_f64_retain(ml_confidence.clamp(0.0, 1.0))
                        .unwrap_or(Decimal::ZERO);
                    let conservative =
                        (self.config.initial_position_size * conf).min(self.config.cap);
                    warn!(
                        "KellySizer: no Kelly estimate, conservative fraction {}",
                        conservative
                    );
                    SizeRecommendation::Fraction(conservative)
                }
            }
        }
    }

    /// Volatility-scaled sizing with an ATR stop. Returns
    /// `(amount in base units, stop price)`.
    pub fn calculate_dynamic_size(
        &self,
        balance: Decimal,
        entry_price: Decimal,
        atr: Decimal,
        ml_confidence: f64,
        now: DateTime<Utc>,
    ) -> (Decimal, Decimal) {
        if balance <= Decimal::ZERO || entry_price <= Decimal::ZERO || atr < Decimal::ZERO {
            warn!(
                "KellySizer: invalid dynamic sizing inputs (balance={}, entry={}, atr={})",
                balance, entry_price, atr
            );
            return self.fallback_size(balance, entry_price, ml_confidence);
        }

        let base = self
            .calculate_optimal_size(ml_confidence, Some("dynamic"), now)
            .to_amount(balance, entry_price);

        let mut stop = entry_price - atr * self.config.stop_atr_multiplier;
        if stop <= Decimal::ZERO {
            stop = entry_price * dec!(0.99);
        }

        let volatility_pct = if atr.is_zero() {
            self.config.target_volatility
        } else {
            atr / entry_price
        };
        let scale = if volatility_pct <= Decimal::ZERO {
            Decimal::ONE
        } else {
            (self.config.target_volatility / volatility_pct)
                .clamp(dec!(0.1), self.config.max_vol_scale)
        };

        let scaled = base * scale;
        let max_safe = (balance * self.config.safe_balance_ratio / entry_price)
            .min(balance * self.config.cap / entry_price);
        let amount = scaled.min(max_safe);

        info!(
            "KellySizer: dynamic size base={} scale={} final={} stop={}",
            base, scale, amount, stop
        );
        (amount, stop)
    }

    /// Conservative floor of `initial_position_size` scaled by the ML
    /// confidence and capped, then an emergency floor of 0.5% of balance
    /// with a stop 2% below entry. Never returns a negative or unpriced size.
    fn fallback_size(
        &self,
        balance: Decimal,
        entry_price: Decimal,
        ml_confidence: f64,
    ) -> (Decimal, Decimal) {
        if balance > Decimal::ZERO && entry_price > Decimal::ZERO {
            let conf = Decimal::from_f64_retain(ml_confidence.clamp(0.0, 1.0))
                .unwrap_or(Decimal::ZERO);
            let fraction = (self.config.initial_position_size * conf).min(self.config.cap);
            let amount = balance * fraction / entry_price;
            warn!("KellySizer: fallback size {} stop {}", amount, entry_price * dec!(0.95));
            return (amount, entry_price * dec!(0.95));
        }
        let price = entry_price.max(Decimal::ONE);
        let amount = balance.max(Decimal::ZERO) * dec!(0.005) / price;
        (amount, price * dec!(0.98))
    }

    /// Sanity-check configured parameters against their intended ranges.
    pub fn validate_parameters(&self) -> bool {
        let mut ok = true;
        if !(dec!(0.001)..=dec!(0.1)).contains(&self.config.cap) {
            warn!("KellySizer: cap out of range: {}", self.config.cap);
            ok = false;
        }
        if !(dec!(0.1)..=dec!(1.0)).contains(&self.config.safety_factor) {
            warn!(
                "KellySizer: safety factor out of range: {}",
                self.config.safety_factor
            );
            ok = false;
        }
        if !(5..=100).contains(&self.config.min_trades) {
            warn!(
                "KellySizer: min_trades out of range: {}",
                self.config.min_trades
            );
            ok = false;
        }
        ok
    }
}
