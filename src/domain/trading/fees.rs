use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::market::types::Ticker;
use crate::domain::trading::types::{Liquidity, SignalSide, TradeSignal};

/// Per-symbol maker/taker rates. A negative maker rate is a rebate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeRates {
    pub maker: Decimal,
    pub taker: Decimal,
}

/// A priced fee estimate for one prospective order. Signed: negative
/// `expected_fee` means the venue pays us.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeQuote {
    pub liquidity: Liquidity,
    pub fee_rate: Decimal,
    pub expected_fee: Decimal,
}

/// Pure fee model over a per-symbol rate table.
#[derive(Debug, Clone)]
pub struct FeeModel {
    default_rates: FeeRates,
    table: HashMap<String, FeeRates>,
    /// Signals with urgency at or above this never rest on the book.
    maker_urgency_threshold: f64,
}

impl FeeModel {
    pub fn new(default_rates: FeeRates, maker_urgency_threshold: f64) -> Self {
        Self {
            default_rates,
            table: HashMap::new(),
            maker_urgency_threshold,
        }
    }

    pub fn with_symbol_rates(mut self, symbol: impl Into<String>, rates: FeeRates) -> Self {
        self.table.insert(symbol.into(), rates);
        self
    }

    pub fn rates(&self, symbol: &str) -> FeeRates {
        self.table.get(symbol).copied().unwrap_or(self.default_rates)
    }

    /// Expected fee for executing `amount` at `price` with the given liquidity.
    pub fn quote(
        &self,
        symbol: &str,
        liquidity: Liquidity,
        amount: Decimal,
        price: Decimal,
    ) -> FeeQuote {
        let rates = self.rates(symbol);
        let fee_rate = match liquidity {
            Liquidity::Maker => rates.maker,
            Liquidity::Taker => rates.taker,
        };
        FeeQuote {
            liquidity,
            fee_rate,
            expected_fee: amount * price * fee_rate,
        }
    }

    /// Classify a signal as a maker or taker candidate against the current
    /// touch. Maker requires the target price to rest strictly inside the
    /// opposite side of the book (buy below ask, sell above bid) and urgency
    /// below the configured threshold.
    pub fn classify(&self, signal: &TradeSignal, ticker: &Ticker) -> Liquidity {
        if signal.urgency >= self.maker_urgency_threshold {
            return Liquidity::Taker;
        }
        let rests = match signal.side {
            SignalSide::Buy => signal.target_price < ticker.ask,
            SignalSide::Sell => signal.target_price > ticker.bid,
            SignalSide::Hold => false,
        };
        if rests { Liquidity::Maker } else { Liquidity::Taker }
    }
}

/// Running maker/taker execution statistics; fee_saved accumulates the delta
/// realised by taker-avoidance substitutions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeePerformance {
    pub maker_fills: u64,
    pub taker_fills: u64,
    pub fees_paid: Decimal,
    pub rebates_earned: Decimal,
    pub fee_saved: Decimal,
}

impl FeePerformance {
    pub fn record_fill(&mut self, liquidity: Liquidity, fee: Decimal) {
        match liquidity {
            Liquidity::Maker => {
                self.maker_fills += 1;
                if fee < Decimal::ZERO {
                    self.rebates_earned += -fee;
                } else {
                    self.fees_paid += fee;
                }
            }
            Liquidity::Taker => {
                self.taker_fills += 1;
                self.fees_paid += fee;
            }
        }
    }

    pub fn record_saving(&mut self, delta: Decimal) {
        self.fee_saved += delta;
    }

    pub fn maker_ratio(&self) -> f64 {
        let total = self.maker_fills + self.taker_fills;
        if total == 0 {
            return 0.0;
        }
        self.maker_fills as f64 / total as f64
    }
}
