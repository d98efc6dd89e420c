use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Best bid/ask plus last trade, as returned by the venue ticker endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// (ask − bid) / last; the market-quality signal used by the anomaly checks.
    pub fn spread_pct(&self) -> Decimal {
        if self.last.is_zero() {
            return Decimal::ZERO;
        }
        (self.ask - self.bid) / self.last
    }

    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

/// Depth snapshot. Bids descending, asks ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Everything the risk layer needs about the market at one instant: the
/// touch, the last trade, and a short candle history for rolling statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticker: Ticker,
    pub recent: Vec<Candle>,
}

impl MarketSnapshot {
    pub fn closes(&self) -> Vec<f64> {
        self.recent
            .iter()
            .filter_map(|c| c.close.to_f64())
            .collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.recent
            .iter()
            .filter_map(|c| c.volume.to_f64())
            .collect()
    }

    /// Average true range over the recent candles, if enough history exists.
    pub fn atr(&self, period: usize) -> Option<Decimal> {
        if self.recent.len() < period + 1 {
            return None;
        }
        let window = &self.recent[self.recent.len() - period - 1..];
        let mut sum = Decimal::ZERO;
        for pair in window.windows(2) {
            let prev_close = pair[0].close;
            let c = &pair[1];
            let tr = (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs());
            sum += tr;
        }
        Some(sum / Decimal::from(period))
    }

    /// Volatility proxy for risk scoring: ATR(14)/price when possible, else
    /// the stddev of close-to-close returns, else a 2% default.
    pub fn volatility_estimate(&self) -> f64 {
        if let (Some(atr), Some(last)) = (self.atr(14), self.ticker.last.to_f64()) {
            if last > 0.0 {
                if let Some(atr_f) = atr.to_f64() {
                    return atr_f / last;
                }
            }
        }
        let closes = self.closes();
        if closes.len() > 5 {
            let returns: Vec<f64> = closes
                .windows(2)
                .filter(|w| w[0] != 0.0)
                .map(|w| (w[1] - w[0]) / w[0])
                .collect();
            if returns.len() > 1 {
                let sd = returns.as_slice().std_dev();
                if sd.is_finite() {
                    return sd;
                }
            }
        }
        0.02
    }
}

/// One asset's balance as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(close: Decimal, volume: Decimal) -> Candle {
        Candle {
            symbol: "BTC/JPY".to_string(),
            open: close,
            high: close + dec!(1000),
            low: close - dec!(1000),
            close,
            volume,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_spread_pct() {
        let ticker = Ticker {
            symbol: "BTC/JPY".to_string(),
            bid: dec!(4999500),
            ask: dec!(5000500),
            last: dec!(5000000),
            volume: dec!(10),
            timestamp: Utc::now(),
        };
        assert_eq!(ticker.spread_pct(), dec!(0.0002));
    }

    #[test]
    fn test_atr_requires_history() {
        let snapshot = MarketSnapshot {
            ticker: Ticker {
                symbol: "BTC/JPY".to_string(),
                bid: dec!(100),
                ask: dec!(101),
                last: dec!(100),
                volume: dec!(1),
                timestamp: Utc::now(),
            },
            recent: vec![candle(dec!(100), dec!(1)); 5],
        };
        assert!(snapshot.atr(14).is_none());
    }

    #[test]
    fn test_atr_of_constant_range() {
        let snapshot = MarketSnapshot {
            ticker: Ticker {
                symbol: "BTC/JPY".to_string(),
                bid: dec!(5000000),
                ask: dec!(5000100),
                last: dec!(5000000),
                volume: dec!(1),
                timestamp: Utc::now(),
            },
            recent: vec![candle(dec!(5000000), dec!(1)); 20],
        };
        // high − low = 2000 on every bar.
        assert_eq!(snapshot.atr(14), Some(dec!(2000)));
    }

    #[test]
    fn test_book_touch() {
        let book = OrderBook {
            symbol: "BTC/JPY".to_string(),
            bids: vec![BookLevel {
                price: dec!(4999500),
                amount: dec!(0.3),
            }],
            asks: vec![BookLevel {
                price: dec!(5000500),
                amount: dec!(0.2),
            }],
            timestamp: Utc::now(),
        };
        assert_eq!(book.best_bid(), Some(dec!(4999500)));
        assert_eq!(book.best_ask(), Some(dec!(5000500)));
    }
}
