use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Venue parameters: the traded pair, its fee schedule, and the request-rate
/// budgets the gateway must respect.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub symbol: String,
    pub margin_mode: bool,
    /// Negative = rebate.
    pub fee_rate_maker: Decimal,
    pub fee_rate_taker: Decimal,
    /// Requests per window.
    pub rate_limit_get: usize,
    pub rate_limit_post: usize,
    pub rate_limit_window_s: u64,
    pub price_tick: Decimal,
    pub min_lot: Decimal,
    /// All schedule times are interpreted at this fixed UTC offset.
    pub utc_offset_hours: i32,
    pub public_url: String,
    pub private_url: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC/JPY".to_string(),
            margin_mode: true,
            fee_rate_maker: dec!(-0.0002),
            fee_rate_taker: dec!(0.0012),
            rate_limit_get: 10,
            rate_limit_post: 6,
            rate_limit_window_s: 1,
            price_tick: Decimal::ONE,
            min_lot: dec!(0.0001),
            utc_offset_hours: 9,
            public_url: "https://public.bitbank.cc".to_string(),
            private_url: "https://api.bitbank.cc".to_string(),
        }
    }
}
