use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::trading::fees::FeeQuote;
use crate::domain::trading::types::Liquidity;

/// Verdict on whether a trade's expected profit survives its fee.
#[derive(Debug, Clone, PartialEq)]
pub enum FeeGuardDecision {
    Approve,
    /// The trade fails at the quoted rate but would clear at the maker rate.
    Modify {
        suggested: Liquidity,
        reason: String,
    },
    Reject {
        reason: String,
    },
}

impl FeeGuardDecision {
    pub fn is_reject(&self) -> bool {
        matches!(self, FeeGuardDecision::Reject { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FeeGuardConfig {
    /// Expected profit must exceed `expected_fee × safety_multiplier`.
    pub safety_multiplier: Decimal,
}

impl Default for FeeGuardConfig {
    fn default() -> Self {
        Self {
            safety_multiplier: Decimal::new(15, 1),
        }
    }
}

/// Rejects or redirects trades whose expected net profit is negative after
/// fees. `quote` is the fee estimate for the planned execution style;
/// `maker_quote` prices the same trade at the maker rate.
pub struct FeeGuard {
    config: FeeGuardConfig,
}

impl FeeGuard {
    pub fn new(config: FeeGuardConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        expected_profit: Decimal,
        quote: &FeeQuote,
        maker_quote: &FeeQuote,
    ) -> FeeGuardDecision {
        let required = quote.expected_fee * self.config.safety_multiplier;
        if expected_profit > required {
            return FeeGuardDecision::Approve;
        }

        debug!(
            "FeeGuard: profit {} does not clear fee floor {} ({})",
            expected_profit, required, quote.liquidity
        );

        // A maker substitution only helps if the deficit vanishes at the
        // maker rate and we are not already quoting maker.
        if quote.liquidity == Liquidity::Taker {
            let maker_required = maker_quote.expected_fee * self.config.safety_multiplier;
            if expected_profit > maker_required {
                return FeeGuardDecision::Modify {
                    suggested: Liquidity::Maker,
                    reason: format!(
                        "expected profit {} clears maker floor {} but not taker floor {}",
                        expected_profit, maker_required, required
                    ),
                };
            }
        }

        FeeGuardDecision::Reject {
            reason: format!(
                "expected profit {} <= fee floor {} ({} rate {})",
                expected_profit, required, quote.liquidity, quote.fee_rate
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn taker_quote(fee: Decimal) -> FeeQuote {
        FeeQuote {
            liquidity: Liquidity::Taker,
            fee_rate: dec!(0.0012),
            expected_fee: fee,
        }
    }

    fn maker_quote() -> FeeQuote {
        FeeQuote {
            liquidity: Liquidity::Maker,
            fee_rate: dec!(-0.0002),
            expected_fee: dec!(-10),
        }
    }

    #[test]
    fn test_profitable_trade_approved() {
        let guard = FeeGuard::new(FeeGuardConfig::default());
        let decision = guard.evaluate(dec!(600), &taker_quote(dec!(60)), &maker_quote());
        assert_eq!(decision, FeeGuardDecision::Approve);
    }

    #[test]
    fn test_thin_trade_suggests_maker() {
        let guard = FeeGuard::new(FeeGuardConfig::default());
        // Profit 50 <= 60 * 1.5, but clears the (negative) maker floor.
        let decision = guard.evaluate(dec!(50), &taker_quote(dec!(60)), &maker_quote());
        assert!(matches!(
            decision,
            FeeGuardDecision::Modify {
                suggested: Liquidity::Maker,
                ..
            }
        ));
    }

    #[test]
    fn test_losing_trade_rejected() {
        let guard = FeeGuard::new(FeeGuardConfig::default());
        let decision = guard.evaluate(dec!(-100), &taker_quote(dec!(60)), &maker_quote());
        assert!(decision.is_reject());
    }

    #[test]
    fn test_maker_quote_with_rebate_approves_small_profit() {
        let guard = FeeGuard::new(FeeGuardConfig::default());
        // Already maker: floor is negative, tiny positive profit passes.
        let decision = guard.evaluate(dec!(1), &maker_quote(), &maker_quote());
        assert_eq!(decision, FeeGuardDecision::Approve);
    }

    #[test]
    fn test_maker_trade_below_negative_floor_rejected() {
        let guard = FeeGuard::new(FeeGuardConfig::default());
        let decision = guard.evaluate(dec!(-20), &maker_quote(), &maker_quote());
        assert!(decision.is_reject());
    }
}
