use anyhow::{Context, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Daily-schedule settings. Times are venue-local wall clock ("HH:MM" or
/// "HH:MM:SS"), interpreted at the exchange's configured UTC offset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interest_accrual_time: String,
    pub avoidance_lead_hours: i64,
    pub forced_close_time: String,
    pub daily_interest_rate: Decimal,
    pub monitor_interval_s: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interest_accrual_time: "00:00".to_string(),
            avoidance_lead_hours: 2,
            forced_close_time: "23:30".to_string(),
            daily_interest_rate: dec!(0.0004),
            monitor_interval_s: 10,
        }
    }
}

impl ScheduleConfig {
    pub fn parse_time(raw: &str) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .with_context(|| format!("invalid schedule time: {}", raw))
    }

    pub fn interest_accrual(&self) -> Result<NaiveTime> {
        Self::parse_time(&self.interest_accrual_time)
    }

    pub fn forced_close(&self) -> Result<NaiveTime> {
        Self::parse_time(&self.forced_close_time)
    }
}
