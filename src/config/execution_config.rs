use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_concurrent_executions: usize,
    pub execution_timeout_s: u64,
    pub submission_queue_capacity: usize,
    pub submit_timeout_s: u64,
    pub max_wait_s: u64,
    pub poll_interval_ms: u64,
    pub taker_avoid_deadline_s: u64,
    pub taker_avoid_poll_s: u64,
    pub taker_avoid_tolerance: Decimal,
    pub max_retries: u32,
    pub max_requeues: u32,
    pub gateway_timeout_s: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout_s: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    pub candle_history: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
            execution_timeout_s: 300,
            submission_queue_capacity: 32,
            submit_timeout_s: 30,
            max_wait_s: 120,
            poll_interval_ms: 500,
            taker_avoid_deadline_s: 60,
            taker_avoid_poll_s: 5,
            taker_avoid_tolerance: dec!(0.001),
            max_retries: 3,
            max_requeues: 3,
            gateway_timeout_s: 10,
            breaker_failure_threshold: 5,
            breaker_recovery_timeout_s: 60,
            backoff_initial_ms: 1000,
            backoff_max_ms: 60000,
            backoff_multiplier: 2.0,
            candle_history: 30,
        }
    }
}
