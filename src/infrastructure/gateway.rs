use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::domain::errors::{ExchangeError, GatewayError};
use crate::domain::events::TradingEvent;
use crate::infrastructure::circuit_breaker::{BreakerDecision, CircuitBreaker, CircuitState};

/// Which request budget an outbound call draws from. The venue meters
/// mutating calls (create, cancel) under one POST-family budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub get_limit: usize,
    pub post_limit: usize,
    pub window: Duration,
    pub max_retries: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: f64,
    pub call_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            get_limit: 10,
            post_limit: 6,
            window: Duration::from_secs(1),
            max_retries: 3,
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(60),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Exponential backoff with ±20% jitter.
struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    fn new(config: &GatewayConfig) -> Self {
        Self {
            current: config.backoff_initial,
            max: config.backoff_max,
            multiplier: config.backoff_multiplier,
        }
    }

    fn next(&mut self) -> Duration {
        let base = self.current.min(self.max);
        let jitter: f64 = rand::rng().random_range(0.8..1.2);
        let delay = base.mul_f64(jitter);
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        delay
    }
}

/// In-memory counters; reset only when the process restarts.
#[derive(Debug, Clone, Default)]
pub struct GatewayStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub total_retries: u64,
    pub breaker_opens: u64,
    pub breaker_state: &'static str,
    pub current_get_requests: usize,
    pub current_post_requests: usize,
    pub get_utilization: f64,
    pub post_utilization: f64,
    pub last_latency_ms: f64,
}

struct GatewayState {
    get_window: VecDeque<Instant>,
    post_window: VecDeque<Instant>,
    breaker: CircuitBreaker,
    stats: GatewayStats,
}

impl GatewayState {
    fn window_mut(&mut self, kind: RequestKind) -> &mut VecDeque<Instant> {
        match kind {
            RequestKind::Get => &mut self.get_window,
            RequestKind::Post => &mut self.post_window,
        }
    }

    fn cleanup(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.get_window.front() {
            if now.duration_since(front) >= window {
                self.get_window.pop_front();
            } else {
                break;
            }
        }
        while let Some(&front) = self.post_window.front() {
            if now.duration_since(front) >= window {
                self.post_window.pop_front();
            } else {
                break;
            }
        }
    }
}

use rand::Rng;

/// Rate-limited, circuit-breaker-protected access to the exchange. Every
/// outbound call goes through `execute`.
///
/// The sliding windows and breaker live under one mutex which is never held
/// across I/O: acquire to check and update, release before sleeping or
/// sending.
pub struct RateLimitedGateway {
    config: GatewayConfig,
    state: Mutex<GatewayState>,
    event_tx: Option<UnboundedSender<TradingEvent>>,
}

impl RateLimitedGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let breaker = CircuitBreaker::new(
            "gateway",
            config.breaker_failure_threshold,
            config.breaker_recovery_timeout,
        );
        Self {
            config,
            state: Mutex::new(GatewayState {
                get_window: VecDeque::new(),
                post_window: VecDeque::new(),
                breaker,
                stats: GatewayStats {
                    breaker_state: CircuitState::Closed.as_str(),
                    ..GatewayStats::default()
                },
            }),
            event_tx: None,
        }
    }

    /// Attach a sink for `CircuitBreakerChanged` events.
    pub fn with_event_sink(mut self, tx: UnboundedSender<TradingEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run `op` under the rate limit, breaker, and retry policy.
    ///
    /// Rate-limit waits are not failures: a 429 (or a message matching the
    /// documented indicators) sleeps for the server-sent `Retry-After` when
    /// present, the exponential schedule otherwise, and does not count
    /// against the breaker or the window. Only transient transport errors
    /// (network, 5xx, timeout) increment the breaker.
    pub async fn execute<T, F, Fut>(&self, kind: RequestKind, op: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut backoff = Backoff::new(&self.config);
        let mut attempt: u32 = 0;

        {
            let mut state = self.state.lock().await;
            state.stats.total_requests += 1;
        }

        loop {
            // Reserve a window slot; sleeps (without the lock) until one frees.
            let slot = self.acquire_slot(kind).await;

            // Breaker gate.
            let decision = {
                let mut state = self.state.lock().await;
                let before = state.breaker.state();
                let decision = state.breaker.check(Instant::now());
                let after = state.breaker.state();
                drop(state);
                self.publish_breaker_change(before, after);
                decision
            };
            let is_probe = match decision {
                BreakerDecision::Allow => false,
                BreakerDecision::AllowProbe => true,
                BreakerDecision::RejectOpen { retry_in } => {
                    self.release_slot(kind, slot).await;
                    return Err(GatewayError::CircuitOpen { retry_in });
                }
            };

            let started = Instant::now();
            let result = match tokio::time::timeout(self.config.call_timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(ExchangeError::Network(format!(
                    "gateway call timed out after {:?}",
                    self.config.call_timeout
                ))),
            };
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(value) => {
                    let mut state = self.state.lock().await;
                    let before = state.breaker.state();
                    state.breaker.on_success();
                    let after = state.breaker.state();
                    state.stats.successful_requests += 1;
                    state.stats.last_latency_ms = latency_ms;
                    drop(state);
                    self.publish_breaker_change(before, after);
                    if attempt > 0 {
                        debug!("Gateway: request succeeded after {} retries", attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_rate_limited() => {
                    // Not a failure; give the slot back and honour the server.
                    self.release_slot(kind, slot).await;
                    {
                        let mut state = self.state.lock().await;
                        state.stats.rate_limited_requests += 1;
                        if is_probe {
                            state.breaker.on_success();
                        }
                    }
                    if attempt >= self.config.max_retries {
                        let mut state = self.state.lock().await;
                        state.stats.failed_requests += 1;
                        return Err(GatewayError::RetriesExhausted { source: e });
                    }
                    attempt += 1;
                    let delay = match e.retry_after() {
                        Some(secs) => {
                            warn!("Gateway: rate limited, honouring Retry-After {}s", secs);
                            Duration::from_secs(secs)
                        }
                        None => {
                            let d = backoff.next();
                            warn!("Gateway: rate limited, backing off {:?}", d);
                            d
                        }
                    };
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    let exhausted = {
                        let mut state = self.state.lock().await;
                        let before = state.breaker.state();
                        state.breaker.on_failure(Instant::now());
                        let after = state.breaker.state();
                        if after == CircuitState::Open && before != CircuitState::Open {
                            state.stats.breaker_opens += 1;
                        }
                        state.stats.last_latency_ms = latency_ms;
                        let exhausted = attempt >= self.config.max_retries;
                        if exhausted {
                            state.stats.failed_requests += 1;
                        } else {
                            state.stats.total_retries += 1;
                        }
                        drop(state);
                        self.publish_breaker_change(before, after);
                        exhausted
                    };
                    if exhausted {
                        return Err(GatewayError::RetriesExhausted { source: e });
                    }
                    attempt += 1;
                    let delay = backoff.next();
                    warn!("Gateway: transient failure (attempt {}), retrying in {:?}: {}", attempt, delay, e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    // A definitive server answer: the venue is reachable.
                    let mut state = self.state.lock().await;
                    let before = state.breaker.state();
                    state.breaker.on_success();
                    let after = state.breaker.state();
                    state.stats.failed_requests += 1;
                    state.stats.last_latency_ms = latency_ms;
                    drop(state);
                    self.publish_breaker_change(before, after);
                    return Err(GatewayError::Rejected { source: e });
                }
            }
        }
    }

    /// Sleep until the window has room, then claim a slot at send time so
    /// concurrent callers cannot overshoot the budget.
    async fn acquire_slot(&self, kind: RequestKind) -> Instant {
        let limit = match kind {
            RequestKind::Get => self.config.get_limit,
            RequestKind::Post => self.config.post_limit,
        };
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.cleanup(now, self.config.window);
                let window = state.window_mut(kind);
                if window.len() < limit {
                    window.push_back(now);
                    return now;
                }
                let oldest = *window.front().expect("full window has a front");
                self.config.window - now.duration_since(oldest)
            };
            debug!("Gateway: {:?} budget full, waiting {:?}", kind, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Remove a previously claimed slot (rate-limited attempts do not count).
    async fn release_slot(&self, kind: RequestKind, slot: Instant) {
        let mut state = self.state.lock().await;
        let window = state.window_mut(kind);
        if let Some(pos) = window.iter().rposition(|t| *t == slot) {
            window.remove(pos);
        }
    }

    fn publish_breaker_change(&self, before: CircuitState, after: CircuitState) {
        if before == after {
            return;
        }
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(TradingEvent::CircuitBreakerChanged {
                from: before.as_str().to_string(),
                to: after.as_str().to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }

    pub async fn breaker_state(&self) -> CircuitState {
        self.state.lock().await.breaker.state()
    }

    /// Latency of the most recent completed call, for the anomaly detector.
    pub async fn last_latency_ms(&self) -> f64 {
        self.state.lock().await.stats.last_latency_ms
    }

    pub async fn stats(&self) -> GatewayStats {
        let mut state = self.state.lock().await;
        state.cleanup(Instant::now(), self.config.window);
        let mut stats = state.stats.clone();
        stats.breaker_state = state.breaker.state().as_str();
        stats.current_get_requests = state.get_window.len();
        stats.current_post_requests = state.post_window.len();
        stats.get_utilization = state.get_window.len() as f64 / self.config.get_limit.max(1) as f64;
        stats.post_utilization =
            state.post_window.len() as f64 / self.config.post_limit.max(1) as f64;
        stats
    }
}
