use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject all requests
    HalfOpen, // Testing if service recovered - allow one probe
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Outcome of asking the breaker for permission to call downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Proceed normally.
    Allow,
    /// Proceed, but this is the single half-open probe.
    AllowProbe,
    /// Fail fast; retry after the given duration.
    RejectOpen { retry_in: Duration },
}

/// Three-state circuit breaker, driven externally so its owner can hold it
/// inside a larger lock. The gateway asks `check`, performs the call with no
/// lock held, then reports `on_success`/`on_failure`.
///
/// Half-open admits exactly one probe: success closes the circuit, failure
/// reopens it and restarts the recovery timer.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
    opens: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            probe_in_flight: false,
            opens: 0,
        }
    }

    pub fn check(&mut self, now: Instant) -> BreakerDecision {
        match self.state {
            CircuitState::Closed => BreakerDecision::Allow,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_at
                    .map(|t| now.duration_since(t))
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    info!("CircuitBreaker [{}]: Open -> HalfOpen (timeout elapsed)", self.name);
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    BreakerDecision::AllowProbe
                } else {
                    BreakerDecision::RejectOpen {
                        retry_in: self.recovery_timeout - elapsed,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    // The probe slot is taken; everyone else fails fast.
                    BreakerDecision::RejectOpen {
                        retry_in: self.recovery_timeout,
                    }
                } else {
                    self.probe_in_flight = true;
                    BreakerDecision::AllowProbe
                }
            }
        }
    }

    pub fn on_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                info!("CircuitBreaker [{}]: HalfOpen -> Closed (probe succeeded)", self.name);
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.probe_in_flight = false;
            }
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::Open => {
                warn!("CircuitBreaker [{}]: success recorded in Open state (unexpected)", self.name);
            }
        }
    }

    pub fn on_failure(&mut self, now: Instant) {
        self.failure_count += 1;
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::Closed => {
                if self.failure_count >= self.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Closed -> Open ({} failures)",
                        self.name, self.failure_count
                    );
                    self.state = CircuitState::Open;
                    self.opens += 1;
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: HalfOpen -> Open (probe failed)",
                    self.name
                );
                self.state = CircuitState::Open;
                self.probe_in_flight = false;
                self.opens += 1;
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn opens(&self) -> u64 {
        self.opens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", 3, Duration::from_secs(60))
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let mut cb = breaker();
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(cb.check(now), BreakerDecision::Allow);
            cb.on_failure(now);
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.check(now), BreakerDecision::RejectOpen { .. }));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut cb = breaker();
        let now = Instant::now();
        cb.on_failure(now);
        cb.on_failure(now);
        cb.on_success();
        cb.on_failure(now);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_single_probe_after_recovery_timeout() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.on_failure(t0);
        }

        let later = t0 + Duration::from_secs(61);
        assert_eq!(cb.check(later), BreakerDecision::AllowProbe);
        // Second caller while the probe is out is rejected.
        assert!(matches!(cb.check(later), BreakerDecision::RejectOpen { .. }));

        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.check(later), BreakerDecision::Allow);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.on_failure(t0);
        }
        let later = t0 + Duration::from_secs(61);
        assert_eq!(cb.check(later), BreakerDecision::AllowProbe);
        cb.on_failure(later);
        assert_eq!(cb.state(), CircuitState::Open);
        // Timer restarted: still rejecting shortly after.
        assert!(matches!(
            cb.check(later + Duration::from_secs(1)),
            BreakerDecision::RejectOpen { .. }
        ));
        assert_eq!(cb.opens(), 2);
    }
}
