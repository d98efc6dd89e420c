use std::time::Duration;
use thiserror::Error;

use crate::domain::trading::types::OrderState;

/// Errors surfaced by an exchange client implementation. The gateway decides
/// which of these retry, which trip the circuit breaker, and which are
/// terminal for the order that triggered them.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("order rejected by venue: {reason}")]
    InvalidOrder { reason: String },

    #[error("venue error {code}: {message}")]
    Api { code: String, message: String },
}

impl ExchangeError {
    /// Rate-limit detection. Besides the dedicated variant, venues bury the
    /// condition in free-text error payloads; match the documented indicators.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ExchangeError::RateLimited { .. } => true,
            ExchangeError::Server { status: 429, .. } => true,
            other => {
                let text = other.to_string().to_lowercase();
                text.contains("429")
                    || text.contains("rate limit")
                    || text.contains("too many requests")
                    || text.contains("ratelimit")
                    || text.contains("rate_limit")
                    || text.contains("too_many_requests")
                    || text.contains("request_limit_exceeded")
                    || text.contains("api_limit_exceeded")
            }
        }
    }

    /// Extract a server-sent `Retry-After` (seconds), either from the typed
    /// variant or from the message text ("Retry-After: 60", "wait 30 seconds").
    pub fn retry_after(&self) -> Option<u64> {
        if let ExchangeError::RateLimited { retry_after } = self {
            return *retry_after;
        }
        let text = self.to_string().to_lowercase();
        for marker in ["retry-after", "retry_after", "wait"] {
            if let Some(idx) = text.find(marker) {
                let tail = &text[idx + marker.len()..];
                let digits: String = tail
                    .chars()
                    .skip_while(|c| *c == ':' || c.is_whitespace())
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                if !digits.is_empty() {
                    return digits.parse().ok();
                }
            }
        }
        None
    }

    /// Transient failures: retried by the gateway and counted by the breaker.
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Network(_) => true,
            ExchangeError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors returned by the rate-limited gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("circuit breaker is open; retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("max retries exceeded: {source}")]
    RetriesExhausted { source: ExchangeError },

    #[error("request rejected: {source}")]
    Rejected { source: ExchangeError },
}

impl GatewayError {
    /// True when the caller may safely re-enqueue the work.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::CircuitOpen { .. } | GatewayError::RetriesExhausted { .. }
        )
    }
}

/// Errors in the order lifecycle.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order state transition from {from} on {event}")]
    InvalidTransition { from: OrderState, event: String },

    #[error("unknown order: {order_id}")]
    UnknownOrder { order_id: String },

    #[error("an order for signal {signal_id} is already in flight")]
    DuplicateInFlight { signal_id: uuid::Uuid },

    #[error("order intent invalid: {reason}")]
    InvalidIntent { reason: String },
}

/// Typed backpressure from the orchestrator's bounded submission queue.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submission queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

/// Durable-state failures. Logged and tolerated: trading continues, but
/// schedules become in-memory only until writes recover.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write state to {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("failed to read state from {path}: {reason}")]
    ReadFailed { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_detection_from_message() {
        let err = ExchangeError::Api {
            code: "20001".to_string(),
            message: "Too many requests, slow down".to_string(),
        };
        assert!(err.is_rate_limited());

        let err = ExchangeError::Network("connection reset".to_string());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_retry_after_from_variant() {
        let err = ExchangeError::RateLimited { retry_after: Some(42) };
        assert_eq!(err.retry_after(), Some(42));
    }

    #[test]
    fn test_retry_after_parsed_from_text() {
        let err = ExchangeError::Api {
            code: "429".to_string(),
            message: "Retry-After: 60".to_string(),
        };
        assert_eq!(err.retry_after(), Some(60));

        let err = ExchangeError::Api {
            code: "429".to_string(),
            message: "please wait 30 seconds".to_string(),
        };
        assert_eq!(err.retry_after(), Some(30));

        let err = ExchangeError::Network("timeout".to_string());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::Network("reset".into()).is_transient());
        assert!(
            ExchangeError::Server {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            !ExchangeError::InvalidOrder {
                reason: "price below minimum".into()
            }
            .is_transient()
        );
    }
}
