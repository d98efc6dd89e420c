//! Gateway behaviour against the paper venue: sliding-window obedience and
//! breaker trip/recovery, end to end.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jpytrade::domain::errors::{ExchangeError, GatewayError};
use jpytrade::domain::ports::{ExchangeClient, OrderParams};
use jpytrade::domain::trading::types::{OrderSide, OrderType};
use jpytrade::infrastructure::circuit_breaker::CircuitState;
use jpytrade::infrastructure::gateway::{GatewayConfig, RateLimitedGateway, RequestKind};
use jpytrade::infrastructure::venue::paper::PaperVenue;

async fn venue() -> PaperVenue {
    let venue = PaperVenue::new();
    venue
        .set_ticker("BTC/JPY", dec!(4999500), dec!(5000500), dec!(5000000))
        .await;
    venue
}

#[tokio::test]
async fn test_seven_posts_respect_six_per_second() {
    let venue = venue().await;
    let gateway = RateLimitedGateway::new(GatewayConfig::default());

    let start = Instant::now();
    for _ in 0..7 {
        let venue = venue.clone();
        gateway
            .execute(RequestKind::Post, move || {
                let venue = venue.clone();
                async move {
                    venue
                        .create_order(
                            "BTC/JPY",
                            OrderSide::Buy,
                            OrderType::Market,
                            dec!(0.001),
                            None,
                            OrderParams::default(),
                        )
                        .await
                        .map(|_| ())
                }
            })
            .await
            .unwrap();
    }

    // No 1s window may contain more than 6 sends, so the 7th waits.
    assert!(start.elapsed() >= Duration::from_millis(900));
    let stats = gateway.stats().await;
    assert_eq!(stats.successful_requests, 7);
    assert_eq!(stats.rate_limited_requests, 0);
    assert_eq!(gateway.breaker_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_breaker_trip_fail_fast_probe_recovery() {
    let venue = venue().await;
    let gateway = RateLimitedGateway::new(GatewayConfig {
        max_retries: 0,
        breaker_failure_threshold: 5,
        breaker_recovery_timeout: Duration::from_millis(300),
        ..GatewayConfig::default()
    });

    // Five consecutive transport failures open the breaker.
    for _ in 0..5 {
        venue
            .inject_failure(ExchangeError::Network("connection refused".to_string()))
            .await;
        let venue = venue.clone();
        let result = gateway
            .execute(RequestKind::Post, move || {
                let venue = venue.clone();
                async move {
                    venue
                        .create_order(
                            "BTC/JPY",
                            OrderSide::Buy,
                            OrderType::Market,
                            dec!(0.001),
                            None,
                            OrderParams::default(),
                        )
                        .await
                }
            })
            .await;
        assert!(matches!(result, Err(GatewayError::RetriesExhausted { .. })));
    }
    assert_eq!(gateway.breaker_state().await, CircuitState::Open);

    // While open, calls fail fast without touching the venue.
    let result = gateway
        .execute(RequestKind::Get, || async { Ok::<_, ExchangeError>(()) })
        .await;
    assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));

    // After the recovery timeout, one probe is allowed; success closes.
    tokio::time::sleep(Duration::from_millis(350)).await;
    let venue_probe = venue.clone();
    gateway
        .execute(RequestKind::Get, move || {
            let venue = venue_probe.clone();
            async move { venue.fetch_ticker("BTC/JPY").await.map(|_| ()) }
        })
        .await
        .unwrap();
    assert_eq!(gateway.breaker_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_venue_retry_after_is_honoured() {
    let venue = venue().await;
    let gateway = RateLimitedGateway::new(GatewayConfig::default());
    venue
        .inject_failure(ExchangeError::RateLimited { retry_after: Some(1) })
        .await;

    let start = Instant::now();
    let venue_op = venue.clone();
    gateway
        .execute(RequestKind::Post, move || {
            let venue = venue_op.clone();
            async move {
                venue
                    .create_order(
                        "BTC/JPY",
                        OrderSide::Sell,
                        OrderType::Market,
                        dec!(0.001),
                        None,
                        OrderParams::default(),
                    )
                    .await
            }
        })
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(1));
    let stats = gateway.stats().await;
    assert_eq!(stats.rate_limited_requests, 1);
    assert_eq!(gateway.breaker_state().await, CircuitState::Closed);
}
