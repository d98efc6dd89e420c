//! End-to-end pipeline tests over the paper venue: signal in, events and
//! fills out.

use chrono::Utc;
use jpytrade::domain::ports::ExchangeClient;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use jpytrade::application::system::TradingSystem;
use jpytrade::config::Config;
use jpytrade::domain::errors::SubmitError;
use jpytrade::domain::events::{EventListener, TradingEvent};
use jpytrade::domain::market::types::Candle;
use jpytrade::domain::risk::evaluator::RiskDecision;
use jpytrade::domain::trading::types::{SignalSide, TradeSignal};
use jpytrade::infrastructure::venue::paper::PaperVenue;

struct Recorder {
    events: Arc<Mutex<Vec<TradingEvent>>>,
}

impl EventListener for Recorder {
    fn on_event(&self, event: &TradingEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn test_config() -> Config {
    Config::from_toml_str(
        r#"
        [exchange]
        min_lot = 0.01

        [risk]
        kelly_cap = 0.05

        [execution]
        poll_interval_ms = 50
        taker_avoid_deadline_s = 1
        taker_avoid_poll_s = 1

        [state]
        mode = "backtest"
        "#,
    )
    .unwrap()
}

async fn seeded_venue() -> PaperVenue {
    let venue = PaperVenue::new();
    venue
        .set_ticker("BTC/JPY", dec!(4999500), dec!(5000500), dec!(5000000))
        .await;
    let candles = (0..20)
        .map(|i| Candle {
            symbol: "BTC/JPY".to_string(),
            open: dec!(5000000),
            high: dec!(5000000),
            low: dec!(5000000),
            close: dec!(5000000),
            volume: dec!(10),
            timestamp: Utc::now() - chrono::Duration::minutes(20 - i),
        })
        .collect();
    venue.push_candles("BTC/JPY", candles).await;
    venue
}

async fn system_with_recorder() -> (TradingSystem, PaperVenue, Arc<Mutex<Vec<TradingEvent>>>) {
    let venue = seeded_venue().await;
    let system = TradingSystem::build(
        &test_config(),
        Arc::new(venue.clone()),
        dec!(1000000),
    )
    .unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    system
        .subscribe(Arc::new(Recorder {
            events: Arc::clone(&events),
        }))
        .await;
    system.start().await;
    (system, venue, events)
}

fn signal(target_price: Decimal, urgency: f64) -> TradeSignal {
    TradeSignal {
        id: Uuid::new_v4(),
        symbol: "BTC/JPY".to_string(),
        side: SignalSide::Buy,
        amount: dec!(0.01),
        target_price,
        confidence: 0.75,
        urgency,
        expected_profit: dec!(600),
        source: "test-strategy".to_string(),
        created_at: Utc::now(),
    }
}

fn kinds(events: &Arc<Mutex<Vec<TradingEvent>>>) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(|e| e.kind()).collect()
}

fn assert_subsequence(haystack: &[&str], needle: &[&str]) {
    let mut it = haystack.iter();
    for expected in needle {
        assert!(
            it.any(|k| k == expected),
            "expected event sequence {:?} in {:?}",
            needle,
            haystack
        );
    }
}

#[tokio::test]
async fn test_happy_path_maker_fill() {
    let (system, venue, events) = system_with_recorder().await;

    // Target rests below the ask: classified maker, posted at the target.
    let handle = system.submit(signal(dec!(5000000), 0.2)).await.unwrap();

    // Let the maker order land, then trade through it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    venue
        .set_ticker("BTC/JPY", dec!(4998500), dec!(4999500), dec!(4999000))
        .await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome.status,
        jpytrade::application::execution::orchestrator::ExecutionStatus::Completed
    );
    // Maker rebate: −0.0002 · 0.01 · 5,000,000 = −10.
    let fill = outcome.fill.expect("maker fill");
    assert_eq!(fill.price, dec!(5000000));
    assert_eq!(fill.fee_paid, dec!(-10));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let observed = kinds(&events);
    assert_subsequence(
        &observed,
        &[
            "signal_received",
            "risk_decision",
            "order_submitted",
            "order_filled",
            "position_opened",
        ],
    );

    // The risk decision was an approval.
    let approved = events.lock().unwrap().iter().any(|e| {
        matches!(
            e,
            TradingEvent::RiskDecision {
                decision: RiskDecision::Approved,
                ..
            }
        )
    });
    assert!(approved);

    system.stop().await;
}

#[tokio::test]
async fn test_taker_avoidance_falls_back_after_deadline() {
    let (system, venue, events) = system_with_recorder().await;

    // Target at the ask: classified taker, low urgency: avoidance kicks in.
    let handle = system.submit(signal(dec!(5000500), 0.2)).await.unwrap();

    // The book runs away a little, not enough for the adverse-move bailout.
    tokio::time::sleep(Duration::from_millis(300)).await;
    venue
        .set_ticker("BTC/JPY", dec!(5000500), dec!(5001500), dec!(5001000))
        .await;

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.outcome())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome.status,
        jpytrade::application::execution::orchestrator::ExecutionStatus::Completed
    );

    // Fallback taker at the moved ask: 0.0012 · 0.01 · 5,001,500 = 60.018.
    let fill = outcome.fill.expect("taker fallback fill");
    assert_eq!(fill.price, dec!(5001500));
    assert_eq!(fill.fee_paid, dec!(60.018));
    // The detour cost more than taking immediately: negative saving.
    assert!(outcome.fee_saved < Decimal::ZERO);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_subsequence(
        &kinds(&events),
        &["signal_received", "risk_decision", "order_submitted", "order_filled"],
    );

    system.stop().await;
}

#[tokio::test]
async fn test_low_confidence_signal_denied() {
    let (system, _venue, events) = system_with_recorder().await;

    let mut weak = signal(dec!(5000000), 0.2);
    weak.confidence = 0.1;
    let handle = system.submit(weak).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome.status,
        jpytrade::application::execution::orchestrator::ExecutionStatus::Denied
    );
    assert!(outcome.reasons.iter().any(|r| r.contains("confidence")));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let denied = events.lock().unwrap().iter().any(|e| {
        matches!(
            e,
            TradingEvent::RiskDecision {
                decision: RiskDecision::Denied,
                ..
            }
        )
    });
    assert!(denied);

    system.stop().await;
}

#[tokio::test]
async fn test_submission_queue_backpressure() {
    let venue = seeded_venue().await;
    let config = Config::from_toml_str(
        r#"
        [execution]
        submission_queue_capacity = 1

        [state]
        mode = "backtest"
        "#,
    )
    .unwrap();
    let system = TradingSystem::build(&config, Arc::new(venue.clone()), dec!(1000000)).unwrap();
    // Not started: nothing drains the queue.

    system.submit(signal(dec!(5000000), 0.2)).await.unwrap();
    let err = system.submit(signal(dec!(5000000), 0.2)).await.unwrap_err();
    assert!(matches!(err, SubmitError::QueueFull { capacity: 1 }));
}

#[tokio::test]
async fn test_cancellation_cancels_resting_order() {
    let (system, venue, _events) = system_with_recorder().await;

    // Maker order rests; nothing crosses it.
    let handle = system.submit(signal(dec!(5000000), 0.2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(venue.fetch_open_orders("BTC/JPY").await.unwrap().len(), 1);

    handle.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome.status,
        jpytrade::application::execution::orchestrator::ExecutionStatus::Cancelled
    );

    // The in-flight order was cancelled on the venue.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(venue.fetch_open_orders("BTC/JPY").await.unwrap().is_empty());

    system.stop().await;
}

#[tokio::test]
async fn test_execution_timeout_cancels_order() {
    let venue = seeded_venue().await;
    let config = Config::from_toml_str(
        r#"
        [exchange]
        min_lot = 0.01

        [risk]
        kelly_cap = 0.05

        [execution]
        poll_interval_ms = 50
        execution_timeout_s = 1

        [state]
        mode = "backtest"
        "#,
    )
    .unwrap();
    let system = TradingSystem::build(&config, Arc::new(venue.clone()), dec!(1000000)).unwrap();
    system.start().await;

    let handle = system.submit(signal(dec!(5000000), 0.2)).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome.status,
        jpytrade::application::execution::orchestrator::ExecutionStatus::TimedOut
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(venue.fetch_open_orders("BTC/JPY").await.unwrap().is_empty());

    system.stop().await;
}

#[tokio::test]
async fn test_submit_after_stop_rejected() {
    let (system, _venue, _events) = system_with_recorder().await;
    system.stop().await;
    let err = system.submit(signal(dec!(5000000), 0.2)).await.unwrap_err();
    assert!(matches!(err, SubmitError::ShuttingDown));
}
