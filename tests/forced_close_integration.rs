//! End-of-session forced close through the whole stack: a filled position is
//! closed by a critical intent when the configured venue-local time arrives.

use chrono::{FixedOffset, Utc};
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use jpytrade::application::system::TradingSystem;
use jpytrade::config::Config;
use jpytrade::domain::events::{EventListener, TradingEvent};
use jpytrade::domain::market::types::Candle;
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

#[tokio::test]
async fn test_forced_close_closes_open_position() {
    let offset = FixedOffset::east_opt(9 * 3600).unwrap();
    let now_local = Utc::now().with_timezone(&offset);
    // Forced close three seconds out; the interest accrual far away so only
    // the session close can trigger here.
    let forced_close = (now_local + chrono::Duration::seconds(3))
        .time()
        .format("%H:%M:%S")
        .to_string();
    let accrual = (now_local + chrono::Duration::hours(12))
        .time()
        .format("%H:%M:%S")
        .to_string();

    let config = Config::from_toml_str(&format!(
        r#"
        [exchange]
        min_lot = 0.01

        [risk]
        kelly_cap = 0.05

        [execution]
        poll_interval_ms = 50

        [schedule]
        forced_close_time = "{forced_close}"
        interest_accrual_time = "{accrual}"
        monitor_interval_s = 1

        [state]
        mode = "backtest"
        "#
    ))
    .unwrap();

    let venue = PaperVenue::new();
    venue
        .set_ticker("BTC/JPY", dec!(4999500), dec!(5000500), dec!(5000000))
        .await;
    venue
        .push_candles(
            "BTC/JPY",
            (0..20)
                .map(|i| Candle {
                    symbol: "BTC/JPY".to_string(),
                    open: dec!(5000000),
                    high: dec!(5000000),
                    low: dec!(5000000),
                    close: dec!(5000000),
                    volume: dec!(10),
                    timestamp: Utc::now() - chrono::Duration::minutes(20 - i),
                })
                .collect(),
        )
        .await;

    let system = TradingSystem::build(&config, Arc::new(venue.clone()), dec!(1000000)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    system
        .subscribe(Arc::new(Recorder {
            events: Arc::clone(&events),
        }))
        .await;
    system.start().await;

    // Open a position: maker order, crossed shortly after.
    let handle = system
        .submit(TradeSignal {
            id: Uuid::new_v4(),
            symbol: "BTC/JPY".to_string(),
            side: SignalSide::Buy,
            amount: dec!(0.01),
            target_price: dec!(5000000),
            confidence: 0.75,
            urgency: 0.2,
            expected_profit: dec!(600),
            source: "test".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
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
    assert_eq!(system.tracker.snapshot().await.len(), 1);

    // Wait past the forced-close time; the monitor closes everything.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(system.tracker.snapshot().await.is_empty());

    let observed = events.lock().unwrap();
    assert!(
        observed
            .iter()
            .any(|e| matches!(e, TradingEvent::ForcedCloseTriggered { positions: 1, .. }))
    );
    assert!(
        observed
            .iter()
            .any(|e| matches!(e, TradingEvent::PositionClosed { .. }))
    );
    let stats = system.tracker.statistics().await;
    assert_eq!(stats.forced_closes, 1);
    drop(observed);

    system.stop().await;
}
