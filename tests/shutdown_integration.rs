//! Structured shutdown: intake stops, running work drains, state persists.

use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use jpytrade::application::system::TradingSystem;
use jpytrade::config::Config;
use jpytrade::domain::errors::SubmitError;
use jpytrade::domain::market::types::Candle;
use jpytrade::domain::trading::types::{SignalSide, TradeSignal};
use jpytrade::infrastructure::venue::paper::PaperVenue;

#[tokio::test]
async fn test_stop_persists_state_and_rejects_new_signals() {
    let state_path = std::env::temp_dir().join(format!("jpytrade_shutdown_{}.json", Uuid::new_v4()));
    let config = Config::from_toml_str(&format!(
        r#"
        [execution]
        poll_interval_ms = 50

        [state]
        persistence_path = "{}"
        mode = "paper"
        "#,
        state_path.display()
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
    system.start().await;
    system.stop().await;

    // State was persisted last, with the documented shape.
    let raw = std::fs::read_to_string(&state_path).unwrap();
    let doc: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["version"], 1);
    assert_eq!(doc["status"], "active");
    assert!(doc["peak_balance"].is_string() || doc["peak_balance"].is_number());
    assert!(doc.get("last_updated").is_some());

    // Intake is closed.
    let err = system
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
        .unwrap_err();
    assert!(matches!(err, SubmitError::ShuttingDown));

    let _ = std::fs::remove_file(&state_path);
}
