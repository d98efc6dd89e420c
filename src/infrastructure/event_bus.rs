use crate::domain::events::{EventListener, TradingEvent};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

struct Subscription {
    listener: Arc<dyn EventListener>,
    /// `None` receives everything; otherwise only the named event kinds.
    kinds: Option<HashSet<&'static str>>,
}

impl Subscription {
    fn wants(&self, event: &TradingEvent) -> bool {
        match &self.kinds {
            None => true,
            Some(kinds) => kinds.contains(event.kind()),
        }
    }
}

/// Routes core lifecycle events to downstream transports. A transport can
/// take the whole stream or only the event kinds it cares about (a notifier
/// wants fills and forced closes, not every risk decision), so filtering
/// happens here once instead of in every listener.
pub struct EventBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    published: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            published: Arc::new(AtomicU64::new(0)),
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe a listener to the full event stream.
    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.subscriptions.write().await.push(Subscription {
            listener,
            kinds: None,
        });
    }

    /// Subscribe a listener to specific event kinds only (as named by
    /// `TradingEvent::kind`, e.g. `"order_filled"`).
    pub async fn subscribe_to(&self, listener: Arc<dyn EventListener>, kinds: &[&'static str]) {
        self.subscriptions.write().await.push(Subscription {
            listener,
            kinds: Some(kinds.iter().copied().collect()),
        });
    }

    /// Deliver an event to every subscription whose filter matches.
    /// Listeners must not block; slow transports buffer on their own side.
    pub async fn publish(&self, event: TradingEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let subscriptions = self.subscriptions.read().await;
        let mut delivered = 0;
        for subscription in subscriptions.iter() {
            if subscription.wants(&event) {
                subscription.listener.on_event(&event);
                delivered += 1;
            }
        }
        self.delivered.fetch_add(delivered, Ordering::Relaxed);
        debug!(
            "EventBus: [{}] delivered to {}/{} subscribers",
            event.kind(),
            delivered,
            subscriptions.len()
        );
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// (published, delivered) totals since process start.
    pub fn throughput(&self) -> (u64, u64) {
        (
            self.published.load(Ordering::Relaxed),
            self.delivered.load(Ordering::Relaxed),
        )
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            subscriptions: Arc::clone(&self.subscriptions),
            published: Arc::clone(&self.published),
            delivered: Arc::clone(&self.delivered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::LoggingListener;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use uuid::Uuid;

    pub struct CollectingListener {
        pub kinds: Arc<Mutex<Vec<&'static str>>>,
    }

    impl EventListener for CollectingListener {
        fn on_event(&self, event: &TradingEvent) {
            self.kinds.lock().unwrap().push(event.kind());
        }
    }

    fn signal_event() -> TradingEvent {
        TradingEvent::SignalReceived {
            signal_id: Uuid::new_v4(),
            symbol: "BTC/JPY".to_string(),
            source: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn fill_event() -> TradingEvent {
        TradingEvent::OrderFilled {
            signal_id: Uuid::new_v4(),
            order_id: "42".to_string(),
            symbol: "BTC/JPY".to_string(),
            amount: dec!(0.01),
            avg_price: dec!(5000000),
            fee_paid: dec!(-10),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unfiltered_subscriber_sees_everything() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count().await, 0);

        let kinds = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Arc::new(CollectingListener {
            kinds: Arc::clone(&kinds),
        }))
        .await;
        bus.subscribe(Arc::new(LoggingListener)).await;
        assert_eq!(bus.subscriber_count().await, 2);

        bus.publish(signal_event()).await;
        bus.publish(fill_event()).await;
        assert_eq!(
            kinds.lock().unwrap().as_slice(),
            ["signal_received", "order_filled"]
        );
    }

    #[tokio::test]
    async fn test_filtered_subscriber_sees_only_matching_kinds() {
        let bus = EventBus::new();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_to(
            Arc::new(CollectingListener {
                kinds: Arc::clone(&kinds),
            }),
            &["order_filled"],
        )
        .await;

        bus.publish(signal_event()).await;
        bus.publish(fill_event()).await;
        bus.publish(signal_event()).await;
        assert_eq!(kinds.lock().unwrap().as_slice(), ["order_filled"]);
    }

    #[tokio::test]
    async fn test_throughput_counts_deliveries_not_publishes() {
        let bus = EventBus::new();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Arc::new(CollectingListener {
            kinds: Arc::clone(&kinds),
        }))
        .await;
        bus.subscribe_to(
            Arc::new(CollectingListener {
                kinds: Arc::clone(&kinds),
            }),
            &["order_filled"],
        )
        .await;

        bus.publish(signal_event()).await;
        bus.publish(fill_event()).await;
        // 2 published; signal delivered once, fill delivered twice.
        assert_eq!(bus.throughput(), (2, 3));
    }

    #[tokio::test]
    async fn test_clone_shares_subscriptions_and_counters() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();
        bus1.subscribe(Arc::new(LoggingListener)).await;
        assert_eq!(bus2.subscriber_count().await, 1);
        bus2.publish(signal_event()).await;
        assert_eq!(bus1.throughput().0, 1);
    }
}
