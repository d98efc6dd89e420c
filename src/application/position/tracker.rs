use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::execution::order_manager::OrderManager;
use crate::domain::events::TradingEvent;
use crate::domain::repositories::StateRepository;
use crate::domain::trading::position::{InterestSchedule, Position};
use crate::domain::trading::types::{
    FillEvent, OrderIntent, OrderPriority, OrderType, TradeRecord,
};

#[derive(Debug, Clone)]
pub struct PositionTrackerConfig {
    pub symbol: String,
    pub margin_mode: bool,
    pub daily_interest_rate: Decimal,
    /// Venue-local wall-clock time of the daily interest accrual.
    pub interest_accrual_time: NaiveTime,
    /// How long before the accrual the avoidance window opens.
    pub avoidance_lead: ChronoDuration,
    /// Venue-local wall-clock time of the end-of-session forced close.
    pub forced_close_time: NaiveTime,
    pub utc_offset_hours: i32,
    pub monitor_interval: Duration,
}

impl Default for PositionTrackerConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC/JPY".to_string(),
            margin_mode: true,
            daily_interest_rate: Decimal::new(4, 4),
            interest_accrual_time: NaiveTime::from_hms_opt(0, 0, 0).expect("valid time"),
            avoidance_lead: ChronoDuration::hours(2),
            forced_close_time: NaiveTime::from_hms_opt(23, 30, 0).expect("valid time"),
            utc_offset_hours: 9,
            monitor_interval: Duration::from_secs(10),
        }
    }
}

/// Next occurrence of a venue-local wall-clock time, as UTC.
fn next_occurrence(time: NaiveTime, offset_hours: i32, now: DateTime<Utc>) -> DateTime<Utc> {
    let offset = FixedOffset::east_opt(offset_hours * 3600).expect("valid offset");
    let local_now = now.with_timezone(&offset);
    let mut candidate = local_now
        .date_naive()
        .and_time(time)
        .and_local_timezone(offset)
        .single()
        .expect("fixed offsets are unambiguous");
    if candidate <= local_now {
        candidate += ChronoDuration::days(1);
    }
    candidate.with_timezone(&Utc)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerStatistics {
    pub open_positions: usize,
    pub closed_positions: usize,
    pub realised_pnl_total: Decimal,
    pub interest_paid_total: Decimal,
    pub interest_avoided_total: Decimal,
    pub forced_closes: u64,
}

struct TrackerState {
    positions: HashMap<Uuid, Position>,
    schedules: HashMap<Uuid, InterestSchedule>,
    /// Close intents in flight, by position; cleared when the position closes
    /// or the intent dies.
    pending_close: HashMap<Uuid, Uuid>,
    last_price: Decimal,
    forced_close_at: DateTime<Utc>,
    stats: TrackerStatistics,
}

/// Owner of all open positions. Subscribes to fill events, maintains
/// unrealised P&L and interest schedules, recomputes priority tiers, and
/// drives interest-avoidance and end-of-session forced closes.
pub struct PositionTracker {
    config: PositionTrackerConfig,
    state: Mutex<TrackerState>,
    order_manager: Arc<OrderManager>,
    event_tx: UnboundedSender<TradingEvent>,
    record_tx: UnboundedSender<TradeRecord>,
    store: Option<Arc<dyn StateRepository>>,
}

impl PositionTracker {
    pub fn new(
        config: PositionTrackerConfig,
        order_manager: Arc<OrderManager>,
        event_tx: UnboundedSender<TradingEvent>,
        record_tx: UnboundedSender<TradeRecord>,
        store: Option<Arc<dyn StateRepository>>,
        now: DateTime<Utc>,
    ) -> Self {
        // Restart idempotence: a persisted future deadline survives; a stale
        // or missing one is recomputed from configuration.
        let persisted = store
            .as_ref()
            .and_then(|s| s.load_forced_close_deadline().ok())
            .flatten()
            .filter(|deadline| *deadline > now);
        let forced_close_at = persisted.unwrap_or_else(|| {
            next_occurrence(config.forced_close_time, config.utc_offset_hours, now)
        });
        info!("PositionTracker: forced close scheduled at {}", forced_close_at);

        let tracker = Self {
            config,
            state: Mutex::new(TrackerState {
                positions: HashMap::new(),
                schedules: HashMap::new(),
                pending_close: HashMap::new(),
                last_price: Decimal::ZERO,
                forced_close_at,
                stats: TrackerStatistics::default(),
            }),
            order_manager,
            event_tx,
            record_tx,
            store,
        };
        tracker.persist_deadline(forced_close_at);
        tracker
    }

    fn persist_deadline(&self, deadline: DateTime<Utc>) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_forced_close_deadline(Some(deadline)) {
                warn!("PositionTracker: deadline persistence failed: {}", e);
            }
        }
    }

    /// Apply one fill. An opening fill creates a position; a fill opposite an
    /// existing position reduces or closes it, producing a trade record.
    pub async fn on_fill(&self, fill: &FillEvent) {
        let mut state = self.state.lock().await;
        state.last_price = fill.price;

        // Netting: find an open position on this symbol with the opposite side.
        let target = state
            .positions
            .iter()
            .find(|(_, p)| p.symbol == fill.symbol && p.side == fill.side.opposite())
            .map(|(id, _)| *id);

        match target {
            Some(position_id) => {
                let (record, closed) = {
                    let position = state
                        .positions
                        .get_mut(&position_id)
                        .expect("position exists");
                    let pnl = position.reduce(fill.amount, fill.price);
                    let record = TradeRecord {
                        timestamp: fill.timestamp,
                        pnl: pnl - fill.fee_paid,
                        strategy: position.strategy_tag.clone(),
                        confidence_at_entry: 0.0,
                    };
                    (record, position.is_closed())
                };
                let _ = self.record_tx.send(record);

                if closed {
                    let position = state.positions.remove(&position_id).expect("present");
                    let schedule = state.schedules.remove(&position_id);
                    state.pending_close.remove(&position_id);
                    state.stats.closed_positions += 1;
                    state.stats.realised_pnl_total += position.realised_pnl;
                    // Closing before the accrual avoids the projected charge
                    // on what the position was carrying.
                    if let Some(schedule) = schedule {
                        if fill.timestamp < schedule.next_accrual_at {
                            let avoided =
                                schedule.projected(position.entry_price * position.opened_amount);
                            state.stats.interest_avoided_total += avoided;
                            debug!(
                                "PositionTracker: interest avoided {} on {}",
                                avoided, position_id
                            );
                        }
                    }
                    info!(
                        "PositionTracker: position {} closed, realised {}",
                        position_id, position.realised_pnl
                    );
                    let _ = self.event_tx.send(TradingEvent::PositionClosed {
                        position_id,
                        symbol: position.symbol.clone(),
                        realised_pnl: position.realised_pnl,
                        timestamp: fill.timestamp,
                    });
                } else {
                    debug!(
                        "PositionTracker: position {} reduced by {}",
                        position_id, fill.amount
                    );
                }
            }
            None => {
                let mut position = Position::open(
                    fill.symbol.clone(),
                    fill.side,
                    fill.amount,
                    fill.price,
                    fill.timestamp,
                    "default",
                    self.config.margin_mode,
                );
                position.fee_adjust(fill.fee_paid);
                let position_id = position.position_id;

                if self.config.margin_mode {
                    let first_accrual = next_occurrence(
                        self.config.interest_accrual_time,
                        self.config.utc_offset_hours,
                        fill.timestamp,
                    );
                    let schedule = InterestSchedule::new(
                        self.config.daily_interest_rate,
                        first_accrual,
                        self.config.avoidance_lead,
                    );
                    debug!(
                        "PositionTracker: interest schedule for {} (accrual {}, avoid by {})",
                        position_id, schedule.next_accrual_at, schedule.avoidance_deadline
                    );
                    state.schedules.insert(position_id, schedule);
                }

                info!(
                    "PositionTracker: opened {} {} {} @ {}",
                    position.side, position.amount, position.symbol, position.entry_price
                );
                let _ = self.event_tx.send(TradingEvent::PositionOpened {
                    position_id,
                    symbol: position.symbol.clone(),
                    side: position.side,
                    amount: position.amount,
                    entry_price: position.entry_price,
                    timestamp: fill.timestamp,
                });
                state.positions.insert(position_id, position);
            }
        }
    }

    /// Read-only snapshot for the orchestrator and reporting.
    pub async fn snapshot(&self) -> Vec<Position> {
        self.state.lock().await.positions.values().cloned().collect()
    }

    pub async fn statistics(&self) -> TrackerStatistics {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.open_positions = state.positions.len();
        stats
    }

    pub async fn unrealised_pnl(&self, price: Decimal) -> Decimal {
        self.state
            .lock()
            .await
            .positions
            .values()
            .map(|p| p.unrealised_pnl(price))
            .sum()
    }

    pub async fn open_notional(&self) -> Decimal {
        self.state
            .lock()
            .await
            .positions
            .values()
            .map(|p| p.notional())
            .sum()
    }

    /// Emit close intents for every open position at the given priority.
    pub async fn close_all(&self, priority: OrderPriority, reason: &str) {
        let targets: Vec<(Uuid, Position)> = {
            let state = self.state.lock().await;
            state
                .positions
                .iter()
                .filter(|(id, _)| !state.pending_close.contains_key(id))
                .map(|(id, p)| (*id, p.clone()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }
        info!(
            "PositionTracker: closing {} positions ({})",
            targets.len(),
            reason
        );
        let _ = self.event_tx.send(TradingEvent::ForcedCloseTriggered {
            reason: reason.to_string(),
            positions: targets.len(),
            timestamp: Utc::now(),
        });
        for (position_id, position) in targets {
            self.emit_close_intent(position_id, &position, priority).await;
        }
    }

    async fn emit_close_intent(
        &self,
        position_id: Uuid,
        position: &Position,
        priority: OrderPriority,
    ) {
        let signal_id = Uuid::new_v4();
        let intent = OrderIntent {
            signal_id,
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            order_type: OrderType::Market,
            amount: position.amount,
            price: None,
            priority,
            post_only: false,
        };
        match self.order_manager.submit(intent).await {
            Ok(_) => {
                self.state
                    .lock()
                    .await
                    .pending_close
                    .insert(position_id, signal_id);
            }
            Err(e) => {
                warn!(
                    "PositionTracker: close intent for {} rejected: {}",
                    position_id, e
                );
            }
        }
    }

    /// One monitoring pass: interest accrual, avoidance-deadline closes,
    /// forced close, priority recompute, and stale close-intent cleanup.
    pub async fn monitor_once(&self, now: DateTime<Utc>) {
        self.accrue_interest(now).await;
        self.cleanup_stale_closes().await;
        self.recompute_priorities(now).await;
        self.check_avoidance_deadlines(now).await;
        self.check_forced_close(now).await;
    }

    async fn accrue_interest(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let lead = self.config.avoidance_lead;
        let mut paid = Decimal::ZERO;
        for (position_id, schedule) in state.schedules.iter_mut() {
            let Some(position) = state.positions.get(position_id) else {
                continue;
            };
            let accrued = schedule.accrue_due(position.notional(), now, lead);
            if accrued > Decimal::ZERO {
                info!(
                    "PositionTracker: interest {} accrued on {}",
                    accrued, position_id
                );
                paid += accrued;
            }
        }
        state.stats.interest_paid_total += paid;
    }

    /// Positions still open inside their avoidance window are closed at
    /// critical priority before the accrual lands.
    async fn check_avoidance_deadlines(&self, now: DateTime<Utc>) {
        let due: Vec<(Uuid, Position)> = {
            let state = self.state.lock().await;
            state
                .positions
                .iter()
                .filter(|(id, _)| !state.pending_close.contains_key(id))
                .filter(|(id, _)| {
                    state
                        .schedules
                        .get(id)
                        .map(|s| now >= s.avoidance_deadline)
                        .unwrap_or(false)
                })
                .map(|(id, p)| (*id, p.clone()))
                .collect()
        };
        for (position_id, position) in due {
            info!(
                "PositionTracker: avoidance deadline reached for {}, closing",
                position_id
            );
            let _ = self.event_tx.send(TradingEvent::ForcedCloseTriggered {
                reason: "interest avoidance deadline".to_string(),
                positions: 1,
                timestamp: now,
            });
            self.emit_close_intent(position_id, &position, OrderPriority::Critical)
                .await;
        }
    }

    async fn check_forced_close(&self, now: DateTime<Utc>) {
        let due = {
            let state = self.state.lock().await;
            now >= state.forced_close_at
        };
        if !due {
            return;
        }
        let next = next_occurrence(
            self.config.forced_close_time,
            self.config.utc_offset_hours,
            now,
        );
        {
            let mut state = self.state.lock().await;
            state.forced_close_at = next;
            state.stats.forced_closes += 1;
        }
        self.persist_deadline(next);
        self.close_all(OrderPriority::Critical, "end-of-session forced close")
            .await;
    }

    /// Priority tiers from time-to-deadline, stop distance, and the
    /// unrealised P&L trajectory. Tiers map directly onto close-intent
    /// priorities.
    async fn recompute_priorities(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        let price = state.last_price;
        if price <= Decimal::ZERO {
            return;
        }
        let forced_close_at = state.forced_close_at;
        let schedule_deadlines: HashMap<Uuid, DateTime<Utc>> = state
            .schedules
            .iter()
            .map(|(id, s)| (*id, s.avoidance_deadline))
            .collect();

        for (position_id, position) in state.positions.iter_mut() {
            let deadline = schedule_deadlines
                .get(position_id)
                .copied()
                .unwrap_or(forced_close_at)
                .min(forced_close_at);
            let to_deadline = deadline - now;
            let pnl = position.unrealised_pnl(price);
            let loss_floor = -position.notional() * Decimal::new(1, 2);

            let priority = if to_deadline <= ChronoDuration::zero()
                || position
                    .stop_loss
                    .map(|stop| match position.side {
                        crate::domain::trading::types::OrderSide::Buy => price <= stop,
                        crate::domain::trading::types::OrderSide::Sell => price >= stop,
                    })
                    .unwrap_or(false)
            {
                OrderPriority::Critical
            } else if to_deadline <= ChronoDuration::hours(1) || pnl < loss_floor {
                OrderPriority::High
            } else if pnl > position.notional() * Decimal::new(1, 2) {
                OrderPriority::Low
            } else {
                OrderPriority::Medium
            };

            if priority != position.priority {
                debug!(
                    "PositionTracker: priority of {} {} -> {}",
                    position_id, position.priority, priority
                );
                position.priority = priority;
            }
        }
    }

    /// A close intent whose order died (rejected, cancelled) must not block
    /// future close attempts.
    async fn cleanup_stale_closes(&self) {
        let pending: Vec<(Uuid, Uuid)> = {
            let state = self.state.lock().await;
            state
                .pending_close
                .iter()
                .map(|(p, s)| (*p, *s))
                .collect()
        };
        let mut stale = Vec::new();
        for (position_id, signal_id) in pending {
            if self.order_manager.live_orders_for_signal(signal_id).await == 0 {
                stale.push(position_id);
            }
        }
        if !stale.is_empty() {
            let mut state = self.state.lock().await;
            for position_id in stale {
                if state.positions.contains_key(&position_id) {
                    debug!(
                        "PositionTracker: close intent for {} died, will retry",
                        position_id
                    );
                    state.pending_close.remove(&position_id);
                }
            }
        }
    }

    /// Fill subscription plus the periodic monitor, in one task.
    pub async fn run(self: Arc<Self>) {
        info!("PositionTracker: started");
        let mut fills = self.order_manager.subscribe_fills();
        let mut monitor = tokio::time::interval(self.config.monitor_interval);
        monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                fill = fills.recv() => {
                    match fill {
                        Ok(fill) => self.on_fill(&fill).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("PositionTracker: lagged {} fill events", n);
                        }
                        Err(_) => break,
                    }
                }
                _ = monitor.tick() => {
                    self.monitor_once(Utc::now()).await;
                }
            }
        }
    }
}
