use chrono::{DateTime, Utc};

use crate::domain::errors::PersistenceError;
use crate::domain::risk::drawdown::EquityState;

/// Durable storage for the equity state and schedule deadlines. Implemented
/// by the JSON state store; a no-op implementation backs backtest mode.
pub trait StateRepository: Send + Sync {
    fn save_equity(&self, state: &EquityState) -> Result<(), PersistenceError>;

    fn load_equity(&self) -> Result<Option<EquityState>, PersistenceError>;

    fn save_forced_close_deadline(
        &self,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), PersistenceError>;

    fn load_forced_close_deadline(&self) -> Result<Option<DateTime<Utc>>, PersistenceError>;
}
