use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::errors::PersistenceError;
use crate::domain::repositories::StateRepository;
use crate::domain::risk::drawdown::{EquityState, TradingStatus};

const STATE_VERSION: u32 = 1;

/// On-disk document shape. Everything the process must survive a restart
/// with: the equity picture plus schedule deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    version: u32,
    initial_balance: Decimal,
    peak_balance: Decimal,
    current_balance: Decimal,
    consecutive_losses: u32,
    status: TradingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    cooldown_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    forced_close_deadline: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
}

impl PersistedState {
    fn fresh() -> Self {
        Self {
            version: STATE_VERSION,
            initial_balance: Decimal::ZERO,
            peak_balance: Decimal::ZERO,
            current_balance: Decimal::ZERO,
            consecutive_losses: 0,
            status: TradingStatus::Active,
            cooldown_until: None,
            forced_close_deadline: None,
            last_updated: Utc::now(),
        }
    }
}

/// JSON-file state store. Writes go through a temp file and an atomic rename
/// so a crash mid-write cannot corrupt the last good document. When
/// `enabled` is false (backtest mode) every operation is a no-op.
pub struct JsonStateStore {
    path: PathBuf,
    enabled: bool,
    cached: Mutex<PersistedState>,
}

impl JsonStateStore {
    pub fn new(path: impl AsRef<Path>, enabled: bool) -> Self {
        let path = path.as_ref().to_path_buf();
        let cached = if enabled {
            Self::read_document(&path).unwrap_or_else(|e| {
                warn!("JsonStateStore: starting fresh ({})", e);
                PersistedState::fresh()
            })
        } else {
            PersistedState::fresh()
        };
        Self {
            path,
            enabled,
            cached: Mutex::new(cached),
        }
    }

    fn read_document(path: &Path) -> Result<PersistedState, PersistenceError> {
        if !path.exists() {
            info!("JsonStateStore: no state file at {:?}, new document", path);
            return Ok(PersistedState::fresh());
        }
        let raw = fs::read_to_string(path).map_err(|e| PersistenceError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| PersistenceError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn write_document(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::WriteFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        let json =
            serde_json::to_string_pretty(state).map_err(|e| PersistenceError::WriteFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| PersistenceError::WriteFailed {
            path: tmp.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| PersistenceError::WriteFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!("JsonStateStore: state written to {:?}", self.path);
        Ok(())
    }
}

impl StateRepository for JsonStateStore {
    fn save_equity(&self, state: &EquityState) -> Result<(), PersistenceError> {
        let mut cached = self.cached.lock().expect("state store mutex");
        cached.initial_balance = state.initial_balance;
        cached.peak_balance = state.peak_balance;
        cached.current_balance = state.current_balance;
        cached.consecutive_losses = state.consecutive_losses;
        cached.status = state.status;
        cached.cooldown_until = state.cooldown_until;
        cached.last_updated = Utc::now();
        self.write_document(&cached)
    }

    fn load_equity(&self) -> Result<Option<EquityState>, PersistenceError> {
        if !self.enabled {
            return Ok(None);
        }
        let cached = self.cached.lock().expect("state store mutex");
        if cached.initial_balance.is_zero() && cached.peak_balance.is_zero() {
            return Ok(None);
        }
        Ok(Some(EquityState {
            initial_balance: cached.initial_balance,
            peak_balance: cached.peak_balance,
            current_balance: cached.current_balance,
            consecutive_losses: cached.consecutive_losses,
            status: cached.status,
            cooldown_until: cached.cooldown_until,
        }))
    }

    fn save_forced_close_deadline(
        &self,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), PersistenceError> {
        let mut cached = self.cached.lock().expect("state store mutex");
        cached.forced_close_deadline = deadline;
        cached.last_updated = Utc::now();
        self.write_document(&cached)
    }

    fn load_forced_close_deadline(&self) -> Result<Option<DateTime<Utc>>, PersistenceError> {
        if !self.enabled {
            return Ok(None);
        }
        Ok(self
            .cached
            .lock()
            .expect("state store mutex")
            .forced_close_deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("jpytrade_state_{}_{}.json", name, uuid::Uuid::new_v4()))
    }

    fn equity() -> EquityState {
        EquityState {
            initial_balance: dec!(1000000),
            peak_balance: dec!(1100000),
            current_balance: dec!(950000),
            consecutive_losses: 3,
            status: TradingStatus::Active,
            cooldown_until: None,
        }
    }

    #[test]
    fn test_round_trip_equity() {
        let path = temp_path("roundtrip");
        let store = JsonStateStore::new(&path, true);
        store.save_equity(&equity()).unwrap();

        // A fresh store instance reads the same document back.
        let reloaded = JsonStateStore::new(&path, true);
        let state = reloaded.load_equity().unwrap().unwrap();
        assert_eq!(state.peak_balance, dec!(1100000));
        assert_eq!(state.current_balance, dec!(950000));
        assert_eq!(state.consecutive_losses, 3);
        assert_eq!(state.status, TradingStatus::Active);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_forced_close_deadline_round_trip() {
        let path = temp_path("deadline");
        let store = JsonStateStore::new(&path, true);
        let deadline = Utc::now() + chrono::Duration::hours(5);
        store.save_forced_close_deadline(Some(deadline)).unwrap();

        let reloaded = JsonStateStore::new(&path, true);
        let loaded = reloaded.load_forced_close_deadline().unwrap().unwrap();
        assert_eq!(loaded.timestamp(), deadline.timestamp());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_document_falls_back_fresh() {
        let path = temp_path("corrupt");
        fs::write(&path, "{ not json").unwrap();
        let store = JsonStateStore::new(&path, true);
        assert!(store.load_equity().unwrap().is_none());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_disabled_store_is_noop() {
        let path = temp_path("disabled");
        let store = JsonStateStore::new(&path, false);
        store.save_equity(&equity()).unwrap();
        assert!(!path.exists());
        assert!(store.load_equity().unwrap().is_none());
    }
}
