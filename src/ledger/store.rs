use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use tokio::sync::Mutex;

use crate::{
    config::{EngineConfig, LedgerBackend},
    error::EngineError,
    models::ScoreRecord,
};

use super::{JsonFileStore, SqliteStore};

const JSON_FILE_NAME: &str = "focus_scores.json";
const SQLITE_FILE_NAME: &str = "posefocus.sqlite3";

/// Durable home of the score ledger.
///
/// The whole collection is read at startup and rewritten after every
/// completed session.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_ledger(&self) -> Result<Vec<ScoreRecord>, EngineError>;

    async fn save_ledger(&self, records: &[ScoreRecord]) -> Result<(), EngineError>;
}

/// Process-local store, used by tests and throwaway runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<ScoreRecord>>>,
    fail_saves: Arc<std::sync::atomic::AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ScoreRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
            ..Self::default()
        }
    }

    /// Makes every subsequent save fail, to exercise the non-fatal path.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn stored(&self) -> Vec<ScoreRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_ledger(&self) -> Result<Vec<ScoreRecord>, EngineError> {
        Ok(self.records.lock().await.clone())
    }

    async fn save_ledger(&self, records: &[ScoreRecord]) -> Result<(), EngineError> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EngineError::LedgerPersistence("store is read-only".into()));
        }
        *self.records.lock().await = records.to_vec();
        Ok(())
    }
}

/// Opens the store selected by `config.ledger_backend` inside the data dir.
pub fn open_store(config: &EngineConfig) -> Result<Arc<dyn LedgerStore>> {
    let data_dir = config.resolve_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let store: Arc<dyn LedgerStore> = match config.ledger_backend {
        LedgerBackend::Json => {
            let store = JsonFileStore::new(data_dir.join(JSON_FILE_NAME));
            info!("score ledger at {}", store.path().display());
            Arc::new(store)
        }
        LedgerBackend::Sqlite => {
            let store = SqliteStore::open(data_dir.join(SQLITE_FILE_NAME))?;
            info!("score ledger database at {}", store.path().display());
            Arc::new(store)
        }
    };
    Ok(store)
}
