mod json;
mod sqlite;
mod store;

pub use json::JsonFileStore;
pub use sqlite::SqliteStore;
pub use store::{open_store, LedgerStore, MemoryStore};

use crate::models::ScoreRecord;

/// Completed sessions ranked by duration, longest first.
///
/// Ties keep insertion order. The ledger is append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreLedger {
    records: Vec<ScoreRecord>,
}

impl ScoreLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from persisted records, restoring the ranking if the
    /// stored order was disturbed.
    pub fn from_records(records: Vec<ScoreRecord>) -> Self {
        let mut records = records;
        // Stable sort keeps the stored order among equal durations.
        records.sort_by(|a, b| b.duration_seconds.cmp(&a.duration_seconds));
        Self { records }
    }

    pub fn append(&mut self, record: ScoreRecord) {
        let position = self
            .records
            .iter()
            .position(|existing| existing.duration_seconds < record.duration_seconds)
            .unwrap_or(self.records.len());
        self.records.insert(position, record);
    }

    /// Iterates over copies of the records in rank order.
    pub fn all(&self) -> impl Iterator<Item = ScoreRecord> + Clone + '_ {
        self.records.iter().cloned()
    }

    pub fn snapshot(&self) -> Vec<ScoreRecord> {
        self.records.clone()
    }

    pub fn best(&self) -> Option<&ScoreRecord> {
        self.records.first()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
