use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::{error::EngineError, models::ScoreRecord};

use super::LedgerStore;

/// Keeps the ledger as one pretty-printed JSON array.
///
/// Saves write a sibling temp file and rename it over the target, so a crash
/// mid-write leaves the previous ledger intact.
/// A file that fails to parse is renamed to `<name>.corrupt-<timestamp>`
/// on load, so the next save cannot replace history it never read.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<ScoreRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ledger from {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str(&contents) {
            Ok(records) => Ok(records),
            Err(err) => {
                // Keep the unreadable history out of the way of the next save.
                let backup = self.set_aside()?;
                Err(anyhow::Error::new(err).context(format!(
                    "Failed to parse ledger in {}, moved it to {}",
                    self.path.display(),
                    backup.display()
                )))
            }
        }
    }

    fn set_aside(&self) -> Result<PathBuf> {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        let backup = PathBuf::from(name);
        fs::rename(&self.path, &backup).with_context(|| {
            format!(
                "Failed to move unreadable ledger {} aside",
                self.path.display()
            )
        })?;
        Ok(backup)
    }

    fn write(&self, records: &[ScoreRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)
            .with_context(|| format!("Failed to write ledger to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace ledger at {}", self.path.display()))
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn load_ledger(&self) -> Result<Vec<ScoreRecord>, EngineError> {
        self.read().map_err(|err| EngineError::persistence(format!("{err:#}")))
    }

    async fn save_ledger(&self, records: &[ScoreRecord]) -> Result<(), EngineError> {
        self.write(records)
            .map_err(|err| EngineError::persistence(format!("{err:#}")))
    }
}
