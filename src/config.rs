use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::{error::EngineError, models::ClassSelector};

const DATA_DIR_ENV: &str = "POSEFOCUS_DATA_DIR";
const DEBUG_ENV: &str = "POSEFOCUS_DEBUG";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LedgerBackend {
    Json,
    Sqlite,
}

impl Default for LedgerBackend {
    fn default() -> Self {
        LedgerBackend::Json
    }
}

/// Tunable thresholds and cadences for the focus engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Which class of each frame counts as "unfocused".
    pub unfocused_class: ClassSelector,

    /// A frame is unfocused when the selected class reaches this probability.
    pub unfocus_probability_threshold: f32,

    /// Continuous unfocused dwell that raises the warning.
    pub warn_after_secs: u64,

    /// Continuous unfocused dwell that ends the session.
    pub terminate_after_secs: u64,

    pub tick_interval_ms: u64,
    pub frame_interval_ms: u64,
    pub classify_timeout_ms: u64,

    pub ledger_backend: LedgerBackend,

    /// Where the score ledger lives. Falls back to the platform data dir.
    pub data_dir: Option<PathBuf>,

    #[serde(skip)]
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unfocused_class: ClassSelector::default(),
            unfocus_probability_threshold: 0.7,
            warn_after_secs: 20,
            terminate_after_secs: 30,
            tick_interval_ms: 1000,
            frame_interval_ms: 100,
            classify_timeout_ms: 5000,
            ledger_backend: LedgerBackend::default(),
            data_dir: None,
            debug: false,
        }
    }
}

impl EngineConfig {
    /// Reads a JSON settings file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            Self::default()
        };

        config
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(config)
    }

    /// Applies `POSEFOCUS_DATA_DIR` and `POSEFOCUS_DEBUG` on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }

        self.debug = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let threshold = self.unfocus_probability_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::Config(format!(
                "unfocusProbabilityThreshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.warn_after_secs >= self.terminate_after_secs {
            return Err(EngineError::Config(format!(
                "warnAfterSecs ({}) must be lower than terminateAfterSecs ({})",
                self.warn_after_secs, self.terminate_after_secs
            )));
        }
        if self.tick_interval_ms == 0 || self.frame_interval_ms == 0 {
            return Err(EngineError::Config(
                "tick and frame intervals must be greater than zero".into(),
            ));
        }
        if self.classify_timeout_ms == 0 {
            return Err(EngineError::Config(
                "classifyTimeoutMs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_millis(self.classify_timeout_ms)
    }

    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("posefocus"))
            .context("could not determine the platform data directory")
    }
}
