use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Manual,
    Auto,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Manual => "manual",
            StopReason::Auto => "auto",
        }
    }
}

/// A completed session. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub duration_seconds: u64,
    pub ended_at: DateTime<Utc>,
}

impl ScoreRecord {
    pub fn new(duration_seconds: u64, ended_at: DateTime<Utc>) -> Self {
        Self {
            duration_seconds,
            ended_at,
        }
    }
}
