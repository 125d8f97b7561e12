use thiserror::Error;

/// Failures the engine absorbs from its collaborators.
///
/// None of these are fatal: feed errors degrade to "focused" and raise the
/// `feed_error` flag, persistence errors come back to the caller as a warning
/// while the in-memory ledger stays authoritative.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("classification feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("classification is missing class '{0}'")]
    ClassificationMissingClass(String),

    #[error("failed to persist score ledger: {0}")]
    LedgerPersistence(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the error should raise the display-side feed error flag.
    pub fn is_feed_error(&self) -> bool {
        matches!(
            self,
            EngineError::FeedUnavailable(_) | EngineError::ClassificationMissingClass(_)
        )
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        EngineError::LedgerPersistence(err.to_string())
    }
}
