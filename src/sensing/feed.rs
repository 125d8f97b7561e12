use async_trait::async_trait;

use crate::{error::EngineError, models::Frame};

/// Source of per-frame class probabilities (camera + pose model).
///
/// `classify` returning `Ok(None)` means "no result for this frame", for
/// example while the model is still loading. Errors are never fatal to the
/// engine: the frame is counted as focused and the feed error flag is raised.
#[async_trait]
pub trait ClassificationFeed: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;

    async fn stop(&self);

    async fn classify(&self) -> Result<Option<Frame>, EngineError>;
}
