use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{error::EngineError, session::SessionController};

use super::ClassificationFeed;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Pulls one frame per `frame_interval` from the feed and hands it to the
/// engine until the session ends.
///
/// Only one `classify` call is ever in flight: the next frame is not
/// requested until the previous one resolved, and ticks missed meanwhile are
/// skipped rather than queued.
pub async fn classification_loop(
    engine: SessionController,
    feed: Arc<dyn ClassificationFeed>,
    epoch: u64,
    frame_interval: Duration,
    classify_timeout: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("classification loop shutting down (epoch {epoch})");
                break;
            }
            _ = ticker.tick() => {
                let result = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => {
                        log_info!("classification cancelled mid-frame (epoch {epoch})");
                        break;
                    }
                    result = tokio::time::timeout(classify_timeout, feed.classify()) => result,
                };

                let frame = match result {
                    Ok(frame) => frame,
                    Err(_) => {
                        log_warn!(
                            "classification timed out after {}ms (epoch {epoch})",
                            classify_timeout.as_millis()
                        );
                        Err(EngineError::FeedUnavailable(format!(
                            "classification exceeded {}ms",
                            classify_timeout.as_millis()
                        )))
                    }
                };

                // A result that resolved after stop() must not touch the new state.
                if cancel_token.is_cancelled() {
                    log_info!("discarding late classification result (epoch {epoch})");
                    break;
                }

                if !engine.apply_frame(epoch, frame).await {
                    break;
                }
            }
        }
    }
}
