use std::{sync::Arc, time::Duration};

use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::SessionController;

use super::{loop_worker::classification_loop, ClassificationFeed};

/// Owns the classification loop task of the current session.
#[derive(Default)]
pub struct SensingController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SensingController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the loop for session `epoch`; it exits when `cancel_token` fires.
    pub fn start_sensing(
        &mut self,
        engine: SessionController,
        feed: Arc<dyn ClassificationFeed>,
        epoch: u64,
        frame_interval: Duration,
        classify_timeout: Duration,
        cancel_token: CancellationToken,
    ) {
        if self.handle.is_some() {
            warn!("classification loop already running; replacing it");
            self.cancel();
        }

        let handle = tokio::spawn(classification_loop(
            engine,
            feed,
            epoch,
            frame_interval,
            classify_timeout,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("classification loop started for session epoch {epoch}");
    }

    /// Cancels the loop without waiting for it, handing back its task so the
    /// caller can decide whether to join.
    pub fn cancel(&mut self) -> Option<JoinHandle<()>> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.handle.take()
    }
}
