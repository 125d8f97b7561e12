use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::EngineConfig,
    error::EngineError,
    ledger::{LedgerStore, ScoreLedger},
    models::{Frame, ScoreRecord, StopReason},
    sensing::{ClassificationFeed, SensingController},
};

use super::{SessionMachine, SessionStatus, Transition};

const EVENT_CAPACITY: usize = 64;

/// Everything the display side needs, published after every change.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub active: bool,
    pub elapsed_seconds: u64,
    pub unfocused_seconds: u64,
    pub warning: bool,
    pub feed_error: bool,
    pub persistence_error: Option<String>,
    pub last_frame: Option<Frame>,
    pub ledger: Vec<ScoreRecord>,
}

/// Result of a completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub reason: StopReason,
    pub record: ScoreRecord,
    /// Set when the ledger could not be written; the record is still kept
    /// in memory.
    pub persistence_warning: Option<EngineError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(EngineSnapshot),
    WarningRaised { unfocused_seconds: u64 },
    WarningCleared,
    FeedFailed(EngineError),
    SessionCompleted(SessionSummary),
}

/// Per-process session state owned by the controller. Nothing lives in
/// globals; the feed and the store are injected.
struct SessionContext {
    machine: SessionMachine,
    ledger: ScoreLedger,
    /// Bumped on every start and stop; callbacks carry the epoch they were
    /// scheduled for and are rejected once it moves on.
    epoch: u64,
    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    cancel_token: Option<CancellationToken>,
    ticker: Option<JoinHandle<()>>,
    sensing: SensingController,
    last_frame: Option<Frame>,
    persistence_error: Option<String>,
}

/// A session torn down under the lock, waiting for its I/O to finish.
struct FinishedSession {
    summary: SessionSummary,
    sensing: Option<JoinHandle<()>>,
    /// Context epoch right after this teardown.
    epoch: u64,
}

impl SessionContext {
    fn new(config: &EngineConfig, ledger: ScoreLedger) -> Self {
        Self {
            machine: SessionMachine::new(config),
            ledger,
            epoch: 0,
            session_id: None,
            started_at: None,
            cancel_token: None,
            ticker: None,
            sensing: SensingController::new(),
            last_frame: None,
            persistence_error: None,
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.machine.is_active()
    }

    fn snapshot(&self) -> EngineSnapshot {
        let state = self.machine.state();
        EngineSnapshot {
            session_id: self.session_id.clone(),
            status: state.status(),
            active: state.active,
            elapsed_seconds: state.elapsed_seconds,
            unfocused_seconds: state.unfocused_seconds,
            warning: state.warning,
            feed_error: state.feed_error,
            persistence_error: self.persistence_error.clone(),
            last_frame: self.last_frame.clone(),
            ledger: self.ledger.snapshot(),
        }
    }

    /// Synchronous half of stopping: record, reset, invalidate callbacks.
    fn finish(&mut self, record: ScoreRecord, reason: StopReason) -> FinishedSession {
        self.ledger.append(record.clone());
        self.epoch = self.epoch.wrapping_add(1);

        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let sensing = self.sensing.cancel();

        let session_id = self.session_id.take().unwrap_or_default();
        if let Some(started_at) = self.started_at.take() {
            info!(
                "session {session_id} ended ({}) after {}s, started {}",
                reason.as_str(),
                record.duration_seconds,
                started_at.to_rfc3339()
            );
        }
        self.last_frame = None;

        FinishedSession {
            summary: SessionSummary {
                session_id,
                reason,
                record,
                persistence_warning: None,
            },
            sensing,
            epoch: self.epoch,
        }
    }
}

/// Drives a [`SessionMachine`] with a one-second ticker and the
/// classification loop, persists the ledger and publishes snapshots.
#[derive(Clone)]
pub struct SessionController {
    context: Arc<Mutex<SessionContext>>,
    feed: Arc<dyn ClassificationFeed>,
    store: Arc<dyn LedgerStore>,
    config: Arc<EngineConfig>,
    snapshot_tx: Arc<watch::Sender<EngineSnapshot>>,
    events_tx: broadcast::Sender<EngineEvent>,
    persist_lock: Arc<Mutex<()>>,
    /// Held around `feed.start()` and `feed.stop()` so a teardown never
    /// stops a feed that a newer session already started.
    feed_lock: Arc<Mutex<()>>,
}

impl SessionController {
    /// Builds the controller and loads the persisted ledger. A ledger that
    /// cannot be read leaves the engine usable with an empty history.
    pub async fn new(
        config: EngineConfig,
        feed: Arc<dyn ClassificationFeed>,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        let (ledger, load_error) = match store.load_ledger().await {
            Ok(records) => {
                info!("loaded {} score records", records.len());
                (ScoreLedger::from_records(records), None)
            }
            Err(err) => {
                warn!("starting with an empty ledger: {err}");
                (ScoreLedger::new(), Some(err.to_string()))
            }
        };

        let mut context = SessionContext::new(&config, ledger);
        context.persistence_error = load_error;

        let (snapshot_tx, _) = watch::channel(context.snapshot());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            context: Arc::new(Mutex::new(context)),
            feed,
            store,
            config: Arc::new(config),
            snapshot_tx: Arc::new(snapshot_tx),
            events_tx,
            persist_lock: Arc::new(Mutex::new(())),
            feed_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.context.lock().await.snapshot()
    }

    /// Live view of the session for the display side.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    pub async fn ledger(&self) -> Vec<ScoreRecord> {
        self.context.lock().await.ledger.snapshot()
    }

    /// Starts a session. Returns `false` without side effects when one is
    /// already running.
    ///
    /// If the feed fails to start the session still runs, counted as focused,
    /// with the feed error flag raised.
    pub async fn start(&self) -> bool {
        let (epoch, cancel_token, session_start) = {
            let mut ctx = self.context.lock().await;
            let session_start = Instant::now();
            if !ctx.machine.start(session_start.into_std()) {
                return false;
            }
            ctx.epoch = ctx.epoch.wrapping_add(1);
            let session_id = Uuid::new_v4().to_string();
            info!("session {session_id} started");
            ctx.session_id = Some(session_id);
            ctx.started_at = Some(Utc::now());
            ctx.last_frame = None;
            let token = CancellationToken::new();
            ctx.cancel_token = Some(token.clone());
            (ctx.epoch, token, session_start)
        };

        let _feed_guard = self.feed_lock.lock().await;
        let feed_result = self.feed.start().await;

        {
            let mut ctx = self.context.lock().await;
            if !ctx.is_current(epoch) || cancel_token.is_cancelled() {
                // stop() won the race while the feed was starting.
                drop(ctx);
                self.feed.stop().await;
                return true;
            }

            // Ticks count from the same anchor the first frame is measured against.
            ctx.ticker = Some(self.spawn_ticker(epoch, cancel_token.clone(), session_start));

            match &feed_result {
                Ok(()) => {
                    let engine = self.clone();
                    ctx.sensing.start_sensing(
                        engine,
                        self.feed.clone(),
                        epoch,
                        self.config.frame_interval(),
                        self.config.classify_timeout(),
                        cancel_token.clone(),
                    );
                }
                Err(err) => {
                    error!("classification feed failed to start: {err}");
                    ctx.machine.set_feed_error(true);
                }
            }

            self.publish(&ctx);
        }

        if let Err(err) = feed_result {
            self.emit(EngineEvent::FeedFailed(err));
        }
        true
    }

    /// Stops the running session and records it. Returns `None` when idle.
    pub async fn stop(&self, reason: StopReason) -> Option<SessionSummary> {
        let finished = {
            let mut ctx = self.context.lock().await;
            let record = ctx.machine.stop(reason, Utc::now())?;
            let finished = ctx.finish(record, reason);
            self.publish(&ctx);
            finished
        };

        Some(self.complete(finished, true).await)
    }

    /// Applies one classification result for session `epoch`. Returns
    /// `false` once the loop that delivered it should exit.
    pub(crate) async fn apply_frame(
        &self,
        epoch: u64,
        result: Result<Option<Frame>, EngineError>,
    ) -> bool {
        let mut events = Vec::new();

        let finished = {
            let mut ctx = self.context.lock().await;
            if !ctx.is_current(epoch) {
                return false;
            }

            let had_feed_error = ctx.machine.state().feed_error;
            let (frame, feed_failure) = match result {
                Ok(frame) => (frame, None),
                Err(err) => (None, Some(err)),
            };

            // A failed frame still resets dwell: missing data counts as focused.
            let transition =
                ctx.machine
                    .observe(frame.as_deref(), Instant::now().into_std(), Utc::now());
            ctx.last_frame = frame;

            if let Some(err) = feed_failure.or_else(|| ctx.machine.take_feed_fault()) {
                if err.is_feed_error() {
                    ctx.machine.set_feed_error(true);
                }
                if !had_feed_error {
                    warn!("classification feed error: {err}");
                    events.push(EngineEvent::FeedFailed(err));
                }
            }

            let finished = match transition {
                Transition::Terminated(record) => {
                    warn!(
                        "unfocused for {}s, ending session automatically",
                        self.config.terminate_after_secs
                    );
                    Some(ctx.finish(record, StopReason::Auto))
                }
                Transition::WarningRaised => {
                    let unfocused_seconds = ctx.machine.state().unfocused_seconds;
                    warn!("unfocused for {unfocused_seconds}s");
                    events.push(EngineEvent::WarningRaised { unfocused_seconds });
                    None
                }
                Transition::WarningCleared => {
                    info!("focus regained, warning cleared");
                    events.push(EngineEvent::WarningCleared);
                    None
                }
                Transition::None => None,
            };

            self.publish(&ctx);
            finished
        };

        for event in events {
            self.emit(event);
        }

        match finished {
            // Running inside the loop task: its own handle must not be awaited.
            Some(finished) => {
                self.complete(finished, false).await;
                false
            }
            None => true,
        }
    }

    async fn apply_tick(&self, epoch: u64) -> bool {
        let mut ctx = self.context.lock().await;
        if !ctx.is_current(epoch) {
            return false;
        }
        ctx.machine.tick();
        self.publish(&ctx);
        true
    }

    fn spawn_ticker(
        &self,
        epoch: u64,
        cancel_token: CancellationToken,
        session_start: Instant,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        let period = self.config.tick_interval();

        tokio::spawn(async move {
            // First tick lands one full period after start; ticks missed while
            // the feed was starting fire immediately.
            let mut interval = time::interval_at(session_start + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break,
                    _ = interval.tick() => {
                        if !controller.apply_tick(epoch).await {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// I/O half of stopping: stop the feed, persist, notify.
    async fn complete(&self, finished: FinishedSession, join_sensing: bool) -> SessionSummary {
        let FinishedSession {
            mut summary,
            sensing,
            epoch,
        } = finished;

        if let Some(handle) = sensing {
            if join_sensing {
                if let Err(err) = handle.await {
                    if !err.is_cancelled() {
                        warn!("classification loop task failed to join: {err}");
                    }
                }
            }
        }

        {
            let _feed_guard = self.feed_lock.lock().await;
            let superseded = self.context.lock().await.epoch != epoch;
            if superseded {
                info!("feed already owned by a newer session, leaving it running");
            } else {
                self.feed.stop().await;
            }
        }

        summary.persistence_warning = self.persist().await.err();

        self.emit(EngineEvent::SessionCompleted(summary.clone()));
        summary
    }

    /// Writes the current ledger. Saves are serialized so an older snapshot
    /// never lands after a newer one.
    async fn persist(&self) -> Result<(), EngineError> {
        let _guard = self.persist_lock.lock().await;
        let records = self.context.lock().await.ledger.snapshot();

        let result = self.store.save_ledger(&records).await;

        let mut ctx = self.context.lock().await;
        match &result {
            Ok(()) => ctx.persistence_error = None,
            Err(err) => {
                error!("failed to save score ledger: {err}");
                ctx.persistence_error = Some(err.to_string());
            }
        }
        self.publish(&ctx);
        result
    }

    fn publish(&self, ctx: &SessionContext) {
        let snapshot = ctx.snapshot();
        let changed = self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot.clone();
                true
            }
        });
        if changed {
            self.emit(EngineEvent::StateChanged(snapshot));
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}
