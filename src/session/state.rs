use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::{
    config::EngineConfig,
    error::EngineError,
    models::{ClassificationSample, ScoreRecord, StopReason},
};

use super::accumulator::{Observation, UnfocusAccumulator};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Idle,
    Running,
    Warning,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Idle
    }
}

/// Display-facing session counters. Zeroed whenever a session starts or ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub active: bool,
    pub elapsed_seconds: u64,
    pub unfocused_seconds: u64,
    pub warning: bool,
    /// Camera or model trouble; the engine keeps running as if focused.
    pub feed_error: bool,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match (self.active, self.warning) {
            (false, _) => SessionStatus::Idle,
            (true, false) => SessionStatus::Running,
            (true, true) => SessionStatus::Warning,
        }
    }
}

/// Outcome of feeding one frame to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    None,
    WarningRaised,
    WarningCleared,
    Terminated(ScoreRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warn_after_secs: u64,
    pub terminate_after_secs: u64,
}

impl From<&EngineConfig> for Thresholds {
    fn from(config: &EngineConfig) -> Self {
        Self {
            warn_after_secs: config.warn_after_secs,
            terminate_after_secs: config.terminate_after_secs,
        }
    }
}

/// Synchronous session state machine: `Idle -> Running <-> Warning -> Idle`.
///
/// Invalid transitions (`start` while active, `stop` while idle, frames or
/// ticks while idle) are silent no-ops.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    accumulator: UnfocusAccumulator,
    thresholds: Thresholds,
    started_at: Option<Instant>,
    feed_fault: Option<EngineError>,
}

impl SessionMachine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: SessionState::default(),
            accumulator: UnfocusAccumulator::new(
                config.unfocused_class.clone(),
                config.unfocus_probability_threshold,
            ),
            thresholds: Thresholds::from(config),
            started_at: None,
            feed_fault: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Starts a session anchored at `now`, the instant the ticker counts from.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.state.active {
            return false;
        }

        self.accumulator.reset();
        self.started_at = Some(now);
        self.feed_fault = None;
        self.state = SessionState {
            active: true,
            ..SessionState::default()
        };
        true
    }

    pub fn tick(&mut self) -> bool {
        if !self.state.active {
            return false;
        }
        self.state.elapsed_seconds = self.state.elapsed_seconds.saturating_add(1);
        true
    }

    pub fn set_feed_error(&mut self, failed: bool) {
        if self.state.active {
            self.state.feed_error = failed;
        }
    }

    /// Applies one frame (or `None` when the feed had nothing) at `now`.
    ///
    /// Crossing the termination threshold stops the session with
    /// [`StopReason::Auto`]; the returned record is stamped with `ended_at`.
    pub fn observe(
        &mut self,
        frame: Option<&[ClassificationSample]>,
        now: Instant,
        ended_at: DateTime<Utc>,
    ) -> Transition {
        if !self.state.active {
            return Transition::None;
        }

        match self.accumulator.observe(frame, now) {
            Observation::Missing(Some(err)) => {
                self.state.feed_error = true;
                self.feed_fault = Some(err);
            }
            Observation::Focused | Observation::Unfocused => {
                self.state.feed_error = false;
                self.feed_fault = None;
            }
            Observation::Missing(None) => {}
        }

        let unfocused = self.accumulator.unfocused_seconds();
        self.state.unfocused_seconds = unfocused;

        if unfocused >= self.thresholds.terminate_after_secs {
            // Dwell and ticks share the start anchor; a tick due at this same
            // instant may not have landed yet.
            let since_start = self
                .started_at
                .map(|start| now.saturating_duration_since(start).as_secs())
                .unwrap_or(0);
            let elapsed = self.state.elapsed_seconds.max(since_start);
            return Transition::Terminated(self.finish(StopReason::Auto, elapsed, ended_at));
        }

        let should_warn = unfocused >= self.thresholds.warn_after_secs;
        match (self.state.warning, should_warn) {
            (false, true) => {
                self.state.warning = true;
                Transition::WarningRaised
            }
            (true, false) => {
                self.state.warning = false;
                Transition::WarningCleared
            }
            _ => Transition::None,
        }
    }

    /// Error behind the current `feed_error` flag when it came from a frame,
    /// e.g. a missing class. Taken once.
    pub fn take_feed_fault(&mut self) -> Option<EngineError> {
        self.feed_fault.take()
    }

    /// Ends the running session, returning its record built from the
    /// elapsed time as it stood before the reset.
    pub fn stop(&mut self, reason: StopReason, ended_at: DateTime<Utc>) -> Option<ScoreRecord> {
        if !self.state.active {
            return None;
        }
        Some(self.finish(reason, self.state.elapsed_seconds, ended_at))
    }

    fn finish(&mut self, reason: StopReason, elapsed: u64, ended_at: DateTime<Utc>) -> ScoreRecord {
        debug!("stopping session ({}) at {elapsed}s elapsed", reason.as_str());
        self.accumulator.reset();
        self.state = SessionState::default();
        self.started_at = None;
        self.feed_fault = None;
        ScoreRecord::new(elapsed, ended_at)
    }
}
