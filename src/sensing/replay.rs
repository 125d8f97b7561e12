use std::{
    path::Path,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::{error::EngineError, models::Frame};

use super::ClassificationFeed;

/// Plays back a recorded sequence of frames, one per `classify` call.
///
/// Once the script runs out the last frame repeats, which models a subject
/// who stays in their final pose.
pub struct ReplayFeed {
    frames: Vec<Option<Frame>>,
    cursor: AtomicUsize,
    running: AtomicBool,
    latency: Duration,
}

impl ReplayFeed {
    pub fn from_frames(frames: Vec<Option<Frame>>) -> Self {
        Self {
            frames,
            cursor: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            latency: Duration::ZERO,
        }
    }

    /// Parses a JSON-lines script: one frame array per line, `null` for a
    /// frame without a result. Blank lines are ignored.
    pub fn from_script(script: &str) -> Result<Self> {
        let frames = script
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str::<Option<Frame>>(line)
                    .with_context(|| format!("invalid frame on line {}", index + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_frames(frames))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read frame script {}", path.display()))?;
        Self::from_script(&script)
    }

    /// Simulated inference time for every `classify` call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frames_served(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationFeed for ReplayFeed {
    async fn start(&self) -> Result<(), EngineError> {
        if self.frames.is_empty() {
            return Err(EngineError::FeedUnavailable("frame script is empty".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn classify(&self) -> Result<Option<Frame>, EngineError> {
        if !self.is_running() {
            return Err(EngineError::FeedUnavailable("feed is not started".into()));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let frame = self
            .frames
            .get(index)
            .or_else(|| self.frames.last())
            .cloned()
            .flatten();
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
[{"label":"focused","probability":0.9},{"label":"unfocused","probability":0.1}]
null

[{"label":"focused","probability":0.2},{"label":"unfocused","probability":0.8}]
"#;

    #[tokio::test]
    async fn replays_script_then_repeats_last_frame() {
        let feed = ReplayFeed::from_script(SCRIPT).unwrap();
        feed.start().await.unwrap();

        let first = feed.classify().await.unwrap().unwrap();
        assert_eq!(first[1].probability, 0.1);
        assert!(feed.classify().await.unwrap().is_none());

        for _ in 0..3 {
            let frame = feed.classify().await.unwrap().unwrap();
            assert_eq!(frame[1].label, "unfocused");
            assert_eq!(frame[1].probability, 0.8);
        }
        assert_eq!(feed.frames_served(), 5);
    }

    #[tokio::test]
    async fn classify_requires_start() {
        let feed = ReplayFeed::from_script(SCRIPT).unwrap();
        assert!(matches!(
            feed.classify().await,
            Err(EngineError::FeedUnavailable(_))
        ));

        feed.start().await.unwrap();
        feed.stop().await;
        assert!(!feed.is_running());
        assert!(feed.classify().await.is_err());
    }

    #[tokio::test]
    async fn empty_script_cannot_start() {
        let feed = ReplayFeed::from_frames(Vec::new());
        assert!(feed.start().await.is_err());
    }

    #[test]
    fn demo_script_parses() {
        let feed = ReplayFeed::from_script(include_str!("../../demos/drifting.jsonl")).unwrap();
        assert_eq!(feed.frames.len(), 106);
        assert!(feed.frames[40].is_none());
    }

    #[test]
    fn reports_bad_line_number() {
        let err = ReplayFeed::from_script("null\n{oops}\n").err().unwrap();
        assert!(format!("{err:#}").contains("line 2"));
    }
}
