use std::time::Instant;

use crate::{
    error::EngineError,
    models::{ClassSelector, ClassificationSample},
};

/// What a single frame meant for the dwell counter.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Focused,
    Unfocused,
    /// The frame carried no usable probability; counted as focused.
    Missing(Option<EngineError>),
}

/// Tracks continuous unfocused dwell from frame-cadence observations.
///
/// Dwell is measured from the instant the unfocused streak began rather than
/// by counting frames, so dropped or slow frames do not skew it.
#[derive(Debug, Clone)]
pub struct UnfocusAccumulator {
    selector: ClassSelector,
    threshold: f32,
    dwell_start: Option<Instant>,
    unfocused_seconds: u64,
}

impl UnfocusAccumulator {
    pub fn new(selector: ClassSelector, threshold: f32) -> Self {
        Self {
            selector,
            threshold,
            dwell_start: None,
            unfocused_seconds: 0,
        }
    }

    pub fn observe(&mut self, frame: Option<&[ClassificationSample]>, now: Instant) -> Observation {
        let probability = match frame {
            Some(samples) => self.selector.probability_in(samples),
            None => {
                self.clear();
                return Observation::Missing(None);
            }
        };

        match probability {
            Ok(p) if p >= self.threshold => {
                let start = *self.dwell_start.get_or_insert(now);
                self.unfocused_seconds = now.saturating_duration_since(start).as_secs();
                Observation::Unfocused
            }
            Ok(_) => {
                self.clear();
                Observation::Focused
            }
            Err(err) => {
                self.clear();
                Observation::Missing(Some(err))
            }
        }
    }

    pub fn unfocused_seconds(&self) -> u64 {
        self.unfocused_seconds
    }

    pub fn reset(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.dwell_start = None;
        self.unfocused_seconds = 0;
    }
}
