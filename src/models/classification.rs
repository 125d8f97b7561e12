use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One class probability produced by the classification feed for a frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationSample {
    pub label: String,
    pub probability: f32,
}

impl ClassificationSample {
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }
}

/// All class probabilities for a single camera frame, in model order.
pub type Frame = Vec<ClassificationSample>;

/// Which entry of a frame is the "unfocused" class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ClassSelector {
    Label(String),
    Index(usize),
}

impl Default for ClassSelector {
    fn default() -> Self {
        // Teachable Machine pose models list "focused" first, "unfocused" second.
        ClassSelector::Index(1)
    }
}

impl ClassSelector {
    /// Probability of the selected class in `frame`.
    ///
    /// Non-finite probabilities are rejected like a missing class so the
    /// accumulator never compares against NaN.
    pub fn probability_in(&self, frame: &[ClassificationSample]) -> Result<f32, EngineError> {
        let sample = match self {
            ClassSelector::Label(label) => frame.iter().find(|s| &s.label == label),
            ClassSelector::Index(index) => frame.get(*index),
        };

        sample
            .map(|s| s.probability)
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 1.0))
            .ok_or_else(|| EngineError::ClassificationMissingClass(self.to_string()))
    }
}

impl std::fmt::Display for ClassSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassSelector::Label(label) => write!(f, "{label}"),
            ClassSelector::Index(index) => write!(f, "#{index}"),
        }
    }
}
