mod classification;
mod score;

pub use classification::{ClassSelector, ClassificationSample, Frame};
pub use score::{ScoreRecord, StopReason};
