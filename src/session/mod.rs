pub mod accumulator;
pub mod controller;
pub mod state;

pub use accumulator::{Observation, UnfocusAccumulator};
pub use controller::{EngineEvent, EngineSnapshot, SessionController, SessionSummary};
pub use state::{SessionMachine, SessionState, SessionStatus, Thresholds, Transition};
