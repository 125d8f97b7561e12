mod controller;
mod feed;
mod loop_worker;
mod replay;

pub use controller::SensingController;
pub use feed::ClassificationFeed;
pub use replay::ReplayFeed;
