//! Game review: analysis-stage scheduling over a live engine session.
//!
//! Three regimes cover the lifecycle of reviewing a game:
//! a fast forward scan over every position, a deeper backward scan that
//! can be interrupted, and a continuous depth-bounded mode for
//! interactive navigation.

pub mod config;
pub mod stages;

pub use config::ReviewConfig;
pub use stages::{
    backward_scan, biggest_swing, forward_scan, BackwardOutcome, LiveAnalysis, PositionEval,
};
