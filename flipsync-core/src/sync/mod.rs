//! Audio/video latency estimation.
//!
//! Given the hardware cursors, the producer's running sample index, and how
//! far into the frame we are, [`LatencyEstimator::plan`] decides which byte
//! range of the ring should be written so that the audio for frame N+1 starts
//! playing at the moment frame N+1 is shown.

pub mod estimator;

pub use estimator::{
    fill_gap, FillOutcome, FillPlan, FillRequest, LatencyEstimator, Starvation, SyncParams,
};
