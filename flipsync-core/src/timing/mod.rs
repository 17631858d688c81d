//! Frame pacing: clocks and the fixed-rate scheduler.

pub mod clock;
pub mod scheduler;

pub use clock::{FrameClock, ManualClock, SystemClock};
pub use scheduler::{FramePhase, FrameReport, FrameScheduler};
