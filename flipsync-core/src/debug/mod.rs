//! Visual debugging of audio/video sync.

pub mod markers;
pub mod pixels;

pub use markers::{DebugSyncVisualizer, MarkerHistory, SyncMarker};
pub use pixels::PixelBuffer;
