//! # flipsync-core
//!
//! Frame-synchronized audio: keeps a hardware ring buffer filled just ahead
//! of the play cursor while a fixed-rate game loop produces sound one frame
//! at a time.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────── frame loop (spawn_blocking) ────────────┐
//!                 │ FrameScheduler → GameUpdate → LatencyEstimator      │
//!                 │        → SoundBuffer → RingBuffer::write_samples    │
//!                 │        → sleep/spin → FlipService::flip             │
//!                 └──────────────────────────┬──────────────────────────┘
//!                                            │ cursor snapshot (brief lock)
//!   audio thread:  device callback → RingBuffer::serve → play/write cursors
//! ```
//!
//! The device callback never waits on the frame loop; the frame loop holds
//! the cursor lock only long enough to copy the cursors out.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod debug;
pub mod engine;
pub mod error;
pub mod events;
pub mod game;
pub mod sync;
pub mod synth;
pub mod timing;

// Convenience re-exports for downstream crates
pub use audio::{AudioEngine, AudioSpec, BackendKind, FrameAudio};
pub use buffering::{CursorSnapshot, RingBuffer};
pub use engine::{DiagnosticsSnapshot, EngineConfig, SyncEngine};
pub use error::SyncError;
pub use events::{EngineStatus, EngineStatusEvent, FrameAudioKind, FrameEvent};
pub use game::{FlipService, FrameInput, GameHandle, GameUpdate, NullDisplay, ToneGame};
pub use sync::{FillPlan, FillRequest, LatencyEstimator};
pub use synth::{SoundBuffer, ToneGenerator, Waveform};
