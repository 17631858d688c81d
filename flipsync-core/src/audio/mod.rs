//! Audio output: format description, device backends, and the engine that
//! keeps the ring filled.
//!
//! # Format
//!
//! Exactly one format is supported: interleaved stereo, signed 16-bit,
//! little-endian. Throughout this crate a "sample" is one stereo pair, so
//! `bytes_per_sample` is 4.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Devices, and the [`AudioEngine`] that owns one, must be created and
//! dropped on the same thread. The frame loop does this by opening the engine
//! inside its own blocking task.

pub mod device;
pub mod engine;
pub mod simulated;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffering::RingBuffer;
use crate::error::Result;

pub use engine::{AudioEngine, FrameAudio};

/// Interleaved channel count of the only supported layout.
pub const CHANNELS: u16 = 2;

/// Bytes in one stereo i16 sample pair.
pub const BYTES_PER_SAMPLE: u32 = CHANNELS as u32 * 2;

/// PCM encodings a device may report. Only `S16Le` is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmFormat {
    S16Le,
    U16,
    F32,
    Other,
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PcmFormat::S16Le => "s16le",
            PcmFormat::U16 => "u16",
            PcmFormat::F32 => "f32",
            PcmFormat::Other => "other",
        };
        f.write_str(name)
    }
}

/// Requested or obtained device format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSpec {
    pub samples_per_second: u32,
    pub channels: u16,
    pub format: PcmFormat,
    /// Buffer-size hint: sample pairs the device drains per callback.
    pub samples_per_callback: u16,
}

impl AudioSpec {
    /// The one layout the engine produces.
    pub fn stereo_i16(samples_per_second: u32, samples_per_callback: u16) -> Self {
        Self {
            samples_per_second,
            channels: CHANNELS,
            format: PcmFormat::S16Le,
            samples_per_callback,
        }
    }

    pub fn bytes_per_sample(&self) -> u32 {
        u32::from(self.channels) * 2
    }

    /// Whether `obtained` can be fed from a ring laid out for `self`.
    /// The callback size is only a hint and is not compared.
    pub fn is_compatible(&self, obtained: &AudioSpec) -> bool {
        self.samples_per_second == obtained.samples_per_second
            && self.channels == obtained.channels
            && self.format == obtained.format
    }
}

impl fmt::Display for AudioSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}, {} samples/callback",
            self.samples_per_second, self.channels, self.format, self.samples_per_callback
        )
    }
}

/// Which platform layer drives the hardware callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// System default output device through cpal.
    #[default]
    Cpal,
    /// Paced thread standing in for a sound card.
    Simulated,
}

/// Platform audio stream feeding from a [`RingBuffer`].
///
/// Dropping the device closes the stream.
pub trait AudioDevice {
    /// Format the device actually opened with.
    fn obtained(&self) -> AudioSpec;

    /// Start (or restart) callbacks.
    fn resume(&mut self) -> Result<()>;

    /// Stop callbacks. The ring and its cursors are left untouched.
    fn pause(&mut self) -> Result<()>;

    fn is_playing(&self) -> bool;
}

/// Open an output device of the given kind that drains `ring`.
///
/// The stream starts paused. `record_wav` is honoured by the simulated
/// backend only.
///
/// # Errors
/// Device, stream, and format errors from the backend.
pub fn open_output(
    backend: BackendKind,
    requested: &AudioSpec,
    ring: Arc<RingBuffer>,
    record_wav: Option<&Path>,
) -> Result<Box<dyn AudioDevice>> {
    match backend {
        BackendKind::Cpal => {
            if record_wav.is_some() {
                tracing::warn!("WAV recording is only available on the simulated backend");
            }
            Ok(Box::new(device::CpalOutput::open(requested, ring)?))
        }
        BackendKind::Simulated => Ok(Box::new(simulated::SimulatedOutput::open(
            requested, ring, record_wav,
        )?)),
    }
}
