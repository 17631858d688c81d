//! Sample production for the ring.
//!
//! The frame loop hands the game a [`SoundBuffer`] sized to exactly the number
//! of samples the latency estimator asked for. The game may fill it itself or
//! call [`SoundBuffer::write_tone`] to delegate to the shared generator.

pub mod tone;

pub use tone::{ToneGenerator, Waveform};

use crate::audio::CHANNELS;

/// Writable per-frame view of the scratch buffer.
pub struct SoundBuffer<'a> {
    samples: &'a mut [i16],
    samples_to_write: usize,
    tone: &'a mut ToneGenerator,
}

impl<'a> SoundBuffer<'a> {
    /// `samples` must hold exactly `samples_to_write` interleaved pairs.
    pub fn new(samples: &'a mut [i16], tone: &'a mut ToneGenerator) -> Self {
        let samples_to_write = samples.len() / usize::from(CHANNELS);
        Self {
            samples,
            samples_to_write,
            tone,
        }
    }

    /// Number of stereo sample pairs expected this frame.
    pub fn samples_to_write(&self) -> usize {
        self.samples_to_write
    }

    /// Interleaved L/R slots, `2 * samples_to_write()` long.
    pub fn samples_mut(&mut self) -> &mut [i16] {
        self.samples
    }

    pub fn tone_mut(&mut self) -> &mut ToneGenerator {
        self.tone
    }

    /// Fill the whole view from the shared tone generator.
    pub fn write_tone(&mut self) {
        if self.samples_to_write > 0 {
            self.tone.fill(self.samples);
        }
    }

    /// Fill the whole view with silence. The generator phase does not move.
    pub fn write_silence(&mut self) {
        self.samples.fill(0);
    }
}
