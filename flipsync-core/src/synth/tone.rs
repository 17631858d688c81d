//! Phase-accumulating tone generator.
//!
//! ## Algorithm
//!
//! 1. `value = round(wave(t) * volume)` where `wave` is `sin` or a square
//!    derived from the same phase.
//! 2. Write `value` to the left and right slot of the current pair.
//! 3. Advance `t` by `2π / samples_per_wave_period`, wrapping into `[0, 2π)`.
//!
//! The phase is the only state carried between calls, so any split of a run
//! into smaller runs yields identical samples.

use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::audio::CHANNELS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
}

#[derive(Debug, Clone)]
pub struct ToneGenerator {
    samples_per_second: u32,
    tone_hz: u32,
    /// Peak amplitude. Keep well under `i16::MAX` to avoid clipping.
    tone_volume: i16,
    waveform: Waveform,
    samples_per_wave_period: f32,
    /// Phase in radians, always in `[0, 2π)`.
    t_for_sine: f32,
}

impl ToneGenerator {
    /// Create a generator starting at phase zero.
    ///
    /// A `tone_hz` of zero is raised to 1 Hz.
    pub fn new(samples_per_second: u32, tone_hz: u32, tone_volume: i16, waveform: Waveform) -> Self {
        let mut tone = Self {
            samples_per_second,
            tone_hz: 1,
            tone_volume,
            waveform,
            samples_per_wave_period: samples_per_second as f32,
            t_for_sine: 0.0,
        };
        tone.set_tone_hz(tone_hz);
        tone
    }

    /// Change the pitch. The current phase is kept, only its rate changes.
    pub fn set_tone_hz(&mut self, tone_hz: u32) {
        self.tone_hz = tone_hz.max(1);
        self.samples_per_wave_period = self.samples_per_second as f32 / self.tone_hz as f32;
    }

    pub fn tone_hz(&self) -> u32 {
        self.tone_hz
    }

    pub fn set_volume(&mut self, tone_volume: i16) {
        self.tone_volume = tone_volume;
    }

    pub fn volume(&self) -> i16 {
        self.tone_volume
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    /// Current phase in radians.
    pub fn phase(&self) -> f32 {
        self.t_for_sine
    }

    /// Produce the next value and advance the phase by one sample.
    pub fn next_value(&mut self) -> i16 {
        let volume = f32::from(self.tone_volume);
        let value = match self.waveform {
            Waveform::Sine => (self.t_for_sine.sin() * volume).round() as i16,
            Waveform::Square => {
                if self.t_for_sine < PI {
                    self.tone_volume
                } else {
                    -self.tone_volume
                }
            }
        };

        self.t_for_sine += TAU / self.samples_per_wave_period;
        if self.t_for_sine >= TAU {
            self.t_for_sine -= TAU;
        }
        value
    }

    /// Fill an interleaved stereo slice. Returns the number of sample pairs
    /// written (`out.len() / 2`); a trailing odd slot is left untouched.
    pub fn fill(&mut self, out: &mut [i16]) -> usize {
        let mut written = 0;
        for pair in out.chunks_exact_mut(usize::from(CHANNELS)) {
            let value = self.next_value();
            pair.fill(value);
            written += 1;
        }
        written
    }
}
