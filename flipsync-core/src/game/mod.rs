//! The pluggable per-frame game step and the display it presents to.
//!
//! The frame loop calls [`GameUpdate::update_and_render`] once per frame,
//! then, once the latency estimator has sized this frame's audio, hands the
//! game a [`SoundBuffer`] through [`GameUpdate::get_sound_samples`].
//!
//! [`GameHandle`] lets the implementation be replaced between frames.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::debug::PixelBuffer;
use crate::error::Result;
use crate::synth::SoundBuffer;

/// Per-frame input handed to the game step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput {
    pub frame_index: u64,
    /// Fixed simulation step.
    pub seconds_per_frame: f32,
}

pub trait GameUpdate: Send + 'static {
    fn update_and_render(&mut self, input: &FrameInput, pixels: &mut PixelBuffer);

    /// Fill exactly `buffer.samples_to_write()` pairs. Defaults to the shared
    /// tone generator.
    fn get_sound_samples(&mut self, buffer: &mut SoundBuffer<'_>) {
        buffer.write_tone();
    }
}

/// Shared, swappable game step.
#[derive(Clone)]
pub struct GameHandle(Arc<Mutex<Box<dyn GameUpdate>>>);

impl GameHandle {
    pub fn new<G: GameUpdate>(game: G) -> Self {
        Self(Arc::new(Mutex::new(Box::new(game))))
    }

    /// Swap in a new implementation. Takes effect at the next frame.
    pub fn replace<G: GameUpdate>(&self, game: G) {
        *self.0.lock() = Box::new(game);
        tracing::info!("game step replaced");
    }

    pub fn update_and_render(&self, input: &FrameInput, pixels: &mut PixelBuffer) {
        self.0.lock().update_and_render(input, pixels);
    }

    pub fn get_sound_samples(&self, buffer: &mut SoundBuffer<'_>) {
        self.0.lock().get_sound_samples(buffer);
    }
}

impl std::fmt::Debug for GameHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameHandle").finish_non_exhaustive()
    }
}

/// Scrolling gradient plus the default tone.
#[derive(Debug, Clone, Default)]
pub struct ToneGame {
    x_offset: i32,
    y_offset: i32,
    /// Applied to the generator before each frame's samples when set.
    tone_hz: Option<u32>,
}

impl ToneGame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tone_hz(tone_hz: u32) -> Self {
        Self {
            tone_hz: Some(tone_hz),
            ..Self::default()
        }
    }
}

impl GameUpdate for ToneGame {
    fn update_and_render(&mut self, _input: &FrameInput, pixels: &mut PixelBuffer) {
        pixels.fill_gradient(self.x_offset, self.y_offset);
        self.x_offset = self.x_offset.wrapping_add(1);
        self.y_offset = self.y_offset.wrapping_add(2);
    }

    fn get_sound_samples(&mut self, buffer: &mut SoundBuffer<'_>) {
        if let Some(hz) = self.tone_hz {
            if buffer.tone_mut().tone_hz() != hz {
                buffer.tone_mut().set_tone_hz(hz);
            }
        }
        buffer.write_tone();
    }
}

/// Presents a finished frame. Called once per frame at the flip point.
pub trait FlipService: Send + 'static {
    fn flip(&mut self, frame: &PixelBuffer) -> Result<()>;
}

/// Discards frames, counting them.
#[derive(Debug, Default)]
pub struct NullDisplay {
    flips: u64,
}

impl NullDisplay {
    pub fn flips(&self) -> u64 {
        self.flips
    }
}

impl FlipService for NullDisplay {
    fn flip(&mut self, _frame: &PixelBuffer) -> Result<()> {
        self.flips += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{ToneGenerator, Waveform};

    struct Silent;

    impl GameUpdate for Silent {
        fn update_and_render(&mut self, _input: &FrameInput, pixels: &mut PixelBuffer) {
            pixels.clear(0xFF00_0000);
        }

        fn get_sound_samples(&mut self, buffer: &mut SoundBuffer<'_>) {
            buffer.write_silence();
        }
    }

    fn input() -> FrameInput {
        FrameInput {
            frame_index: 0,
            seconds_per_frame: 1.0 / 30.0,
        }
    }

    #[test]
    fn replace_takes_effect_on_the_next_call() {
        let handle = GameHandle::new(ToneGame::new());
        let mut tone = ToneGenerator::new(48_000, 256, 3000, Waveform::Sine);

        let mut scratch = vec![0i16; 64];
        handle.get_sound_samples(&mut SoundBuffer::new(&mut scratch, &mut tone));
        assert!(scratch.iter().any(|s| *s != 0));

        handle.replace(Silent);
        let mut scratch = vec![1i16; 64];
        handle.get_sound_samples(&mut SoundBuffer::new(&mut scratch, &mut tone));
        assert!(scratch.iter().all(|s| *s == 0));

        let mut pixels = PixelBuffer::new(2, 2).expect("pixels");
        handle.update_and_render(&input(), &mut pixels);
        assert_eq!(pixels.pixel(1, 1), Some(0xFF00_0000));
    }

    #[test]
    fn clones_share_the_same_game() {
        let handle = GameHandle::new(ToneGame::new());
        let other = handle.clone();
        other.replace(Silent);

        let mut tone = ToneGenerator::new(48_000, 256, 3000, Waveform::Sine);
        let mut scratch = vec![1i16; 8];
        handle.get_sound_samples(&mut SoundBuffer::new(&mut scratch, &mut tone));
        assert!(scratch.iter().all(|s| *s == 0));
    }

    #[test]
    fn tone_game_applies_its_pitch() {
        let mut game = ToneGame::with_tone_hz(440);
        let mut tone = ToneGenerator::new(48_000, 256, 3000, Waveform::Sine);
        let mut scratch = vec![0i16; 8];
        game.get_sound_samples(&mut SoundBuffer::new(&mut scratch, &mut tone));
        assert_eq!(tone.tone_hz(), 440);
    }

    #[test]
    fn tone_game_scrolls_its_gradient() {
        let mut game = ToneGame::new();
        let mut pixels = PixelBuffer::new(4, 4).expect("pixels");
        game.update_and_render(&input(), &mut pixels);
        let first = pixels.pixel(0, 0);
        game.update_and_render(&input(), &mut pixels);
        assert_ne!(pixels.pixel(0, 0), first);
    }

    #[test]
    fn null_display_counts_flips() {
        let mut display = NullDisplay::default();
        let pixels = PixelBuffer::new(1, 1).expect("pixels");
        display.flip(&pixels).expect("flip");
        display.flip(&pixels).expect("flip");
        assert_eq!(display.flips(), 2);
    }
}
