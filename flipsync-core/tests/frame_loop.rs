//! Frame loop against a virtual clock and a hand-driven sound card.
//!
//! The display's flip doubles as the sound card: at every flip it serves all
//! callbacks that fell due since the previous one, so playback advances in
//! step with virtual time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use flipsync_core::{
    audio::{AudioDevice, AudioSpec},
    debug::PixelBuffer,
    engine::{frame_loop, FrameLoopContext},
    error::Result,
    game::{FlipService, FrameInput, GameHandle, GameUpdate, ToneGame},
    timing::ManualClock,
    AudioEngine, EngineConfig, EngineStatus, FrameAudioKind, RingBuffer, SoundBuffer,
    ToneGenerator, Waveform,
};

struct HandDriven {
    obtained: AudioSpec,
    playing: bool,
}

impl AudioDevice for HandDriven {
    fn obtained(&self) -> AudioSpec {
        self.obtained
    }

    fn resume(&mut self) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.playing = false;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

fn hand_driven(spec: &AudioSpec, _ring: Arc<RingBuffer>) -> Result<Box<dyn AudioDevice>> {
    Ok(Box::new(HandDriven {
        obtained: *spec,
        playing: false,
    }))
}

struct SoundCardDisplay {
    ring: Arc<RingBuffer>,
    clock: ManualClock,
    period: Duration,
    next_callback: Duration,
    chunk: Vec<i16>,
    heard: Arc<Mutex<Vec<i16>>>,
}

impl FlipService for SoundCardDisplay {
    fn flip(&mut self, _frame: &PixelBuffer) -> Result<()> {
        let now = self.clock.elapsed();
        while self.next_callback <= now {
            self.ring.serve_i16(&mut self.chunk);
            self.heard.lock().extend_from_slice(&self.chunk);
            self.next_callback += self.period;
        }
        Ok(())
    }
}

fn config(frames: u64) -> EngineConfig {
    EngineConfig {
        max_frames: Some(frames),
        framebuffer_width: 320,
        framebuffer_height: 240,
        debug_sync_display: true,
        ..EngineConfig::default()
    }
}

struct Harness {
    audio: AudioEngine,
    ctx: FrameLoopContext,
    clock: ManualClock,
    heard: Arc<Mutex<Vec<i16>>>,
}

fn harness<G: GameUpdate>(cfg: EngineConfig, game: G) -> Harness {
    let mut audio = AudioEngine::open_with(&cfg, hand_driven).expect("open audio");
    audio.start();

    let clock = ManualClock::new();
    let heard = Arc::new(Mutex::new(Vec::new()));
    let spec = cfg.audio_spec();
    let display = SoundCardDisplay {
        ring: Arc::clone(audio.ring()),
        clock: clock.clone(),
        period: Duration::from_secs_f64(
            f64::from(spec.samples_per_callback) / f64::from(spec.samples_per_second),
        ),
        next_callback: Duration::ZERO,
        chunk: vec![0i16; usize::from(spec.samples_per_callback) * 2],
        heard: Arc::clone(&heard),
    };

    let ctx = FrameLoopContext::new(cfg, GameHandle::new(game), display).expect("context");
    Harness {
        audio,
        ctx,
        clock,
        heard,
    }
}

#[test]
fn steady_frames_play_a_continuous_tone() {
    let cfg = config(90);
    let Harness {
        mut audio,
        ctx,
        clock,
        heard,
    } = harness(cfg.clone(), ToneGame::new());
    let diagnostics = Arc::clone(&ctx.diagnostics);

    let frames = frame_loop::run(ctx, &mut audio, clock.clone());
    assert_eq!(frames, 90);

    let snap = diagnostics.snapshot();
    assert_eq!(snap.fills, 90);
    assert_eq!(snap.starved_frames, 0);
    assert_eq!(snap.missed_deadlines, 0);
    assert_eq!(clock.elapsed(), cfg.target_frame_duration() * 90);

    let heard = heard.lock();
    assert!(heard.len() >= 2 * 48_000 * 2, "about three seconds should have played");
    let mut reference = ToneGenerator::new(48_000, cfg.tone_hz, cfg.tone_volume, cfg.waveform);
    let mut expected = vec![0i16; heard.len()];
    reference.fill(&mut expected);
    assert!(*heard == expected, "played audio diverged from a continuous tone");
}

#[test]
fn producer_stays_ahead_of_playback_without_lapping_it() {
    let cfg = config(60);
    let ring_size = u64::from(cfg.ring_size_bytes());
    let Harness {
        mut audio,
        ctx,
        clock,
        ..
    } = harness(cfg, ToneGame::new());
    let mut frames_rx = ctx.frame_tx.subscribe();

    frame_loop::run(ctx, &mut audio, clock);

    let produced = audio.running_sample_index() * 4;
    let played = audio.cursors().bytes_played;
    assert!(produced > played);
    assert!(produced - played < ring_size);

    let mut count = 0;
    while let Ok(event) = frames_rx.try_recv() {
        assert_eq!(event.audio, FrameAudioKind::Filled);
        assert!(!event.audio_card_is_latent, "frame {} went latent", event.frame_index);
        count += 1;
    }
    assert_eq!(count, 60);
}

#[test]
fn deep_hardware_buffer_targets_play_plus_frame_plus_safety() {
    let cfg = EngineConfig {
        hardware_buffer_bytes: 16_384,
        ..config(45)
    };
    let ring_size = cfg.ring_size_bytes();
    let ahead = cfg.expected_sound_bytes_per_frame() + cfg.safety_bytes();
    let Harness {
        mut audio,
        ctx,
        clock,
        ..
    } = harness(cfg, ToneGame::new());
    let mut frames_rx = ctx.frame_tx.subscribe();
    let diagnostics = Arc::clone(&ctx.diagnostics);

    frame_loop::run(ctx, &mut audio, clock);

    let snap = diagnostics.snapshot();
    assert_eq!(snap.latent_frames, 45);
    assert_eq!(snap.starved_frames, 0);

    // Cursors only move inside flip, so the play cursor a frame planned
    // against is the one reported at the previous flip.
    let mut play_at_fill = 0u32;
    let mut count = 0;
    while let Ok(event) = frames_rx.try_recv() {
        assert_eq!(event.audio, FrameAudioKind::Filled);
        assert!(event.audio_card_is_latent, "frame {} was not latent", event.frame_index);
        assert_eq!(
            event.target_cursor_byte,
            Some((play_at_fill + ahead) % ring_size),
            "frame {}",
            event.frame_index
        );
        play_at_fill = event.play_cursor;
        count += 1;
    }
    assert_eq!(count, 45);
}

/// Spends a whole frame and a half of virtual time every tenth frame.
struct Stalling {
    clock: ManualClock,
    stall: Duration,
}

impl GameUpdate for Stalling {
    fn update_and_render(&mut self, input: &FrameInput, pixels: &mut PixelBuffer) {
        pixels.clear(0xFF10_1010);
        if input.frame_index % 10 == 9 {
            self.clock.advance(self.stall);
        }
    }

    fn get_sound_samples(&mut self, buffer: &mut SoundBuffer<'_>) {
        buffer.write_tone();
    }
}

#[test]
fn stalled_frames_are_recorded_as_missed_deadlines() {
    let cfg = config(30);
    let target = cfg.target_frame_duration();
    let Harness {
        mut audio,
        ctx,
        clock,
        ..
    } = harness(cfg, ToneGame::new());

    // Swap in the stalling game, driven by the loop's own clock.
    ctx.game.replace(Stalling {
        clock: clock.clone(),
        stall: target.mul_f64(1.5),
    });
    let diagnostics = Arc::clone(&ctx.diagnostics);

    frame_loop::run(ctx, &mut audio, clock);

    let snap = diagnostics.snapshot();
    assert_eq!(snap.frames, 30);
    assert_eq!(snap.missed_deadlines, 3);
    assert_eq!(snap.fills + snap.starved_frames, 30);
}

#[test]
fn loop_reports_stopped_when_it_runs_out_of_frames() {
    let Harness {
        mut audio,
        ctx,
        clock,
        ..
    } = harness(config(3), ToneGame::new());
    let status = Arc::clone(&ctx.status);
    let mut status_rx = ctx.status_tx.subscribe();

    frame_loop::run(ctx, &mut audio, clock);

    assert_eq!(*status.lock(), EngineStatus::Stopped);
    let event = status_rx.try_recv().expect("status event");
    assert_eq!(event.status, EngineStatus::Stopped);
}

#[test]
fn square_wave_reaches_the_ring() {
    let cfg = EngineConfig {
        waveform: Waveform::Square,
        ..config(4)
    };
    let Harness {
        mut audio,
        ctx,
        clock,
        heard,
    } = harness(cfg, ToneGame::new());

    frame_loop::run(ctx, &mut audio, clock);

    let heard = heard.lock();
    assert!(!heard.is_empty());
    assert!(heard.iter().all(|s| *s == 3000 || *s == -3000));
}
