//! Blocking fixed-rate frame loop.
//!
//! ## Per frame
//!
//! ```text
//! 1. FrameStart → Work
//! 2. Game update_and_render into the framebuffer
//! 3. Project bytes until the flip from the time since the last flip
//! 4. AudioEngine::fill_frame, with the game producing the samples
//! 5. Record the output marker; draw the sync markers if enabled
//! 6. Sleep coarse, spin fine
//! 7. Flip, then record the flip cursors
//! 8. Broadcast a FrameEvent
//! ```
//!
//! Runs in `spawn_blocking` under [`SyncEngine`](super::SyncEngine), or
//! directly from tests with a manual clock.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::{AudioEngine, FrameAudio, BYTES_PER_SAMPLE},
    debug::{DebugSyncVisualizer, MarkerHistory, PixelBuffer},
    engine::EngineConfig,
    error::Result,
    events::{EngineStatus, EngineStatusEvent, FrameAudioKind, FrameEvent},
    game::{FlipService, FrameInput, GameHandle},
    timing::{FrameClock, FrameScheduler},
};

/// Broadcast channel capacity for frame and status events.
pub(crate) const BROADCAST_CAP: usize = 256;

#[derive(Default)]
pub struct LoopDiagnostics {
    pub frames: AtomicU64,
    pub fills: AtomicU64,
    pub samples_written: AtomicU64,
    pub starved_frames: AtomicU64,
    pub disabled_frames: AtomicU64,
    pub latent_frames: AtomicU64,
    pub missed_deadlines: AtomicU64,
    pub flip_errors: AtomicU64,
    pub callbacks_served: AtomicU64,
}

impl LoopDiagnostics {
    pub fn reset(&self) {
        self.frames.store(0, Ordering::Relaxed);
        self.fills.store(0, Ordering::Relaxed);
        self.samples_written.store(0, Ordering::Relaxed);
        self.starved_frames.store(0, Ordering::Relaxed);
        self.disabled_frames.store(0, Ordering::Relaxed);
        self.latent_frames.store(0, Ordering::Relaxed);
        self.missed_deadlines.store(0, Ordering::Relaxed);
        self.flip_errors.store(0, Ordering::Relaxed);
        self.callbacks_served.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            fills: self.fills.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            starved_frames: self.starved_frames.load(Ordering::Relaxed),
            disabled_frames: self.disabled_frames.load(Ordering::Relaxed),
            latent_frames: self.latent_frames.load(Ordering::Relaxed),
            missed_deadlines: self.missed_deadlines.load(Ordering::Relaxed),
            flip_errors: self.flip_errors.load(Ordering::Relaxed),
            callbacks_served: self.callbacks_served.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames: u64,
    pub fills: u64,
    pub samples_written: u64,
    pub starved_frames: u64,
    pub disabled_frames: u64,
    pub latent_frames: u64,
    pub missed_deadlines: u64,
    pub flip_errors: u64,
    pub callbacks_served: u64,
}

/// Everything the loop needs, passed as one struct.
pub struct FrameLoopContext {
    pub config: EngineConfig,
    pub game: GameHandle,
    pub display: Box<dyn FlipService>,
    pub pixels: PixelBuffer,
    pub running: Arc<AtomicBool>,
    pub status: Arc<Mutex<EngineStatus>>,
    pub status_tx: broadcast::Sender<EngineStatusEvent>,
    pub frame_tx: broadcast::Sender<FrameEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<LoopDiagnostics>,
}

impl FrameLoopContext {
    /// Stand-alone context with its own flags and channels, already marked
    /// running.
    ///
    /// # Errors
    /// `SyncError::Allocation` if the framebuffer cannot be allocated.
    pub fn new<D: FlipService>(config: EngineConfig, game: GameHandle, display: D) -> Result<Self> {
        let pixels = PixelBuffer::new(config.framebuffer_width, config.framebuffer_height)?;
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (frame_tx, _) = broadcast::channel(BROADCAST_CAP);
        Ok(Self {
            config,
            game,
            display: Box::new(display),
            pixels,
            running: Arc::new(AtomicBool::new(true)),
            status: Arc::new(Mutex::new(EngineStatus::Running)),
            status_tx,
            frame_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(LoopDiagnostics::default()),
        })
    }
}

/// Publish a status change to the shared slot and its subscribers.
pub(crate) fn publish_status(
    status: &Mutex<EngineStatus>,
    status_tx: &broadcast::Sender<EngineStatusEvent>,
    new_status: EngineStatus,
    detail: Option<String>,
) {
    *status.lock() = new_status;
    let _ = status_tx.send(EngineStatusEvent {
        status: new_status,
        detail,
    });
}

/// Run frames until `ctx.running` is cleared or `config.max_frames` is
/// reached. Returns the number of frames flipped.
pub fn run<C: FrameClock>(mut ctx: FrameLoopContext, audio: &mut AudioEngine, clock: C) -> u64 {
    let target_frame = ctx.config.target_frame_duration();
    let mut scheduler = FrameScheduler::new(clock, target_frame, ctx.config.sleep_margin);
    let mut markers = MarkerHistory::new(ctx.config.marker_history);
    let visualizer = DebugSyncVisualizer::new(
        audio.ring().size_bytes(),
        audio.ring().hardware_buffer_bytes(),
    );
    let seconds_per_frame = target_frame.as_secs_f32();

    info!(
        update_hz = ctx.config.game_update_hz,
        audio_enabled = audio.is_enabled(),
        "frame loop started"
    );

    while ctx.running.load(Ordering::Relaxed) {
        if let Some(max) = ctx.config.max_frames {
            if scheduler.frame_index() >= max {
                break;
            }
        }

        scheduler.begin_frame();
        let input = FrameInput {
            frame_index: scheduler.frame_index(),
            seconds_per_frame,
        };
        ctx.game.update_and_render(&input, &mut ctx.pixels);

        let until_flip = audio.expected_bytes_until_flip(scheduler.since_flip(), target_frame);
        let game = &ctx.game;
        let outcome = audio.fill_frame(until_flip, |buffer| game.get_sound_samples(buffer));

        let diagnostics = &ctx.diagnostics;
        let (kind, samples_written, target_cursor_byte, latent) = match outcome {
            FrameAudio::Filled(plan) => {
                let samples = plan.request.total_samples();
                diagnostics.fills.fetch_add(1, Ordering::Relaxed);
                diagnostics
                    .samples_written
                    .fetch_add(u64::from(samples), Ordering::Relaxed);
                if plan.audio_card_is_latent {
                    diagnostics.latent_frames.fetch_add(1, Ordering::Relaxed);
                }
                markers.record_output(&plan, BYTES_PER_SAMPLE);
                (
                    FrameAudioKind::Filled,
                    samples,
                    Some(plan.target_cursor_byte),
                    plan.audio_card_is_latent,
                )
            }
            FrameAudio::Starved(_) => {
                diagnostics.starved_frames.fetch_add(1, Ordering::Relaxed);
                (FrameAudioKind::Starved, 0, None, false)
            }
            FrameAudio::Disabled => {
                diagnostics.disabled_frames.fetch_add(1, Ordering::Relaxed);
                (FrameAudioKind::Disabled, 0, None, false)
            }
        };

        if ctx.config.debug_sync_display {
            visualizer.draw(&markers, &mut ctx.pixels);
        }

        let report = scheduler.finish_frame();
        if report.missed_deadline {
            diagnostics.missed_deadlines.fetch_add(1, Ordering::Relaxed);
        }

        if let Err(e) = ctx.display.flip(&ctx.pixels) {
            diagnostics.flip_errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, frame = report.frame_index, "flip failed");
        }
        scheduler.record_flip();

        let flip_cursors = audio.cursors();
        markers.record_flip(&flip_cursors);
        diagnostics.frames.fetch_add(1, Ordering::Relaxed);
        diagnostics
            .callbacks_served
            .store(flip_cursors.callbacks_served, Ordering::Relaxed);

        let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
        let _ = ctx.frame_tx.send(FrameEvent {
            seq,
            frame_index: report.frame_index,
            audio: kind,
            samples_written,
            play_cursor: flip_cursors.play_cursor,
            write_cursor: flip_cursors.write_cursor,
            target_cursor_byte,
            audio_card_is_latent: latent,
            work_ms: report.work.as_secs_f64() * 1000.0,
            frame_ms: report.frame_time.as_secs_f64() * 1000.0,
            missed_deadline: report.missed_deadline,
        });

        debug!(
            frame = report.frame_index,
            samples_written,
            play_cursor = flip_cursors.play_cursor,
            "frame flipped"
        );
    }

    let frames = scheduler.frame_index();
    info!(frames, "frame loop finished");

    ctx.running.store(false, Ordering::SeqCst);
    let finished_while_active = matches!(
        *ctx.status.lock(),
        EngineStatus::Running | EngineStatus::AudioDisabled
    );
    if finished_while_active {
        publish_status(&ctx.status, &ctx.status_tx, EngineStatus::Stopped, None);
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{AudioDevice, AudioSpec},
        buffering::RingBuffer,
        error::SyncError,
        game::{NullDisplay, ToneGame},
        timing::ManualClock,
    };

    fn config(frames: u64) -> EngineConfig {
        EngineConfig {
            max_frames: Some(frames),
            framebuffer_width: 64,
            framebuffer_height: 32,
            ..EngineConfig::default()
        }
    }

    fn no_device(_: &AudioSpec, _: Arc<RingBuffer>) -> Result<Box<dyn AudioDevice>> {
        Err(SyncError::NoDefaultOutputDevice)
    }

    #[test]
    fn disabled_audio_still_runs_frames() {
        let cfg = config(5);
        let mut audio = AudioEngine::open_with(&cfg, no_device).expect("open");
        let ctx = FrameLoopContext::new(cfg, GameHandle::new(ToneGame::new()), NullDisplay::default())
            .expect("context");
        let diagnostics = Arc::clone(&ctx.diagnostics);
        let status = Arc::clone(&ctx.status);

        let frames = run(ctx, &mut audio, ManualClock::new());

        assert_eq!(frames, 5);
        let snap = diagnostics.snapshot();
        assert_eq!(snap.frames, 5);
        assert_eq!(snap.disabled_frames, 5);
        assert_eq!(snap.fills, 0);
        assert_eq!(*status.lock(), EngineStatus::Stopped);
    }

    #[test]
    fn frames_are_paced_to_the_target_duration() {
        let cfg = config(4);
        let target = cfg.target_frame_duration();
        let mut audio = AudioEngine::open_with(&cfg, no_device).expect("open");
        let ctx = FrameLoopContext::new(cfg, GameHandle::new(ToneGame::new()), NullDisplay::default())
            .expect("context");
        let mut frames_rx = ctx.frame_tx.subscribe();

        let clock = ManualClock::new();
        run(ctx, &mut audio, clock.clone());

        assert_eq!(clock.elapsed(), target * 4);
        let mut seen = 0;
        while let Ok(event) = frames_rx.try_recv() {
            assert_eq!(event.frame_index, seen);
            assert_eq!(event.audio, FrameAudioKind::Disabled);
            assert!(!event.missed_deadline);
            seen += 1;
        }
        assert_eq!(seen, 4);
    }

    #[test]
    fn cleared_running_flag_stops_before_the_first_frame() {
        let cfg = config(100);
        let mut audio = AudioEngine::open_with(&cfg, no_device).expect("open");
        let ctx = FrameLoopContext::new(cfg, GameHandle::new(ToneGame::new()), NullDisplay::default())
            .expect("context");
        ctx.running.store(false, Ordering::SeqCst);
        assert_eq!(run(ctx, &mut audio, ManualClock::new()), 0);
    }

    #[test]
    fn diagnostics_snapshot_serializes_camel_case() {
        let diagnostics = LoopDiagnostics::default();
        diagnostics.starved_frames.fetch_add(2, Ordering::Relaxed);
        let json = serde_json::to_value(diagnostics.snapshot()).expect("serialize");
        assert_eq!(json["starvedFrames"], 2);
        assert_eq!(json["missedDeadlines"], 0);

        diagnostics.reset();
        assert_eq!(diagnostics.snapshot(), DiagnosticsSnapshot::default());
    }
}
