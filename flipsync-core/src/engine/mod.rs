//! `SyncEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! SyncEngine::new()            status = Idle
//!     └─► start()              audio opened + primed, loop spawned,
//!         │                    status = Running | AudioDisabled
//!         └─► stop()           running = false, status = Stopped
//!             └─► join().await frame loop finished, device released
//! ```
//!
//! `start()`/`stop()` called in the wrong state return an error rather than
//! panicking. A loop that ends by itself (`max_frames`) also moves to
//! `Stopped`.
//!
//! Every run gets its own stop flag. A `start()` issued while a stopped run
//! is still finishing its last frame waits for that run to exit before the
//! new one opens audio, so two loops never overlap.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS. The [`AudioEngine`] owning it
//! is therefore opened *inside* the `spawn_blocking` closure and never crosses
//! a thread boundary. A `crossbeam_channel` handshake carries the open result
//! back to `start()`.

pub mod frame_loop;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use frame_loop::{DiagnosticsSnapshot, FrameLoopContext, LoopDiagnostics};

use crate::{
    audio::{AudioEngine, AudioSpec, BackendKind, BYTES_PER_SAMPLE},
    debug::PixelBuffer,
    error::{Result, SyncError},
    events::{EngineStatus, EngineStatusEvent, FrameEvent},
    game::{FlipService, GameHandle, NullDisplay},
    synth::Waveform,
    timing::SystemClock,
};

use frame_loop::{publish_status, BROADCAST_CAP};

/// Configuration for [`SyncEngine`] and [`AudioEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Output sample rate (Hz). Default: 48000.
    pub samples_per_second: u32,
    /// Fixed game update rate (Hz). Default: 30.
    pub game_update_hz: u32,
    /// Default: 256.
    pub tone_hz: u32,
    /// Peak amplitude. Default: 3000.
    pub tone_volume: i16,
    pub waveform: Waveform,
    /// Safety margin as a fraction of one frame's bytes. Default: 1/3.
    pub safety_fraction: f32,
    /// Distance the write cursor runs ahead of the play cursor. Default: 2048.
    pub hardware_buffer_bytes: u32,
    /// Callback size hint in sample pairs. Default: 1024.
    pub samples_per_callback: u16,
    /// How far short of the deadline the coarse sleep stops. Default: 1 ms.
    pub sleep_margin: Duration,
    /// Draw cursor markers over the framebuffer. Default: false.
    pub debug_sync_display: bool,
    /// Frames of markers kept for the visualizer. Default: half the update rate.
    pub marker_history: usize,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
    pub backend: BackendKind,
    /// WAV file for the simulated backend's output.
    pub record_wav: Option<PathBuf>,
    /// Stop after this many frames. `None` runs until `stop()`.
    pub max_frames: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            samples_per_second: 48_000,
            game_update_hz: 30,
            tone_hz: 256,
            tone_volume: 3000,
            waveform: Waveform::Sine,
            safety_fraction: 1.0 / 3.0,
            hardware_buffer_bytes: 2048,
            samples_per_callback: 1024,
            sleep_margin: Duration::from_millis(1),
            debug_sync_display: false,
            marker_history: 15,
            framebuffer_width: 800,
            framebuffer_height: 600,
            backend: BackendKind::Cpal,
            record_wav: None,
            max_frames: None,
        }
    }
}

impl EngineConfig {
    pub fn audio_spec(&self) -> AudioSpec {
        AudioSpec::stereo_i16(self.samples_per_second, self.samples_per_callback)
    }

    /// One second of audio.
    pub fn ring_size_bytes(&self) -> u32 {
        self.samples_per_second * BYTES_PER_SAMPLE
    }

    /// `samples_per_second * bytes_per_sample / update_hz`, whole samples only.
    pub fn expected_sound_bytes_per_frame(&self) -> u32 {
        let bytes = self.ring_size_bytes() / self.game_update_hz.max(1);
        bytes - bytes % BYTES_PER_SAMPLE
    }

    pub fn safety_bytes(&self) -> u32 {
        let bytes = (self.expected_sound_bytes_per_frame() as f32 * self.safety_fraction) as u32;
        bytes - bytes % BYTES_PER_SAMPLE
    }

    /// Audio written ahead of the device before it starts: one frame.
    pub fn latency_bytes(&self) -> u32 {
        self.expected_sound_bytes_per_frame()
    }

    pub fn target_frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.game_update_hz.max(1)))
    }

    /// # Errors
    /// `SyncError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SyncError::InvalidConfig(msg));

        if self.samples_per_second == 0 {
            return invalid("samples_per_second must be non-zero".into());
        }
        if self.samples_per_second > u32::MAX / BYTES_PER_SAMPLE {
            return invalid(format!("samples_per_second {} is too large", self.samples_per_second));
        }
        if self.game_update_hz == 0 {
            return invalid("game_update_hz must be non-zero".into());
        }
        if self.tone_hz == 0 {
            return invalid("tone_hz must be non-zero".into());
        }
        if self.tone_volume <= 0 {
            return invalid(format!("tone_volume must be positive, got {}", self.tone_volume));
        }
        if self.samples_per_callback == 0 {
            return invalid("samples_per_callback must be non-zero".into());
        }
        if !self.safety_fraction.is_finite() || !(0.0..=1.0).contains(&self.safety_fraction) {
            return invalid(format!(
                "safety_fraction must be within [0, 1], got {}",
                self.safety_fraction
            ));
        }
        if self.hardware_buffer_bytes == 0 || self.hardware_buffer_bytes % BYTES_PER_SAMPLE != 0 {
            return invalid(format!(
                "hardware_buffer_bytes must be a non-zero multiple of {BYTES_PER_SAMPLE}, got {}",
                self.hardware_buffer_bytes
            ));
        }

        let ring = u64::from(self.ring_size_bytes());
        let frame = u64::from(self.expected_sound_bytes_per_frame());
        if frame == 0 {
            return invalid(format!(
                "{} Hz updates leave no audio per frame at {} Hz",
                self.game_update_hz, self.samples_per_second
            ));
        }
        if u64::from(self.hardware_buffer_bytes) >= ring {
            return invalid("hardware_buffer_bytes must be smaller than the ring".into());
        }
        if 2 * frame + u64::from(self.safety_bytes()) >= ring {
            return invalid(format!(
                "two frames ({frame} bytes each) plus safety do not fit in a {ring}-byte ring"
            ));
        }
        Ok(())
    }
}

/// The top-level engine handle.
///
/// `SyncEngine` is `Send + Sync`; all fields use interior mutability.
pub struct SyncEngine {
    config: EngineConfig,
    game: GameHandle,
    /// Stop flag of the current (or most recent) run.
    running: Mutex<Arc<AtomicBool>>,
    status: Arc<Mutex<EngineStatus>>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    frame_tx: broadcast::Sender<FrameEvent>,
    seq: Arc<AtomicU64>,
    diagnostics: Arc<LoopDiagnostics>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Create an idle engine. Nothing is opened until `start()`.
    pub fn new(config: EngineConfig, game: GameHandle) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (frame_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            game,
            running: Mutex::new(Arc::new(AtomicBool::new(false))),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            status_tx,
            frame_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(LoopDiagnostics::default()),
            task: Mutex::new(None),
        }
    }

    /// Start with a display that discards frames.
    pub fn start(&self) -> Result<()> {
        self.start_with_display(NullDisplay::default())
    }

    /// Open audio, prime the ring, and spawn the frame loop.
    ///
    /// Blocks until the audio engine is open (or failed to open). Must be
    /// called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `SyncError::AlreadyRunning` if already started.
    /// - `SyncError::InvalidConfig` / `SyncError::Allocation` from
    ///   initialization. A missing or unusable device is not an error; the
    ///   status becomes `AudioDisabled` instead.
    pub fn start_with_display<D: FlipService>(&self, display: D) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Other(anyhow::anyhow!("start needs a Tokio runtime: {e}")))?;

        let running = {
            let mut current = self.running.lock();
            if current.load(Ordering::SeqCst) {
                return Err(SyncError::AlreadyRunning);
            }
            let run = Arc::new(AtomicBool::new(true));
            *current = Arc::clone(&run);
            run
        };
        let previous = self.task.lock().take();

        let config = self.config.clone();
        let game = self.game.clone();
        let status = Arc::clone(&self.status);
        let status_tx = self.status_tx.clone();
        let frame_tx = self.frame_tx.clone();
        let seq = Arc::clone(&self.seq);
        let diagnostics = Arc::clone(&self.diagnostics);

        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let waiter = runtime.clone();
        let handle = runtime.spawn_blocking(move || {
            if let Some(previous) = previous {
                if let Err(e) = waiter.block_on(previous) {
                    warn!("previous frame loop ended abnormally: {e}");
                }
            }
            diagnostics.reset();

            // Opened on THIS thread: the device may be !Send.
            let opened = AudioEngine::open(&config).and_then(|audio| {
                let pixels =
                    PixelBuffer::new(config.framebuffer_width, config.framebuffer_height)?;
                Ok((audio, pixels))
            });
            let (mut audio, pixels) = match opened {
                Ok(parts) => parts,
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    publish_status(&status, &status_tx, EngineStatus::Error, Some(e.to_string()));
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };

            audio.start();
            if audio.is_enabled() {
                publish_status(&status, &status_tx, EngineStatus::Running, None);
            } else {
                publish_status(
                    &status,
                    &status_tx,
                    EngineStatus::AudioDisabled,
                    Some("no usable audio device".into()),
                );
            }
            let _ = open_tx.send(Ok(()));

            let ctx = FrameLoopContext {
                config,
                game,
                display: Box::new(display),
                pixels,
                running,
                status,
                status_tx,
                frame_tx,
                seq,
                diagnostics,
            };
            frame_loop::run(ctx, &mut audio, SystemClock);

            // Device released here, on the thread that opened it.
            audio.shutdown();
        });
        *self.task.lock() = Some(handle);

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!(status = ?self.status(), "engine started");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.running.lock().store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("frame loop failed to start".into()));
                Err(SyncError::Other(anyhow::anyhow!(
                    "frame loop task died unexpectedly"
                )))
            }
        }
    }

    /// Ask the frame loop to finish after the current frame.
    ///
    /// # Errors
    /// `SyncError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.lock().swap(false, Ordering::SeqCst) {
            return Err(SyncError::NotRunning);
        }
        self.set_status(EngineStatus::Stopped, None);
        info!("engine stop requested");
        Ok(())
    }

    /// Wait for the frame loop task to exit. Returns immediately if it was
    /// never started or has already been joined.
    pub async fn join(&self) -> Result<()> {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| SyncError::Other(anyhow::anyhow!("frame loop task failed: {e}")))?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle to the game step, e.g. to `replace` it while running.
    pub fn game(&self) -> &GameHandle {
        &self.game
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<FrameEvent> {
        self.frame_tx.subscribe()
    }

    /// Snapshot of loop counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        publish_status(&self.status, &self.status_tx, new_status, detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_reference_geometry() {
        let cfg = EngineConfig::default();
        cfg.validate().expect("default config is valid");
        assert_eq!(cfg.ring_size_bytes(), 192_000);
        assert_eq!(cfg.expected_sound_bytes_per_frame(), 6_400);
        assert_eq!(cfg.safety_bytes(), 2_132);
        assert_eq!(cfg.latency_bytes(), 6_400);
        assert_eq!(cfg.audio_spec().samples_per_callback, 1024);
    }

    #[test]
    fn frame_bytes_are_aligned_to_whole_samples() {
        let cfg = EngineConfig {
            samples_per_second: 44_100,
            game_update_hz: 144,
            ..EngineConfig::default()
        };
        // 176400 / 144 = 1225 → 1224
        assert_eq!(cfg.expected_sound_bytes_per_frame(), 1_224);
        assert_eq!(cfg.safety_bytes() % 4, 0);
    }

    #[test]
    fn validate_rejects_bad_fields() {
        let bad = [
            EngineConfig {
                samples_per_second: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                game_update_hz: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                tone_volume: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                hardware_buffer_bytes: 2050,
                ..EngineConfig::default()
            },
            EngineConfig {
                safety_fraction: f32::NAN,
                ..EngineConfig::default()
            },
            EngineConfig {
                game_update_hz: 1,
                ..EngineConfig::default()
            },
            EngineConfig {
                samples_per_second: 8,
                game_update_hz: 30,
                ..EngineConfig::default()
            },
        ];
        for cfg in bad {
            assert!(
                matches!(cfg.validate(), Err(SyncError::InvalidConfig(_))),
                "{cfg:?} should be rejected"
            );
        }
    }

    #[test]
    fn new_engine_is_idle() {
        let engine = SyncEngine::new(EngineConfig::default(), GameHandle::new(crate::game::ToneGame::new()));
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert!(!engine.is_running());
        assert!(matches!(engine.stop(), Err(SyncError::NotRunning)));
    }
}
