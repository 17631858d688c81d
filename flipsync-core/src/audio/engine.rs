//! `AudioEngine`: the owning struct behind per-frame audio.
//!
//! Holds the ring, the device draining it, the latency estimator, the tone
//! generator, and the producer's running sample index. Everything the frame
//! loop needs for audio goes through [`AudioEngine::fill_frame`].
//!
//! ## Per-frame fill
//!
//! ```text
//! 1. Snapshot cursors (brief lock)
//! 2. Estimator plan → Fill(plan) | Starved
//! 3. Producer fills scratch[..plan samples] through a SoundBuffer view
//! 4. Copy region1 then region2 from scratch into the ring (no lock held)
//! 5. running_sample_index += samples written
//! ```
//!
//! A device that cannot be opened, or opens in the wrong format, leaves the
//! engine running with audio disabled. Allocation failures are fatal.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{AudioDevice, AudioSpec, BYTES_PER_SAMPLE, CHANNELS};
use crate::{
    buffering::{CursorSnapshot, RingBuffer},
    engine::EngineConfig,
    error::{Result, SyncError},
    sync::{FillOutcome, FillPlan, LatencyEstimator, Starvation, SyncParams},
    synth::{SoundBuffer, ToneGenerator},
};

/// What happened to the audio in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAudio {
    /// The plan was computed and its samples copied into the ring.
    Filled(FillPlan),
    /// The hardware had caught up with the producer; nothing was written.
    Starved(Starvation),
    /// No device is attached.
    Disabled,
}

pub struct AudioEngine {
    spec: AudioSpec,
    ring: Arc<RingBuffer>,
    device: Option<Box<dyn AudioDevice>>,
    estimator: LatencyEstimator,
    tone: ToneGenerator,
    /// Interleaved i16 slots, sized for the largest possible fill.
    scratch: Vec<i16>,
    running_sample_index: u64,
    latency_bytes: u32,
    audio_card_is_latent: bool,
}

impl AudioEngine {
    /// Open the backend named in `config`.
    ///
    /// # Errors
    /// `SyncError::InvalidConfig` for a bad config and
    /// `SyncError::Allocation` when the ring or scratch buffer cannot be
    /// allocated. Device failures are not errors; see
    /// [`is_enabled`](Self::is_enabled).
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let backend = config.backend;
        let record_wav = config.record_wav.clone();
        Self::open_with(config, move |spec, ring| {
            super::open_output(backend, spec, ring, record_wav.as_deref())
        })
    }

    /// Like [`open`](Self::open) with a caller-supplied device factory.
    pub fn open_with<F>(config: &EngineConfig, open_device: F) -> Result<Self>
    where
        F: FnOnce(&AudioSpec, Arc<RingBuffer>) -> Result<Box<dyn AudioDevice>>,
    {
        config.validate()?;

        let spec = config.audio_spec();
        let ring = Arc::new(RingBuffer::new(
            config.ring_size_bytes(),
            config.hardware_buffer_bytes,
        )?);

        let estimator = LatencyEstimator::new(SyncParams {
            size_bytes: ring.size_bytes(),
            bytes_per_sample: BYTES_PER_SAMPLE,
            expected_sound_bytes_per_frame: config.expected_sound_bytes_per_frame(),
            safety_bytes: config.safety_bytes(),
        })?;

        let slots = (ring.size_bytes() / BYTES_PER_SAMPLE) as usize * usize::from(CHANNELS);
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(slots)
            .map_err(|_| SyncError::Allocation {
                what: "sample scratch buffer",
                bytes: slots * std::mem::size_of::<i16>(),
            })?;
        scratch.resize(slots, 0);

        let device = match open_device(&spec, Arc::clone(&ring)) {
            Ok(device) => {
                let obtained = device.obtained();
                if spec.is_compatible(&obtained) {
                    Some(device)
                } else {
                    warn!(
                        requested = %spec,
                        %obtained,
                        "audio device opened in an unusable format, audio disabled"
                    );
                    None
                }
            }
            Err(e @ SyncError::Allocation { .. }) => return Err(e),
            Err(e) => {
                warn!(error = %e, "audio device unavailable, audio disabled");
                None
            }
        };

        info!(
            samples_per_second = spec.samples_per_second,
            ring_bytes = ring.size_bytes(),
            bytes_per_frame = config.expected_sound_bytes_per_frame(),
            safety_bytes = estimator.params().safety_bytes,
            enabled = device.is_some(),
            "audio engine opened"
        );

        Ok(Self {
            spec,
            ring,
            device,
            estimator,
            tone: ToneGenerator::new(
                spec.samples_per_second,
                config.tone_hz,
                config.tone_volume,
                config.waveform,
            ),
            scratch,
            running_sample_index: 0,
            latency_bytes: config.latency_bytes(),
            audio_card_is_latent: false,
        })
    }

    /// Prime `latency_bytes` of tone at the producer position, then start
    /// callbacks. A device that refuses to start is dropped.
    pub fn start(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };

        let samples = (self.latency_bytes / BYTES_PER_SAMPLE) as usize;
        let slots = (samples * usize::from(CHANNELS)).min(self.scratch.len());
        let offset = self.estimator.wanted_write_byte(self.running_sample_index);
        let primed = self.tone.fill(&mut self.scratch[..slots]);
        self.ring.write_samples(offset, &self.scratch[..slots]);
        self.running_sample_index += primed as u64;

        if let Err(e) = device.resume() {
            warn!(error = %e, "audio device failed to start, audio disabled");
            self.device = None;
            return;
        }
        debug!(primed_samples = primed, "audio started");
    }

    /// Stop callbacks without releasing the device.
    pub fn pause(&mut self) -> Result<()> {
        match self.device.as_mut() {
            Some(device) => device.pause(),
            None => Ok(()),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.device.as_mut() {
            Some(device) => device.resume(),
            None => Ok(()),
        }
    }

    /// Stop and release the device. The ring is freed with the engine.
    pub fn shutdown(mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.pause() {
                debug!(error = %e, "pause during shutdown failed");
            }
        }
        info!(
            running_sample_index = self.running_sample_index,
            "audio engine shut down"
        );
    }

    /// Projection of how many bytes will play before the next flip.
    pub fn expected_bytes_until_flip(&self, since_flip: Duration, target_frame: Duration) -> u32 {
        self.estimator.expected_bytes_until_flip(since_flip, target_frame)
    }

    /// Plan this frame's fill, let `produce` write the samples, and copy them
    /// into the ring.
    ///
    /// `produce` receives a zeroed view of exactly the sample count the
    /// estimator asked for; it is not called when the frame is starved or audio is
    /// disabled.
    pub fn fill_frame<F>(&mut self, expected_bytes_until_flip: u32, produce: F) -> FrameAudio
    where
        F: FnOnce(&mut SoundBuffer<'_>),
    {
        if self.device.is_none() {
            return FrameAudio::Disabled;
        }

        let cursors = self.ring.snapshot();
        let callbacks_since_last_fill = self.ring.take_fill_needed();

        let plan = match self.estimator.plan(
            &cursors,
            self.running_sample_index,
            expected_bytes_until_flip,
        ) {
            FillOutcome::Fill(plan) => plan,
            FillOutcome::Starved(starved) => {
                warn!(
                    play_cursor = starved.play_cursor,
                    wanted_write_byte = starved.wanted_write_byte,
                    lag_bytes = starved.lag_bytes,
                    "audio starved, skipping fill and resyncing to the write cursor"
                );
                self.running_sample_index = starved.resync_sample_index;
                return FrameAudio::Starved(starved);
            }
        };

        self.audio_card_is_latent = plan.audio_card_is_latent;

        let request = plan.request;
        let slots = request.total_samples() as usize * usize::from(CHANNELS);
        let samples = &mut self.scratch[..slots];
        samples.fill(0);
        {
            let mut buffer = SoundBuffer::new(samples, &mut self.tone);
            produce(&mut buffer);
        }

        let split = request.region1_samples as usize * usize::from(CHANNELS);
        let (region1, region2) = self.scratch[..slots].split_at(split);
        self.ring.write_samples(request.region1_start, region1);
        if request.wraps() {
            self.ring.write_samples(request.region2_start, region2);
        }
        self.running_sample_index += u64::from(request.total_samples());

        debug!(
            samples = request.total_samples(),
            wraps = request.wraps(),
            latent = plan.audio_card_is_latent,
            callbacks_since_last_fill,
            "frame audio written"
        );

        FrameAudio::Filled(plan)
    }

    pub fn is_enabled(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.is_playing())
    }

    pub fn spec(&self) -> &AudioSpec {
        &self.spec
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    pub fn cursors(&self) -> CursorSnapshot {
        self.ring.snapshot()
    }

    pub fn estimator(&self) -> &LatencyEstimator {
        &self.estimator
    }

    pub fn running_sample_index(&self) -> u64 {
        self.running_sample_index
    }

    pub fn latency_bytes(&self) -> u32 {
        self.latency_bytes
    }

    pub fn safety_bytes(&self) -> u32 {
        self.estimator.params().safety_bytes
    }

    pub fn expected_sound_bytes_per_frame(&self) -> u32 {
        self.estimator.params().expected_sound_bytes_per_frame
    }

    /// Latent flag from the most recent successful plan.
    pub fn audio_card_is_latent(&self) -> bool {
        self.audio_card_is_latent
    }

    pub fn tone(&self) -> &ToneGenerator {
        &self.tone
    }

    pub fn tone_mut(&mut self) -> &mut ToneGenerator {
        &mut self.tone
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("spec", &self.spec)
            .field("enabled", &self.is_enabled())
            .field("running_sample_index", &self.running_sample_index)
            .field("ring", &self.ring)
            .finish_non_exhaustive()
    }
}
