//! A paced thread that plays the role of a sound card.
//!
//! Every `samples_per_callback / samples_per_second` seconds the thread drains
//! one chunk from the ring through the same [`RingBuffer::serve_i16`] path a
//! real device uses. The drained PCM can be written to a WAV file, which makes
//! headless runs audible after the fact.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{AudioDevice, AudioSpec};
use crate::{
    buffering::RingBuffer,
    error::{Result, SyncError},
};

type WavSink = hound::WavWriter<BufWriter<File>>;

/// If the pacing thread falls this many chunks behind, it stops trying to
/// catch up and restarts its schedule from now.
const MAX_CATCH_UP_CHUNKS: u32 = 4;

pub struct SimulatedOutput {
    obtained: AudioSpec,
    playing: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedOutput {
    /// Start the pacing thread (paused) and optionally a WAV recorder.
    ///
    /// # Errors
    /// `SyncError::InvalidConfig` for a zero rate or chunk size,
    /// `SyncError::Io` if the WAV file cannot be created, and
    /// `SyncError::AudioDevice` for other recorder or thread-spawn failures.
    pub fn open(
        requested: &AudioSpec,
        ring: Arc<RingBuffer>,
        record_wav: Option<&Path>,
    ) -> Result<Self> {
        if requested.samples_per_second == 0 || requested.samples_per_callback == 0 {
            return Err(SyncError::InvalidConfig(format!(
                "simulated device cannot open with {requested}"
            )));
        }

        let recorder = match record_wav {
            Some(path) => {
                let spec = hound::WavSpec {
                    channels: requested.channels,
                    sample_rate: requested.samples_per_second,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };
                let writer = hound::WavWriter::create(path, spec).map_err(|e| match e {
                    hound::Error::IoError(io) => SyncError::Io(io),
                    other => {
                        SyncError::AudioDevice(format!("wav recorder {}: {other}", path.display()))
                    }
                })?;
                info!(path = %path.display(), "recording simulated output");
                Some(writer)
            }
            None => None,
        };

        let obtained = *requested;
        let playing = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let chunk_len =
            usize::from(requested.samples_per_callback) * usize::from(requested.channels);
        let period = Duration::from_secs_f64(
            f64::from(requested.samples_per_callback) / f64::from(requested.samples_per_second),
        );

        let thread_playing = Arc::clone(&playing);
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("flipsync-sim-device".into())
            .spawn(move || {
                pace(
                    ring,
                    chunk_len,
                    period,
                    thread_playing,
                    thread_shutdown,
                    recorder,
                )
            })
            .map_err(|e| SyncError::AudioDevice(format!("spawn simulated device: {e}")))?;

        info!(%obtained, "simulated audio device opened");

        Ok(Self {
            obtained,
            playing,
            shutdown,
            handle: Some(handle),
        })
    }
}

fn pace(
    ring: Arc<RingBuffer>,
    chunk_len: usize,
    period: Duration,
    playing: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    mut recorder: Option<WavSink>,
) {
    let mut chunk = vec![0i16; chunk_len];
    let mut next = Instant::now();

    while !shutdown.load(Ordering::Acquire) {
        next += period;

        if playing.load(Ordering::Acquire) {
            ring.serve_i16(&mut chunk);
            if let Some(writer) = recorder.as_mut() {
                let written = chunk.iter().try_for_each(|s| writer.write_sample(*s));
                if let Err(e) = written {
                    warn!("wav recording stopped: {e}");
                    recorder = None;
                }
            }
        }

        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else if now - next > period * MAX_CATCH_UP_CHUNKS {
            debug!("simulated device fell behind, restarting its schedule");
            next = now;
        }
    }

    if let Some(writer) = recorder {
        if let Err(e) = writer.finalize() {
            warn!("failed to finalize wav recording: {e}");
        }
    }
}

impl AudioDevice for SimulatedOutput {
    fn obtained(&self) -> AudioSpec {
        self.obtained
    }

    fn resume(&mut self) -> Result<()> {
        self.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }
}

impl Drop for SimulatedOutput {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("simulated device thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_device_does_not_drain() {
        let ring = Arc::new(RingBuffer::new(192_000, 2048).expect("ring"));
        let spec = AudioSpec::stereo_i16(48_000, 256);
        let device = SimulatedOutput::open(&spec, Arc::clone(&ring), None).expect("open");

        thread::sleep(Duration::from_millis(30));
        assert!(!device.is_playing());
        assert_eq!(ring.snapshot().callbacks_served, 0);
    }

    #[test]
    fn resumed_device_drains_whole_chunks() {
        let ring = Arc::new(RingBuffer::new(192_000, 2048).expect("ring"));
        let spec = AudioSpec::stereo_i16(48_000, 256);
        let mut device = SimulatedOutput::open(&spec, Arc::clone(&ring), None).expect("open");

        device.resume().expect("resume");
        thread::sleep(Duration::from_millis(60));
        device.pause().expect("pause");
        drop(device);

        let snap = ring.snapshot();
        assert!(snap.callbacks_served > 0, "expected at least one callback");
        assert_eq!(snap.bytes_played, snap.callbacks_served * 256 * 4);
    }

    #[test]
    fn unwritable_recording_path_is_an_io_error() {
        let ring = Arc::new(RingBuffer::new(192_000, 2048).expect("ring"));
        let spec = AudioSpec::stereo_i16(48_000, 256);
        let path = std::env::temp_dir()
            .join(format!("flipsync-missing-{}", std::process::id()))
            .join("nested")
            .join("out.wav");
        assert!(matches!(
            SimulatedOutput::open(&spec, ring, Some(&path)),
            Err(SyncError::Io(_))
        ));
    }

    #[test]
    fn zero_rate_is_rejected() {
        let ring = Arc::new(RingBuffer::new(1024, 64).expect("ring"));
        let spec = AudioSpec::stereo_i16(0, 256);
        assert!(matches!(
            SimulatedOutput::open(&spec, ring, None),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
