//! Output stream via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It must not allocate, perform I/O, or wait on the frame loop. The callback
//! here only calls [`RingBuffer::serve_i16`], which copies out of the ring and
//! holds the cursor lock for no longer than that copy.
//!
//! Only interleaved stereo i16 is accepted. A device that cannot open in that
//! format is reported as [`SyncError::FormatMismatch`] so the engine can fall
//! back to running without sound.

use std::sync::Arc;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, SampleRate, Stream, StreamConfig, SupportedBufferSize,
};
#[cfg(feature = "audio-cpal")]
use tracing::{debug, error, info};

use super::{AudioDevice, AudioSpec, PcmFormat};
use crate::{
    buffering::RingBuffer,
    error::{Result, SyncError},
};

#[cfg(feature = "audio-cpal")]
impl From<cpal::SampleFormat> for PcmFormat {
    fn from(format: cpal::SampleFormat) -> Self {
        match format {
            cpal::SampleFormat::I16 => PcmFormat::S16Le,
            cpal::SampleFormat::U16 => PcmFormat::U16,
            cpal::SampleFormat::F32 => PcmFormat::F32,
            _ => PcmFormat::Other,
        }
    }
}

/// Handle to an open cpal output stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct CpalOutput {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    stream: Stream,
    obtained: AudioSpec,
    playing: bool,
}

#[cfg(feature = "audio-cpal")]
impl CpalOutput {
    /// Open the system default output device in the requested format.
    ///
    /// The stream is built paused. Call [`AudioDevice::resume`] to start it.
    ///
    /// # Errors
    /// - `SyncError::NoDefaultOutputDevice` when there is no output device.
    /// - `SyncError::FormatMismatch` when the device cannot do stereo i16 at
    ///   the requested rate.
    /// - `SyncError::AudioDevice` / `SyncError::AudioStream` for cpal failures.
    pub fn open(requested: &AudioSpec, ring: Arc<RingBuffer>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(SyncError::NoDefaultOutputDevice)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let rate = requested.samples_per_second;
        let matching = device
            .supported_output_configs()
            .map_err(|e| SyncError::AudioDevice(e.to_string()))?
            .find(|range| {
                range.channels() == requested.channels
                    && PcmFormat::from(range.sample_format()) == requested.format
                    && range.min_sample_rate().0 <= rate
                    && rate <= range.max_sample_rate().0
            });

        let Some(range) = matching else {
            let fallback = device
                .default_output_config()
                .map_err(|e| SyncError::AudioDevice(e.to_string()))?;
            return Err(SyncError::FormatMismatch {
                requested: *requested,
                obtained: AudioSpec {
                    samples_per_second: fallback.sample_rate().0,
                    channels: fallback.channels(),
                    format: fallback.sample_format().into(),
                    samples_per_callback: requested.samples_per_callback,
                },
            });
        };

        let wanted_frames = u32::from(requested.samples_per_callback);
        let buffer_size = match range.buffer_size() {
            SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&wanted_frames) => {
                BufferSize::Fixed(wanted_frames)
            }
            _ => {
                debug!(
                    wanted_frames,
                    "callback size hint not supported, using device default"
                );
                BufferSize::Default
            }
        };

        let config = StreamConfig {
            channels: requested.channels,
            sample_rate: SampleRate(rate),
            buffer_size,
        };

        let obtained = AudioSpec {
            samples_per_second: rate,
            channels: config.channels,
            format: PcmFormat::S16Le,
            samples_per_callback: match config.buffer_size {
                BufferSize::Fixed(frames) => frames as u16,
                BufferSize::Default => requested.samples_per_callback,
            },
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    ring.serve_i16(data);
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| SyncError::AudioStream(e.to_string()))?;

        // Some hosts start streams on creation.
        if let Err(e) = stream.pause() {
            debug!("stream could not be paused after build: {e}");
        }

        info!(%obtained, "audio device opened");

        Ok(Self {
            stream,
            obtained,
            playing: false,
        })
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioDevice for CpalOutput {
    fn obtained(&self) -> AudioSpec {
        self.obtained
    }

    fn resume(&mut self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| SyncError::AudioStream(e.to_string()))?;
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| SyncError::AudioStream(e.to_string()))?;
        self.playing = false;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl CpalOutput {
    pub fn open(_requested: &AudioSpec, _ring: Arc<RingBuffer>) -> Result<Self> {
        Err(SyncError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioDevice for CpalOutput {
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

#[cfg(all(test, feature = "audio-cpal"))]
mod tests {
    use super::*;

    #[test]
    fn cpal_formats_map_onto_pcm_formats() {
        assert_eq!(PcmFormat::from(cpal::SampleFormat::I16), PcmFormat::S16Le);
        assert_eq!(PcmFormat::from(cpal::SampleFormat::F32), PcmFormat::F32);
        assert_eq!(PcmFormat::from(cpal::SampleFormat::U16), PcmFormat::U16);
        assert_eq!(PcmFormat::from(cpal::SampleFormat::I32), PcmFormat::Other);
    }
}
