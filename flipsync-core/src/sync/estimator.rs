//! Per-frame decision of which bytes of the ring to write.
//!
//! ## Algorithm
//!
//! ```text
//! wanted    = (running_sample_index * bytes_per_sample) mod size
//! boundary  = play + expected_bytes_until_flip
//! safe_wc   = write (unwrapped to be >= play) + safety
//! latent    = safe_wc >= boundary
//! target    = latent ? play + frame_bytes + safety
//!                    : boundary + frame_bytes          (mod size)
//! gap       = wanted > target ? (size - wanted) + target : target - wanted
//! ```
//!
//! `gap` is split at the end of the ring into at most two regions and
//! converted to sample counts.
//!
//! Two guards sit on top of the formula. Both use the linear producer lead
//! (`samples produced * bytes_per_sample - bytes played`):
//! - a lead of zero or less once playback has started means the hardware has
//!   caught up with the producer, and the frame is reported as starved
//!   instead of computing a fill;
//! - a lead already past the target yields an empty fill, so the producer
//!   never laps the play cursor.

use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use crate::buffering::{split_span, CursorSnapshot};
use crate::error::{Result, SyncError};

/// Fixed geometry and slack used by every plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncParams {
    pub size_bytes: u32,
    pub bytes_per_sample: u32,
    pub expected_sound_bytes_per_frame: u32,
    pub safety_bytes: u32,
}

/// Contiguous run(s) to fill, split once if the run crosses the ring end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillRequest {
    pub region1_start: u32,
    pub region1_samples: u32,
    /// Always the start of the ring; only meaningful when `region2_samples > 0`.
    pub region2_start: u32,
    pub region2_samples: u32,
}

impl FillRequest {
    /// Split `gap_bytes` starting at `wanted_write_byte`.
    pub fn new(wanted_write_byte: u32, gap_bytes: u32, size_bytes: u32, bytes_per_sample: u32) -> Self {
        let (first, second) = split_span(wanted_write_byte, gap_bytes, size_bytes);
        Self {
            region1_start: first.start,
            region1_samples: first.len() as u32 / bytes_per_sample,
            region2_start: second.start,
            region2_samples: second.len() as u32 / bytes_per_sample,
        }
    }

    pub fn total_samples(&self) -> u32 {
        self.region1_samples + self.region2_samples
    }

    pub fn is_empty(&self) -> bool {
        self.total_samples() == 0
    }

    pub fn wraps(&self) -> bool {
        self.region2_samples > 0
    }
}

/// Everything computed for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillPlan {
    pub play_cursor: u32,
    pub write_cursor: u32,
    pub wanted_write_byte: u32,
    pub expected_bytes_until_flip: u32,
    pub expected_frame_boundary_byte: u32,
    pub target_cursor_byte: u32,
    pub audio_card_is_latent: bool,
    pub gap_bytes: u32,
    pub request: FillRequest,
}

/// The hardware has consumed everything the producer wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Starvation {
    pub play_cursor: u32,
    pub write_cursor: u32,
    pub wanted_write_byte: u32,
    /// How far the play position is past the producer, in bytes.
    pub lag_bytes: u64,
    /// Sample index that puts the producer back at the write cursor.
    pub resync_sample_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Fill(FillPlan),
    Starved(Starvation),
}

/// Byte gap from `wanted` forward to `target` in a ring of `size` bytes.
pub fn fill_gap(wanted: u32, target: u32, size: u32) -> u32 {
    if wanted > target {
        (size - wanted) + target
    } else {
        target - wanted
    }
}

fn align_down(bytes: u32, bytes_per_sample: u32) -> u32 {
    bytes - bytes % bytes_per_sample
}

#[derive(Debug, Clone)]
pub struct LatencyEstimator {
    params: SyncParams,
}

impl LatencyEstimator {
    /// # Errors
    /// `SyncError::InvalidConfig` unless the ring holds a whole number of
    /// samples and the furthest possible target stays inside one lap.
    pub fn new(params: SyncParams) -> Result<Self> {
        let SyncParams {
            size_bytes,
            bytes_per_sample,
            expected_sound_bytes_per_frame,
            safety_bytes,
        } = params;

        if bytes_per_sample == 0 || size_bytes == 0 || size_bytes % bytes_per_sample != 0 {
            return Err(SyncError::InvalidConfig(format!(
                "ring of {size_bytes} bytes cannot hold whole {bytes_per_sample}-byte samples"
            )));
        }
        if expected_sound_bytes_per_frame == 0 {
            return Err(SyncError::InvalidConfig(
                "a frame must produce at least one sample".into(),
            ));
        }
        let furthest = 2 * u64::from(expected_sound_bytes_per_frame) + u64::from(safety_bytes);
        if furthest >= u64::from(size_bytes) {
            return Err(SyncError::InvalidConfig(format!(
                "two frames plus safety ({furthest} bytes) do not fit in a {size_bytes}-byte ring"
            )));
        }

        Ok(Self {
            params: SyncParams {
                expected_sound_bytes_per_frame: align_down(
                    expected_sound_bytes_per_frame,
                    bytes_per_sample,
                ),
                safety_bytes: align_down(safety_bytes, bytes_per_sample),
                ..params
            },
        })
    }

    pub fn params(&self) -> &SyncParams {
        &self.params
    }

    /// Ring offset of the producer's next unwritten sample.
    pub fn wanted_write_byte(&self, running_sample_index: u64) -> u32 {
        let produced = running_sample_index * u64::from(self.params.bytes_per_sample);
        (produced % u64::from(self.params.size_bytes)) as u32
    }

    /// Bytes the hardware is expected to play before the next flip, given how
    /// long ago the last flip happened. Clamped to one frame and aligned to
    /// whole samples.
    pub fn expected_bytes_until_flip(&self, since_flip: Duration, target_frame: Duration) -> u32 {
        if target_frame.is_zero() {
            return 0;
        }
        let left = target_frame.saturating_sub(since_flip);
        let fraction = left.as_secs_f64() / target_frame.as_secs_f64();
        let bytes = (fraction * f64::from(self.params.expected_sound_bytes_per_frame)) as u32;
        align_down(
            bytes.min(self.params.expected_sound_bytes_per_frame),
            self.params.bytes_per_sample,
        )
    }

    /// Whether the driver buffers so far ahead that the write cursor plus
    /// safety already reaches the projected flip position.
    pub fn is_latent(&self, cursors: &CursorSnapshot, expected_bytes_until_flip: u32) -> bool {
        let size = u64::from(self.params.size_bytes);
        let play = u64::from(cursors.play_cursor);
        let mut safe_write_cursor = u64::from(cursors.write_cursor);
        if safe_write_cursor < play {
            safe_write_cursor += size;
        }
        safe_write_cursor += u64::from(self.params.safety_bytes);

        let expected_frame_boundary_byte = play + u64::from(expected_bytes_until_flip);
        safe_write_cursor >= expected_frame_boundary_byte
    }

    /// Sample index that restarts production at the hardware write cursor.
    pub fn resync_sample_index(&self, cursors: &CursorSnapshot) -> u64 {
        let size = u64::from(self.params.size_bytes);
        let ahead = (u64::from(cursors.write_cursor) + size - u64::from(cursors.play_cursor)) % size;
        let bps = u64::from(self.params.bytes_per_sample);
        (cursors.bytes_played + ahead).div_ceil(bps)
    }

    /// Compute this frame's fill from a cursor snapshot.
    pub fn plan(
        &self,
        cursors: &CursorSnapshot,
        running_sample_index: u64,
        expected_bytes_until_flip: u32,
    ) -> FillOutcome {
        let SyncParams {
            size_bytes,
            bytes_per_sample,
            expected_sound_bytes_per_frame,
            safety_bytes,
        } = self.params;
        let size = u64::from(size_bytes);
        let play = u64::from(cursors.play_cursor);

        let produced = running_sample_index * u64::from(bytes_per_sample);
        let wanted_write_byte = self.wanted_write_byte(running_sample_index);
        let started = produced > 0 || cursors.bytes_played > 0;

        let lead = if started {
            if produced <= cursors.bytes_played {
                return FillOutcome::Starved(Starvation {
                    play_cursor: cursors.play_cursor,
                    write_cursor: cursors.write_cursor,
                    wanted_write_byte,
                    lag_bytes: cursors.bytes_played - produced,
                    resync_sample_index: self.resync_sample_index(cursors),
                });
            }
            produced - cursors.bytes_played
        } else {
            0
        };

        let expected_bytes_until_flip = align_down(
            expected_bytes_until_flip.min(expected_sound_bytes_per_frame),
            bytes_per_sample,
        );
        let audio_card_is_latent = self.is_latent(cursors, expected_bytes_until_flip);

        let boundary = play + u64::from(expected_bytes_until_flip);
        let target = if audio_card_is_latent {
            play + u64::from(expected_sound_bytes_per_frame) + u64::from(safety_bytes)
        } else {
            boundary + u64::from(expected_sound_bytes_per_frame)
        };
        let target_cursor_byte = (target % size) as u32;
        let target_ahead = target - play;

        let gap_bytes = if lead >= target_ahead {
            0
        } else {
            let gap = fill_gap(wanted_write_byte, target_cursor_byte, size_bytes);
            debug_assert_eq!(u64::from(gap), target_ahead - lead);
            align_down(gap, bytes_per_sample)
        };

        let request = FillRequest::new(wanted_write_byte, gap_bytes, size_bytes, bytes_per_sample);

        trace!(
            play_cursor = cursors.play_cursor,
            write_cursor = cursors.write_cursor,
            wanted_write_byte,
            target_cursor_byte,
            gap_bytes,
            audio_card_is_latent,
            "fill planned"
        );

        FillOutcome::Fill(FillPlan {
            play_cursor: cursors.play_cursor,
            write_cursor: cursors.write_cursor,
            wanted_write_byte,
            expected_bytes_until_flip,
            expected_frame_boundary_byte: (boundary % size) as u32,
            target_cursor_byte,
            audio_card_is_latent,
            gap_bytes,
            request,
        })
    }
}
