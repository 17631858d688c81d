//! Cursor history and its on-screen rendering.
//!
//! Each frame produces one [`SyncMarker`]: the cursors seen when the fill was
//! planned, where the fill went, and the cursors seen right after the flip.
//! The visualizer draws the ring across the framebuffer width and places a
//! bar for every recorded cursor, so drift between the audio and frame clocks
//! shows up as bars sliding across the screen.

use ringbuf::{
    traits::{Consumer, Observer, RingBuffer as _},
    HeapRb,
};
use serde::Serialize;

use super::pixels::PixelBuffer;
use crate::{buffering::CursorSnapshot, sync::FillPlan};

const PAD_X: i64 = 16;
const PAD_Y: i64 = 16;
const LINE_HEIGHT: i64 = 64;

pub const PLAY_COLOR: u32 = 0xFFFF_FFFF;
pub const WRITE_COLOR: u32 = 0xFFFF_0000;
pub const EXPECTED_FLIP_COLOR: u32 = 0xFFFF_FF00;
pub const PLAY_WINDOW_COLOR: u32 = 0xFFFF_00FF;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMarker {
    pub output_play_cursor: u32,
    pub output_write_cursor: u32,
    pub output_location: u32,
    pub output_byte_count: u32,
    pub expected_flip_play_cursor: u32,
    pub flip_play_cursor: u32,
    pub flip_write_cursor: u32,
}

/// Fixed-capacity history of completed markers plus the one being built.
pub struct MarkerHistory {
    completed: HeapRb<SyncMarker>,
    current: SyncMarker,
}

impl MarkerHistory {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            completed: HeapRb::new(capacity.max(1)),
            current: SyncMarker::default(),
        }
    }

    /// Record where this frame's audio went.
    pub fn record_output(&mut self, plan: &FillPlan, bytes_per_sample: u32) {
        self.current.output_play_cursor = plan.play_cursor;
        self.current.output_write_cursor = plan.write_cursor;
        self.current.output_location = plan.wanted_write_byte;
        self.current.output_byte_count = plan.request.total_samples() * bytes_per_sample;
        self.current.expected_flip_play_cursor = plan.expected_frame_boundary_byte;
    }

    /// Close the current marker with the cursors seen at flip time.
    pub fn record_flip(&mut self, cursors: &CursorSnapshot) {
        self.current.flip_play_cursor = cursors.play_cursor;
        self.current.flip_write_cursor = cursors.write_cursor;
        self.completed.push_overwrite(self.current);
        self.current = SyncMarker::default();
    }

    pub fn current(&self) -> &SyncMarker {
        &self.current
    }

    /// Completed markers, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SyncMarker> {
        self.completed.iter()
    }

    pub fn latest(&self) -> Option<&SyncMarker> {
        self.completed.iter().last()
    }

    pub fn len(&self) -> usize {
        self.completed.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }
}

/// Draws a [`MarkerHistory`] into a [`PixelBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct DebugSyncVisualizer {
    ring_size_bytes: u32,
    /// Width of the band after the flip play cursor the device reads next.
    play_window_bytes: u32,
}

impl DebugSyncVisualizer {
    pub fn new(ring_size_bytes: u32, play_window_bytes: u32) -> Self {
        Self {
            ring_size_bytes: ring_size_bytes.max(1),
            play_window_bytes,
        }
    }

    fn column(&self, pixels: &PixelBuffer, byte: u32) -> i64 {
        let span = (i64::from(pixels.width()) - 2 * PAD_X).max(0) as f64;
        let scale = span / f64::from(self.ring_size_bytes);
        PAD_X + (scale * f64::from(byte)) as i64
    }

    fn bar(&self, pixels: &mut PixelBuffer, byte: u32, top: i64, bottom: i64, color: u32) {
        let x = self.column(pixels, byte);
        pixels.draw_vertical(x, top, bottom, color);
    }

    /// Row 0 holds the flip cursors of every completed marker. The newest
    /// marker also gets three detail rows: output cursors, output region,
    /// and the projected flip position.
    pub fn draw(&self, history: &MarkerHistory, pixels: &mut PixelBuffer) {
        let top = PAD_Y;
        let bottom = top + LINE_HEIGHT;

        for marker in history.iter() {
            self.bar(pixels, marker.flip_play_cursor, top, bottom, PLAY_COLOR);
            let window_end = (marker.flip_play_cursor + self.play_window_bytes) % self.ring_size_bytes;
            self.bar(pixels, window_end, top, bottom, PLAY_WINDOW_COLOR);
            self.bar(pixels, marker.flip_write_cursor, top, bottom, WRITE_COLOR);
        }

        let Some(latest) = history.latest() else {
            return;
        };

        let row = |n: i64| {
            let t = PAD_Y + n * (LINE_HEIGHT + PAD_Y);
            (t, t + LINE_HEIGHT)
        };

        let (t, b) = row(1);
        self.bar(pixels, latest.output_play_cursor, t, b, PLAY_COLOR);
        self.bar(pixels, latest.output_write_cursor, t, b, WRITE_COLOR);

        let (t, b) = row(2);
        let end = (latest.output_location + latest.output_byte_count) % self.ring_size_bytes;
        self.bar(pixels, latest.output_location, t, b, PLAY_COLOR);
        self.bar(pixels, end, t, b, WRITE_COLOR);

        // Projected flip spans all three detail rows.
        let (first_top, _) = row(1);
        let (_, last_bottom) = row(3);
        self.bar(
            pixels,
            latest.expected_flip_play_cursor,
            first_top,
            last_bottom,
            EXPECTED_FLIP_COLOR,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::FillRequest;

    fn plan(play: u32, wanted: u32, samples: u32, boundary: u32) -> FillPlan {
        FillPlan {
            play_cursor: play,
            write_cursor: play + 64,
            wanted_write_byte: wanted,
            expected_bytes_until_flip: boundary - play,
            expected_frame_boundary_byte: boundary,
            target_cursor_byte: wanted + samples * 4,
            audio_card_is_latent: false,
            gap_bytes: samples * 4,
            request: FillRequest {
                region1_start: wanted,
                region1_samples: samples,
                region2_start: 0,
                region2_samples: 0,
            },
        }
    }

    fn flip(play: u32) -> CursorSnapshot {
        CursorSnapshot {
            play_cursor: play,
            write_cursor: play + 64,
            bytes_played: u64::from(play),
            callbacks_served: 1,
        }
    }

    #[test]
    fn history_keeps_only_the_newest_markers() {
        let mut history = MarkerHistory::new(3);
        for frame in 0..5u32 {
            history.record_output(&plan(frame * 100, frame * 100 + 40, 10, frame * 100 + 50), 4);
            history.record_flip(&flip(frame * 100 + 30));
        }

        assert_eq!(history.len(), 3);
        let flips: Vec<u32> = history.iter().map(|m| m.flip_play_cursor).collect();
        assert_eq!(flips, vec![230, 330, 430]);
        assert_eq!(history.latest().map(|m| m.output_byte_count), Some(40));
        assert_eq!(history.current(), &SyncMarker::default());
    }

    #[test]
    fn zero_capacity_still_keeps_one_marker() {
        let mut history = MarkerHistory::new(0);
        assert!(history.is_empty());
        history.record_flip(&flip(8));
        history.record_flip(&flip(12));
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().map(|m| m.flip_play_cursor), Some(12));
    }

    #[test]
    fn bars_land_at_scaled_columns() {
        // 1032 px wide leaves exactly 1000 px for a 1000-byte ring.
        let mut pixels = PixelBuffer::new(1032, 400).expect("pixels");
        let visualizer = DebugSyncVisualizer::new(1000, 100);
        let mut history = MarkerHistory::new(4);
        history.record_output(&plan(100, 300, 50, 250), 4);
        history.record_flip(&flip(400));

        visualizer.draw(&history, &mut pixels);

        let row0 = (PAD_Y + 1) as u32;
        assert_eq!(pixels.pixel(16 + 400, row0), Some(PLAY_COLOR));
        assert_eq!(pixels.pixel(16 + 500, row0), Some(PLAY_WINDOW_COLOR));
        assert_eq!(pixels.pixel(16 + 464, row0), Some(WRITE_COLOR));

        let row2 = (PAD_Y + 2 * (LINE_HEIGHT + PAD_Y) + 1) as u32;
        assert_eq!(pixels.pixel(16 + 300, row2), Some(PLAY_COLOR));
        assert_eq!(pixels.pixel(16 + 500, row2), Some(WRITE_COLOR));

        let row1 = (PAD_Y + LINE_HEIGHT + PAD_Y + 1) as u32;
        assert_eq!(pixels.pixel(16 + 250, row1), Some(EXPECTED_FLIP_COLOR));
    }

    #[test]
    fn empty_history_draws_nothing() {
        let mut pixels = PixelBuffer::new(64, 64).expect("pixels");
        DebugSyncVisualizer::new(1000, 100).draw(&MarkerHistory::new(2), &mut pixels);
        assert!(pixels.pixels().iter().all(|p| *p == 0));
    }
}
