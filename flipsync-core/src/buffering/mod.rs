//! Circular byte storage shared between the frame loop and the hardware callback.
//!
//! Both sides of the ring deal in byte offsets. Any run of bytes that starts
//! near the end of the buffer is split exactly once at the wrap point, which
//! is what [`split_span`] computes for the callback and the fill path alike.

pub mod ring;

use std::ops::Range;

pub use ring::{CursorSnapshot, RingBuffer};

/// Split `len` bytes starting at `start` in a ring of `size` bytes into the
/// part before the wrap point and the part after it.
///
/// The second range is empty unless the run crosses the end of the buffer.
/// `len` is expected to be at most `size`.
pub fn split_span(start: u32, len: u32, size: u32) -> (Range<u32>, Range<u32>) {
    debug_assert!(start < size, "start {start} outside ring of {size} bytes");
    debug_assert!(len <= size, "span of {len} bytes longer than ring of {size}");
    let first = len.min(size - start);
    let second = len - first;
    (start..start + first, 0..second)
}
