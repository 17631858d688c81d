//! Fixed-size audio ring and the hardware-side drain.
//!
//! # Design constraints
//!
//! [`RingBuffer::serve`] runs on the audio driver's thread whenever the device
//! needs another chunk. It holds the cursor lock only for its own copy and
//! never waits on the frame loop: the frame loop takes the same lock just long
//! enough to snapshot cursors, and writes sample bytes without holding it.
//!
//! Sample storage is a slice of `AtomicU8` so the two sides can touch the same
//! bytes concurrently without `unsafe`. Relaxed loads and stores compile to
//! plain moves on every target we care about.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::split_span;
use crate::error::{Result, SyncError};

/// Cursor state owned by the hardware callback.
#[derive(Debug, Default)]
struct Cursors {
    /// Offset of the next byte the device will consume.
    play: u32,
    /// `play` plus one hardware chunk. Not application write progress.
    write: u32,
    /// Total bytes drained since creation. Never wraps in practice.
    bytes_played: u64,
    /// Number of callback invocations served.
    callbacks: u64,
}

/// A consistent copy of the cursors taken under the lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub play_cursor: u32,
    pub write_cursor: u32,
    pub bytes_played: u64,
    pub callbacks_served: u64,
}

/// Byte-addressed circular buffer holding interleaved stereo i16 PCM.
///
/// Created zeroed, so a device started before the first fill plays silence.
/// Never resized after creation.
pub struct RingBuffer {
    data: Box<[AtomicU8]>,
    cursors: Mutex<Cursors>,
    /// Raised by every callback; cleared by the producer side.
    fill_needed: AtomicBool,
    hardware_buffer_bytes: u32,
}

impl RingBuffer {
    /// Allocate a zeroed ring of `size_bytes`.
    ///
    /// # Errors
    /// `SyncError::InvalidConfig` for a zero size, `SyncError::Allocation`
    /// when the storage cannot be reserved.
    pub fn new(size_bytes: u32, hardware_buffer_bytes: u32) -> Result<Self> {
        if size_bytes == 0 {
            return Err(SyncError::InvalidConfig(
                "ring buffer size must be non-zero".into(),
            ));
        }

        let len = size_bytes as usize;
        let mut data: Vec<AtomicU8> = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| SyncError::Allocation {
                what: "ring buffer",
                bytes: len,
            })?;
        data.extend((0..len).map(|_| AtomicU8::new(0)));

        debug!(size_bytes, hardware_buffer_bytes, "ring buffer allocated");

        Ok(Self {
            data: data.into_boxed_slice(),
            cursors: Mutex::new(Cursors {
                write: hardware_buffer_bytes % size_bytes,
                ..Cursors::default()
            }),
            fill_needed: AtomicBool::new(true),
            hardware_buffer_bytes,
        })
    }

    pub fn size_bytes(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn hardware_buffer_bytes(&self) -> u32 {
        self.hardware_buffer_bytes
    }

    /// Snapshot the cursors. The lock is held only for the copy.
    pub fn snapshot(&self) -> CursorSnapshot {
        let cursors = self.cursors.lock();
        CursorSnapshot {
            play_cursor: cursors.play,
            write_cursor: cursors.write,
            bytes_played: cursors.bytes_played,
            callbacks_served: cursors.callbacks,
        }
    }

    /// Hardware callback: copy `out.len()` bytes starting at the play cursor,
    /// wrapping at the end of the ring, then advance the cursors.
    pub fn serve(&self, out: &mut [u8]) {
        self.drain(out.len(), |i, byte| out[i] = byte);
    }

    /// Same as [`serve`](Self::serve) for devices that take i16 sample slices.
    /// Consumes `2 * out.len()` bytes, decoded little-endian.
    pub fn serve_i16(&self, out: &mut [i16]) {
        self.drain(out.len() * 2, |i, byte| {
            let sample = &mut out[i / 2];
            let bits = *sample as u16;
            let bits = if i % 2 == 0 {
                (bits & 0xff00) | u16::from(byte)
            } else {
                (bits & 0x00ff) | (u16::from(byte) << 8)
            };
            *sample = bits as i16;
        });
    }

    fn drain(&self, len: usize, mut sink: impl FnMut(usize, u8)) {
        let size = self.data.len();
        let mut cursors = self.cursors.lock();
        let mut pos = cursors.play;
        let mut done = 0usize;

        while done < len {
            let chunk = (len - done).min(size);
            let (first, second) = split_span(pos, chunk as u32, size as u32);
            for offset in first.chain(second) {
                sink(done, self.data[offset as usize].load(Ordering::Relaxed));
                done += 1;
            }
            pos = ((pos as usize + chunk) % size) as u32;
        }

        cursors.play = pos;
        cursors.write = ((pos as u64 + self.hardware_buffer_bytes as u64) % size as u64) as u32;
        cursors.bytes_played += len as u64;
        cursors.callbacks += 1;
        drop(cursors);

        self.fill_needed.store(true, Ordering::Release);
        trace!(bytes = len, play_cursor = pos, "served hardware chunk");
    }

    /// Copy PCM samples into the ring at `offset`, little-endian, wrapping
    /// at the end. Does not touch the cursors.
    pub fn write_samples(&self, offset: u32, samples: &[i16]) {
        let size = self.data.len();
        let mut pos = offset as usize % size;
        for byte in samples.iter().flat_map(|s| s.to_le_bytes()) {
            self.data[pos].store(byte, Ordering::Relaxed);
            pos += 1;
            if pos == size {
                pos = 0;
            }
        }
    }

    /// Copy raw bytes into the ring at `offset`, wrapping at the end.
    pub fn write_bytes(&self, offset: u32, bytes: &[u8]) {
        let size = self.data.len();
        let mut pos = offset as usize % size;
        for &byte in bytes {
            self.data[pos].store(byte, Ordering::Relaxed);
            pos += 1;
            if pos == size {
                pos = 0;
            }
        }
    }

    /// Read raw bytes at `offset` without moving any cursor.
    pub fn read(&self, offset: u32, out: &mut [u8]) {
        let size = self.data.len();
        let mut pos = offset as usize % size;
        for byte in out.iter_mut() {
            *byte = self.data[pos].load(Ordering::Relaxed);
            pos += 1;
            if pos == size {
                pos = 0;
            }
        }
    }

    /// Returns whether a callback ran since the last call, clearing the flag.
    pub fn take_fill_needed(&self) -> bool {
        self.fill_needed.swap(false, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("size_bytes", &self.data.len())
            .field("hardware_buffer_bytes", &self.hardware_buffer_bytes)
            .field("cursors", &self.snapshot())
            .finish()
    }
}
