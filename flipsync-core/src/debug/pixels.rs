//! Software framebuffer shared by the game step and the sync visualizer.

use crate::error::{Result, SyncError};

/// 0xAARRGGBB pixels, row-major, no padding between rows.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl PixelBuffer {
    /// # Errors
    /// `SyncError::Allocation` if the pixel storage cannot be reserved.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let len = width as usize * height as usize;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| SyncError::Allocation {
                what: "framebuffer",
                bytes: len * std::mem::size_of::<u32>(),
            })?;
        pixels.resize(len, 0);
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    pub fn clear(&mut self, color: u32) {
        self.pixels.fill(color);
    }

    /// Blue/green gradient scrolled by the given offsets.
    pub fn fill_gradient(&mut self, x_offset: i32, y_offset: i32) {
        let width = self.width as usize;
        if width == 0 {
            return;
        }
        for (y, row) in self.pixels.chunks_exact_mut(width).enumerate() {
            let green = (y as i32).wrapping_add(y_offset) as u8;
            for (x, pixel) in row.iter_mut().enumerate() {
                let blue = (x as i32).wrapping_add(x_offset) as u8;
                *pixel = 0xFF00_0000 | (u32::from(green) << 8) | u32::from(blue);
            }
        }
    }

    /// Draw a one-pixel-wide column covering rows `top..bottom`, clipped to
    /// the buffer.
    pub fn draw_vertical(&mut self, x: i64, top: i64, bottom: i64, color: u32) {
        if x < 0 || x >= i64::from(self.width) {
            return;
        }
        let top = top.max(0);
        let bottom = bottom.min(i64::from(self.height));
        for y in top..bottom {
            let index = y as usize * self.width as usize + x as usize;
            self.pixels[index] = color;
        }
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertical_line_is_clipped() {
        let mut buf = PixelBuffer::new(8, 4).expect("pixels");
        buf.draw_vertical(3, -2, 10, 0xFFFF_FFFF);
        for y in 0..4 {
            assert_eq!(buf.pixel(3, y), Some(0xFFFF_FFFF));
            assert_eq!(buf.pixel(2, y), Some(0));
        }

        buf.draw_vertical(8, 0, 4, 0xFF00_0000);
        buf.draw_vertical(-1, 0, 4, 0xFF00_0000);
        assert!(buf.pixels().iter().all(|p| *p == 0 || *p == 0xFFFF_FFFF));
    }

    #[test]
    fn gradient_encodes_offsets() {
        let mut buf = PixelBuffer::new(4, 4).expect("pixels");
        buf.fill_gradient(10, 20);
        assert_eq!(buf.pixel(0, 0), Some(0xFF00_0000 | (20 << 8) | 10));
        assert_eq!(buf.pixel(3, 2), Some(0xFF00_0000 | (22 << 8) | 13));
    }

    #[test]
    fn out_of_range_pixel_is_none() {
        let buf = PixelBuffer::new(2, 2).expect("pixels");
        assert_eq!(buf.pixel(2, 0), None);
        assert_eq!(buf.pixel(0, 2), None);
    }
}
