//! Binary segmentation masks

use crate::error::{MedsegError, Result};

/// Single-channel mask holding 0 or 1 per pixel, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BinaryMask {
    /// All-zero mask of the given dimensions
    #[must_use]
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    /// Build a mask from raw row-major values; any non-zero value becomes 1
    ///
    /// # Errors
    /// `data.len()` differs from `width * height`
    pub fn from_vec(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(MedsegError::segmentation(format!(
                "Mask data has {} values, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        let data = data.into_iter().map(|v| u8::from(v != 0)).collect();
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_fn<F: Fn(u32, u32) -> bool>(width: u32, height: u32, f: F) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(u8::from(f(x, y)));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Mask value at (x, y); out-of-bounds reads are background
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .is_some_and(|&v| v != 0)
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        if let Some(v) = self
            .data
            .get_mut(y as usize * self.width as usize + x as usize)
        {
            *v = u8::from(value);
        }
    }

    /// Set every pixel of the inclusive-exclusive rectangle `[x1, x2) x [y1, y2)`
    pub fn fill_rect(&mut self, x1: u32, y1: u32, x2: u32, y2: u32) {
        for y in y1..y2.min(self.height) {
            for x in x1..x2.min(self.width) {
                self.set(x, y, true);
            }
        }
    }

    /// Number of foreground pixels
    #[must_use]
    pub fn foreground_pixels(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    #[must_use]
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0)
    }

    /// In-place pixel-wise logical OR
    ///
    /// # Errors
    /// The two masks have different dimensions
    pub fn union_with(&mut self, other: &BinaryMask) -> Result<()> {
        if self.dimensions() != other.dimensions() {
            return Err(MedsegError::segmentation(format!(
                "Cannot combine {}x{} mask with {}x{} mask",
                other.width, other.height, self.width, self.height
            )));
        }
        for (dst, src) in self.data.iter_mut().zip(&other.data) {
            *dst |= *src;
        }
        Ok(())
    }

    /// Nearest-neighbour resize; returns an unchanged copy when the
    /// dimensions already match
    ///
    /// Source coordinates are `floor(dst * src_len / dst_len)`, the same
    /// sampling grid as OpenCV's `INTER_NEAREST`. No smoothing is applied, so
    /// the result stays binary.
    #[must_use]
    pub fn resize_nearest(&self, width: u32, height: u32) -> BinaryMask {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 {
            return BinaryMask::zeros(width, height);
        }

        let src_w = u64::from(self.width);
        let src_h = u64::from(self.height);
        let dst_w = u64::from(width);
        let dst_h = u64::from(height);

        BinaryMask::from_fn(width, height, |x, y| {
            let sx = ((u64::from(x) * src_w) / dst_w).min(src_w - 1) as u32;
            let sy = ((u64::from(y) * src_h) / dst_h).min(src_h - 1) as u32;
            self.get(sx, sy)
        })
    }
}
