use crate::error::{Error, Result};

/// Row-major, top-to-bottom floating point samples with 1 or 3 interleaved channels.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelRaster {
    width: usize,
    height: usize,
    channels: usize,
    samples: Vec<f32>,
}

impl PixelRaster {
    fn with_extent(width: usize, height: usize, channels: usize) -> Self {
        let samples = vec![0.0; width * height * channels];
        Self { width, height, channels, samples }
    }

    pub fn from_samples(width: usize, height: usize, channels: usize, samples: Vec<f32>) -> Result<Self> {
        if !matches!(channels, 1 | 3) {
            return Err(Error::internal(format!("unsupported channel count {}", channels)));
        }
        if samples.len() != width * height * channels {
            return Err(Error::internal(format!(
                "{} samples do not fill a {}x{}x{} raster", samples.len(), width, height, channels,
            )));
        }
        Ok(Self { width, height, channels, samples })
    }

    /// A raster of identical pixels.
    #[cfg(test)]
    pub(crate) fn filled(width: usize, height: usize, pixel: &[f32]) -> Self {
        let samples = pixel.iter().copied().cycle().take(width * height * pixel.len()).collect();
        Self { width, height, channels: pixel.len(), samples }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn extent(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let index = (y * self.width + x) * self.channels;
        &self.samples[index..index + self.channels]
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, pixel: &[f32]) {
        let index = (y * self.width + x) * self.channels;
        self.samples[index..index + self.channels].copy_from_slice(pixel);
    }

    /// RGB value at the given coordinates. Panics if the raster is not 3-channel.
    #[inline]
    pub fn rgb(&self, x: usize, y: usize) -> [f32; 3] {
        let p = self.pixel(x, y);
        [p[0], p[1], p[2]]
    }

    /// Iterates over pixels as channel slices, row by row.
    pub fn pixels(&self) -> impl Iterator<Item = &[f32]> {
        self.samples.chunks_exact(self.channels)
    }

    /// Builds a 3-channel raster by mapping every RGB pixel of this one.
    pub fn map_rgb(&self, mut f: impl FnMut([f32; 3]) -> [f32; 3]) -> Self {
        debug_assert_eq!(self.channels, 3);
        let samples = self.samples
            .chunks_exact(3)
            .flat_map(|p| f([p[0], p[1], p[2]]))
            .collect();
        Self { width: self.width, height: self.height, channels: 3, samples }
    }

    /// Resamples to the given extent with bilinear filtering, pixel-centre alignment and clamp addressing.
    pub fn resize_bilinear(&self, dst_width: usize, dst_height: usize) -> Self {
        if (dst_width, dst_height) == self.extent() {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 {
            return Self::with_extent(dst_width, dst_height, self.channels);
        }

        fn lerp(a: f32, b: f32, t: f32) -> f32 {
            a + (b - a) * t
        }

        let scale_x = self.width as f32 / dst_width.max(1) as f32;
        let scale_y = self.height as f32 / dst_height.max(1) as f32;

        let source_coordinate = |dst: usize, scale: f32, src_len: usize| -> (usize, usize, f32) {
            let max = (src_len - 1) as f32;
            let src = ((dst as f32 + 0.5) * scale - 0.5).clamp(0.0, max);
            let i0 = src.floor() as usize;
            let i1 = (i0 + 1).min(src_len - 1);
            (i0, i1, src - i0 as f32)
        };

        let columns: Vec<_> = (0..dst_width).map(|x| source_coordinate(x, scale_x, self.width)).collect();

        let mut dst = Self::with_extent(dst_width, dst_height, self.channels);
        let mut pixel = vec![0.0; self.channels];
        for y in 0..dst_height {
            let (y0, y1, t) = source_coordinate(y, scale_y, self.height);
            for (x, &(x0, x1, s)) in columns.iter().enumerate() {
                let (p00, p10) = (self.pixel(x0, y0), self.pixel(x1, y0));
                let (p01, p11) = (self.pixel(x0, y1), self.pixel(x1, y1));
                for c in 0..self.channels {
                    pixel[c] = lerp(lerp(p00[c], p10[c], s), lerp(p01[c], p11[c], s), t);
                }
                dst.set_pixel(x, y, &pixel);
            }
        }
        dst
    }
}
